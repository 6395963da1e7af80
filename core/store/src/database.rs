use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thoughtmap_schemas::{
    generate_category_id, generate_cluster_id, generate_connection_id, generate_thought_id,
    Category, CategoryId, Cluster, ClusterId, ClusterUpdate, ClusterWithThoughts, ConnectionId,
    ConnectionMetadata, ConnectionMetadataUpdate, ConnectionRow, ConnectionType, NewConnection,
    Thought, ThoughtBrief, ThoughtId, ThoughtStatus, ThoughtUpdate, ThoughtWithCategories, UserId,
};
use tracing::{debug, info, warn};

/// Age after which `delete_old_connections` prunes rows by default.
pub const DEFAULT_CONNECTION_RETENTION_DAYS: i64 = 30;

const THOUGHT_COLUMNS: &str =
    "id, user_id, title, snippet, content, is_completed, status, created_at, updated_at";

const CONNECTION_COLUMNS: &str = "id, user_id, thought1_id, thought2_id, title, description,
     connection_type, is_dismissed, created_at";

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database and make sure every table exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized");
        Ok(db)
    }

    /// In-memory database, used by tests and throwaway tooling
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create all tables and indexes
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS thoughts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                snippet TEXT,
                content TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_thoughts_user_status
                ON thoughts(user_id, status, created_at DESC);

            CREATE TABLE IF NOT EXISTS categories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                UNIQUE(user_id, name)
            );

            CREATE TABLE IF NOT EXISTS thought_categories (
                thought_id TEXT NOT NULL,
                category_id TEXT NOT NULL,
                PRIMARY KEY (thought_id, category_id),
                FOREIGN KEY (thought_id) REFERENCES thoughts(id) ON DELETE CASCADE,
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS clusters (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                is_manual INTEGER NOT NULL DEFAULT 0,
                is_collapsed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS thought_clusters (
                thought_id TEXT NOT NULL,
                cluster_id TEXT NOT NULL,
                PRIMARY KEY (thought_id, cluster_id),
                FOREIGN KEY (thought_id) REFERENCES thoughts(id) ON DELETE CASCADE,
                FOREIGN KEY (cluster_id) REFERENCES clusters(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS connections (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                thought1_id TEXT NOT NULL,
                thought2_id TEXT NOT NULL,
                title TEXT,
                description TEXT NOT NULL,
                connection_type TEXT,
                is_dismissed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_connections_user
                ON connections(user_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS connection_metadata (
                user_id TEXT PRIMARY KEY,
                last_full_analysis_at TEXT,
                thoughts_analyzed_count INTEGER NOT NULL DEFAULT 0,
                last_incremental_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS api_tokens (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );",
        )?;

        Ok(())
    }

    // ========== THOUGHTS ==========

    /// Insert a fully-specified thought
    pub fn insert_thought(&self, thought: &Thought) -> Result<()> {
        self.conn.execute(
            "INSERT INTO thoughts (id, user_id, title, snippet, content, is_completed,
                                   status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                thought.id.0,
                thought.user_id.0,
                thought.title,
                thought.snippet,
                thought.content,
                thought.is_completed,
                thought.status.as_str(),
                thought.created_at,
                thought.updated_at,
            ],
        )?;

        debug!("Inserted thought: {}", thought.id);
        Ok(())
    }

    /// Create an active, uncompleted thought for a user
    pub fn create_thought(
        &self,
        user_id: &UserId,
        title: &str,
        content: &str,
        snippet: Option<&str>,
    ) -> Result<Thought> {
        let now = Utc::now().to_rfc3339();
        let thought = Thought {
            id: generate_thought_id(),
            user_id: user_id.clone(),
            title: title.to_string(),
            snippet: snippet.map(str::to_string),
            content: content.to_string(),
            is_completed: false,
            status: ThoughtStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        };

        self.insert_thought(&thought)?;
        Ok(thought)
    }

    fn row_to_thought(row: &Row) -> rusqlite::Result<Thought> {
        let status_raw: String = row.get(6)?;
        let status = ThoughtStatus::parse(&status_raw).unwrap_or_else(|| {
            debug!("Unknown thought status '{}', defaulting to active", status_raw);
            ThoughtStatus::Active
        });

        Ok(Thought {
            id: ThoughtId(row.get(0)?),
            user_id: UserId(row.get(1)?),
            title: row.get(2)?,
            snippet: row.get(3)?,
            content: row.get(4)?,
            is_completed: row.get(5)?,
            status,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn get_thought(&self, id: &ThoughtId) -> Result<Option<Thought>> {
        let thought = self
            .conn
            .query_row(
                &format!("SELECT {} FROM thoughts WHERE id = ?1", THOUGHT_COLUMNS),
                params![id.0],
                Self::row_to_thought,
            )
            .optional()?;

        Ok(thought)
    }

    fn categories_for_thought(&self, thought_id: &ThoughtId) -> Result<Vec<Category>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT c.id, c.name
             FROM thought_categories tc
             JOIN categories c ON c.id = tc.category_id
             WHERE tc.thought_id = ?1
             ORDER BY c.name",
        )?;

        let categories = stmt
            .query_map(params![thought_id.0], |row| {
                Ok(Category {
                    id: CategoryId(row.get(0)?),
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    fn with_categories(&self, thoughts: Vec<Thought>) -> Result<Vec<ThoughtWithCategories>> {
        thoughts
            .into_iter()
            .map(|thought| {
                let categories = self.categories_for_thought(&thought.id)?;
                Ok(ThoughtWithCategories {
                    thought,
                    categories,
                })
            })
            .collect()
    }

    /// A user's thoughts with the given status, newest first
    pub fn fetch_thoughts_with_categories(
        &self,
        user_id: &UserId,
        status: ThoughtStatus,
    ) -> Result<Vec<ThoughtWithCategories>> {
        self.query_thoughts(user_id, status, None)
    }

    /// Up to `limit` active thoughts, newest first, for connection analysis
    pub fn fetch_candidate_thoughts(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ThoughtWithCategories>> {
        self.query_thoughts(user_id, ThoughtStatus::Active, Some(limit))
    }

    fn query_thoughts(
        &self,
        user_id: &UserId,
        status: ThoughtStatus,
        limit: Option<usize>,
    ) -> Result<Vec<ThoughtWithCategories>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}
             FROM thoughts
             WHERE user_id = ?1 AND status = ?2
             ORDER BY created_at DESC, id DESC
             LIMIT ?3",
            THOUGHT_COLUMNS
        ))?;

        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let thoughts = stmt
            .query_map(
                params![user_id.0, status.as_str(), limit],
                Self::row_to_thought,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to fetch thoughts")?;

        self.with_categories(thoughts)
    }

    /// Title, category names and completion flag for one thought
    pub fn thought_brief(&self, id: &ThoughtId) -> Result<Option<ThoughtBrief>> {
        let Some(thought) = self.get_thought(id)? else {
            return Ok(None);
        };

        let categories = self
            .categories_for_thought(id)?
            .into_iter()
            .map(|c| c.name)
            .collect();

        Ok(Some(ThoughtBrief {
            title: thought.title,
            categories,
            is_completed: thought.is_completed,
        }))
    }

    /// Apply a partial update to a thought owned by `user_id`; returns false
    /// when no such thought exists
    pub fn update_thought(
        &self,
        user_id: &UserId,
        id: &ThoughtId,
        updates: &ThoughtUpdate,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE thoughts SET
                title = COALESCE(?2, title),
                snippet = COALESCE(?3, snippet),
                content = COALESCE(?4, content),
                is_completed = COALESCE(?5, is_completed),
                updated_at = ?6
             WHERE id = ?1 AND user_id = ?7",
            params![
                id.0,
                updates.title,
                updates.snippet,
                updates.content,
                updates.is_completed,
                Utc::now().to_rfc3339(),
                user_id.0,
            ],
        )?;

        Ok(changed > 0)
    }

    /// Archive or restore a thought owned by `user_id`
    pub fn update_thought_status(
        &self,
        user_id: &UserId,
        id: &ThoughtId,
        status: ThoughtStatus,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE thoughts SET status = ?3, updated_at = ?4 WHERE id = ?1 AND user_id = ?2",
            params![id.0, user_id.0, status.as_str(), Utc::now().to_rfc3339()],
        )?;

        debug!("Set thought {} status to {}", id, status.as_str());
        Ok(changed > 0)
    }

    // ========== CATEGORIES ==========

    pub fn fetch_categories(&self, user_id: &UserId) -> Result<Vec<Category>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM categories WHERE user_id = ?1 ORDER BY name")?;

        let categories = stmt
            .query_map(params![user_id.0], |row| {
                Ok(Category {
                    id: CategoryId(row.get(0)?),
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    /// Attach a category by name, creating the category on first use
    pub fn add_category_to_thought(
        &self,
        thought_id: &ThoughtId,
        category_name: &str,
        user_id: &UserId,
    ) -> Result<CategoryId> {
        let name = category_name.trim();
        anyhow::ensure!(!name.is_empty(), "Category name cannot be empty");
        anyhow::ensure!(
            self.owns_thought(user_id, thought_id)?,
            "Thought not found: {}",
            thought_id
        );

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM categories WHERE user_id = ?1 AND name = ?2",
                params![user_id.0, name],
                |row| row.get(0),
            )
            .optional()?;

        let category_id = match existing {
            Some(id) => CategoryId(id),
            None => {
                let id = generate_category_id();
                self.conn.execute(
                    "INSERT INTO categories (id, user_id, name) VALUES (?1, ?2, ?3)",
                    params![id.0, user_id.0, name],
                )?;
                info!("Created category: {} ({})", name, id);
                id
            }
        };

        self.conn.execute(
            "INSERT OR IGNORE INTO thought_categories (thought_id, category_id) VALUES (?1, ?2)",
            params![thought_id.0, category_id.0],
        )?;

        Ok(category_id)
    }

    pub fn remove_category_from_thought(
        &self,
        user_id: &UserId,
        thought_id: &ThoughtId,
        category_id: &CategoryId,
    ) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM thought_categories
             WHERE thought_id = ?1 AND category_id = ?2
               AND thought_id IN (SELECT id FROM thoughts WHERE user_id = ?3)",
            params![thought_id.0, category_id.0, user_id.0],
        )?;

        Ok(removed > 0)
    }

    fn owns_thought(&self, user_id: &UserId, thought_id: &ThoughtId) -> Result<bool> {
        let owned = self
            .conn
            .query_row(
                "SELECT 1 FROM thoughts WHERE id = ?1 AND user_id = ?2",
                params![thought_id.0, user_id.0],
                |_| Ok(()),
            )
            .optional()?;

        Ok(owned.is_some())
    }

    // ========== CLUSTERS ==========

    fn row_to_cluster(row: &Row) -> rusqlite::Result<Cluster> {
        Ok(Cluster {
            id: ClusterId(row.get(0)?),
            user_id: UserId(row.get(1)?),
            name: row.get(2)?,
            is_manual: row.get(3)?,
            is_collapsed: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    pub fn create_cluster(&self, user_id: &UserId, name: &str, is_manual: bool) -> Result<Cluster> {
        let now = Utc::now().to_rfc3339();
        let cluster = Cluster {
            id: generate_cluster_id(),
            user_id: user_id.clone(),
            name: name.to_string(),
            is_manual,
            is_collapsed: false,
            created_at: now.clone(),
            updated_at: Some(now),
        };

        self.conn.execute(
            "INSERT INTO clusters (id, user_id, name, is_manual, is_collapsed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                cluster.id.0,
                cluster.user_id.0,
                cluster.name,
                cluster.is_manual,
                cluster.is_collapsed,
                cluster.created_at,
                cluster.updated_at,
            ],
        )?;

        info!("Created cluster: {} ({})", cluster.name, cluster.id);
        Ok(cluster)
    }

    pub fn get_cluster(&self, user_id: &UserId, id: &ClusterId) -> Result<Option<Cluster>> {
        let cluster = self
            .conn
            .query_row(
                "SELECT id, user_id, name, is_manual, is_collapsed, created_at, updated_at
                 FROM clusters WHERE id = ?1 AND user_id = ?2",
                params![id.0, user_id.0],
                Self::row_to_cluster,
            )
            .optional()?;

        Ok(cluster)
    }

    pub fn update_cluster(
        &self,
        user_id: &UserId,
        id: &ClusterId,
        updates: &ClusterUpdate,
    ) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE clusters SET
                name = COALESCE(?3, name),
                is_collapsed = COALESCE(?4, is_collapsed),
                updated_at = ?5
             WHERE id = ?1 AND user_id = ?2",
            params![
                id.0,
                user_id.0,
                updates.name,
                updates.is_collapsed,
                Utc::now().to_rfc3339(),
            ],
        )?;

        Ok(changed > 0)
    }

    /// Thoughts belonging to a cluster, with categories, in insertion order
    pub fn cluster_thoughts(&self, cluster_id: &ClusterId) -> Result<Vec<ThoughtWithCategories>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.user_id, t.title, t.snippet, t.content, t.is_completed,
                    t.status, t.created_at, t.updated_at
             FROM thought_clusters tc
             JOIN thoughts t ON t.id = tc.thought_id
             WHERE tc.cluster_id = ?1
             ORDER BY tc.rowid",
        )?;

        let thoughts = stmt
            .query_map(params![cluster_id.0], Self::row_to_thought)?
            .collect::<Result<Vec<_>, _>>()?;

        self.with_categories(thoughts)
    }

    /// All of a user's clusters, newest first, each with its thoughts
    pub fn fetch_clusters_with_thoughts(&self, user_id: &UserId) -> Result<Vec<ClusterWithThoughts>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, name, is_manual, is_collapsed, created_at, updated_at
             FROM clusters
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;

        let clusters = stmt
            .query_map(params![user_id.0], Self::row_to_cluster)?
            .collect::<Result<Vec<_>, _>>()?;

        clusters
            .into_iter()
            .map(|cluster| {
                let thoughts = self.cluster_thoughts(&cluster.id)?;
                Ok(ClusterWithThoughts { cluster, thoughts })
            })
            .collect()
    }

    /// Adding an existing member is a no-op
    pub fn add_thought_to_cluster(&self, thought_id: &ThoughtId, cluster_id: &ClusterId) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO thought_clusters (thought_id, cluster_id) VALUES (?1, ?2)",
                params![thought_id.0, cluster_id.0],
            )
            .with_context(|| format!("Failed to add thought {} to cluster {}", thought_id, cluster_id))?;

        Ok(())
    }

    pub fn remove_thought_from_cluster(
        &self,
        thought_id: &ThoughtId,
        cluster_id: &ClusterId,
    ) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM thought_clusters WHERE thought_id = ?1 AND cluster_id = ?2",
            params![thought_id.0, cluster_id.0],
        )?;

        Ok(removed > 0)
    }

    /// Remove a cluster and its memberships; the thoughts themselves remain
    pub fn delete_cluster(&self, user_id: &UserId, cluster_id: &ClusterId) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;

        let owned: Option<String> = tx
            .query_row(
                "SELECT id FROM clusters WHERE id = ?1 AND user_id = ?2",
                params![cluster_id.0, user_id.0],
                |row| row.get(0),
            )
            .optional()?;

        if owned.is_none() {
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM thought_clusters WHERE cluster_id = ?1",
            params![cluster_id.0],
        )?;
        tx.execute("DELETE FROM clusters WHERE id = ?1", params![cluster_id.0])?;
        tx.commit()?;

        info!("Deleted cluster {}", cluster_id);
        Ok(true)
    }

    /// Active thoughts that belong to no cluster, newest first
    pub fn fetch_unclustered_thoughts(&self, user_id: &UserId) -> Result<Vec<ThoughtWithCategories>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}
             FROM thoughts t
             WHERE t.user_id = ?1 AND t.status = 'active'
               AND NOT EXISTS (SELECT 1 FROM thought_clusters tc WHERE tc.thought_id = t.id)
             ORDER BY t.created_at DESC, t.id DESC",
            THOUGHT_COLUMNS
        ))?;

        let thoughts = stmt
            .query_map(params![user_id.0], Self::row_to_thought)?
            .collect::<Result<Vec<_>, _>>()?;

        self.with_categories(thoughts)
    }

    // ========== CONNECTIONS ==========

    fn row_to_connection(row: &Row) -> rusqlite::Result<ConnectionRow> {
        let connection_type: Option<String> = row.get(6)?;

        Ok(ConnectionRow {
            id: ConnectionId(row.get(0)?),
            user_id: UserId(row.get(1)?),
            thought1_id: ThoughtId(row.get(2)?),
            thought2_id: ThoughtId(row.get(3)?),
            title: row.get(4)?,
            description: row.get(5)?,
            connection_type: connection_type.as_deref().and_then(ConnectionType::parse),
            is_dismissed: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    /// A user's stored connections, newest first
    pub fn fetch_connections(
        &self,
        user_id: &UserId,
        include_dismissed: bool,
    ) -> Result<Vec<ConnectionRow>> {
        let sql = if include_dismissed {
            format!(
                "SELECT {} FROM connections WHERE user_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
                CONNECTION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM connections WHERE user_id = ?1 AND is_dismissed = 0
                 ORDER BY created_at DESC, rowid DESC",
                CONNECTION_COLUMNS
            )
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![user_id.0], Self::row_to_connection)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to fetch connections")?;

        Ok(rows)
    }

    /// Insert a batch of connections in one transaction
    pub fn create_connections(
        &self,
        user_id: &UserId,
        connections: &[NewConnection],
    ) -> Result<Vec<ConnectionRow>> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut created = Vec::with_capacity(connections.len());

        {
            let mut stmt = tx.prepare(
                "INSERT INTO connections (id, user_id, thought1_id, thought2_id, title,
                                          description, connection_type, is_dismissed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            )?;

            for conn in connections {
                let id = generate_connection_id();
                stmt.execute(params![
                    id.0,
                    user_id.0,
                    conn.thought1_id.0,
                    conn.thought2_id.0,
                    conn.title,
                    conn.description,
                    conn.connection_type.map(|t| t.as_str()),
                    now,
                ])?;

                created.push(ConnectionRow {
                    id,
                    user_id: user_id.clone(),
                    thought1_id: conn.thought1_id.clone(),
                    thought2_id: conn.thought2_id.clone(),
                    title: conn.title.clone(),
                    description: conn.description.clone(),
                    connection_type: conn.connection_type,
                    is_dismissed: false,
                    created_at: now.clone(),
                });
            }
        }

        tx.commit()?;

        debug!("Inserted {} connections for {}", created.len(), user_id);
        Ok(created)
    }

    pub fn delete_connections_for_user(&self, user_id: &UserId) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM connections WHERE user_id = ?1",
            params![user_id.0],
        )?;

        debug!("Deleted {} connections for {}", deleted, user_id);
        Ok(deleted)
    }

    pub fn dismiss_connection(&self, user_id: &UserId, id: &ConnectionId) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE connections SET is_dismissed = 1 WHERE id = ?1 AND user_id = ?2",
            params![id.0, user_id.0],
        )?;

        Ok(changed > 0)
    }

    /// Prune connections created more than `days_old` days before `now`
    pub fn delete_old_connections(
        &self,
        user_id: &UserId,
        days_old: i64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let cutoff = (now - Duration::days(days_old)).to_rfc3339();

        let deleted = self.conn.execute(
            "DELETE FROM connections WHERE user_id = ?1 AND created_at < ?2",
            params![user_id.0, cutoff],
        )?;

        if deleted > 0 {
            info!("Pruned {} connections older than {} days", deleted, days_old);
        }
        Ok(deleted)
    }

    // ========== CONNECTION METADATA ==========

    pub fn fetch_connection_metadata(&self, user_id: &UserId) -> Result<Option<ConnectionMetadata>> {
        let metadata = self
            .conn
            .query_row(
                "SELECT user_id, last_full_analysis_at, thoughts_analyzed_count,
                        last_incremental_at, created_at, updated_at
                 FROM connection_metadata WHERE user_id = ?1",
                params![user_id.0],
                |row| {
                    Ok(ConnectionMetadata {
                        user_id: UserId(row.get(0)?),
                        last_full_analysis_at: row.get(1)?,
                        thoughts_analyzed_count: row.get::<_, i64>(2)?.max(0) as u32,
                        last_incremental_at: row.get(3)?,
                        created_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;

        Ok(metadata)
    }

    /// Insert or partially update the single metadata row for a user
    pub fn upsert_connection_metadata(
        &self,
        user_id: &UserId,
        update: &ConnectionMetadataUpdate,
        now: DateTime<Utc>,
    ) -> Result<ConnectionMetadata> {
        let now = now.to_rfc3339();

        self.conn.execute(
            "INSERT INTO connection_metadata (user_id, last_full_analysis_at, thoughts_analyzed_count,
                                              last_incremental_at, created_at, updated_at)
             VALUES (?1, ?2, COALESCE(?3, 0), ?4, ?5, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                last_full_analysis_at = COALESCE(excluded.last_full_analysis_at, last_full_analysis_at),
                thoughts_analyzed_count = COALESCE(?3, thoughts_analyzed_count),
                last_incremental_at = COALESCE(excluded.last_incremental_at, last_incremental_at),
                updated_at = excluded.updated_at",
            params![
                user_id.0,
                update.last_full_analysis_at,
                update.thoughts_analyzed_count,
                update.last_incremental_at,
                now,
            ],
        )?;

        self.fetch_connection_metadata(user_id)?
            .context("Connection metadata missing after upsert")
    }

    // ========== API TOKENS ==========

    /// Issue a new bearer token for a user
    pub fn issue_api_token(&self, user_id: &UserId) -> Result<String> {
        let token = format!(
            "tm_{}{}",
            ulid::Ulid::new().to_string().to_lowercase(),
            ulid::Ulid::new().to_string().to_lowercase()
        );

        self.conn.execute(
            "INSERT INTO api_tokens (token, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![token, user_id.0, Utc::now().to_rfc3339()],
        )?;

        info!("Issued API token for {}", user_id);
        Ok(token)
    }

    pub fn resolve_api_token(&self, token: &str) -> Result<Option<UserId>> {
        let user = self
            .conn
            .query_row(
                "SELECT user_id FROM api_tokens WHERE token = ?1",
                params![token],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        if user.is_none() {
            warn!("Rejected unknown API token");
        }
        Ok(user.map(UserId))
    }
}
