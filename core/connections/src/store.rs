use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thoughtmap_schemas::{
    Connection, ConnectionMetadata, ConnectionMetadataUpdate, ConnectionRow, NewConnection,
    ThoughtWithCategories, UserId,
};
use thoughtmap_store::Database;
use tokio::sync::Mutex;

/// Storage collaborator of the cache gate and the discovery engine
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Active thoughts with category names, newest first
    async fn fetch_candidate_thoughts(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ThoughtWithCategories>>;

    async fn fetch_metadata(&self, user_id: &UserId) -> Result<Option<ConnectionMetadata>>;

    /// Non-dismissed connections joined with both endpoints
    async fn load_connections(&self, user_id: &UserId) -> Result<Vec<Connection>>;

    async fn upsert_analysis_metadata(
        &self,
        user_id: &UserId,
        analyzed_at: DateTime<Utc>,
        thoughts_analyzed: u32,
    ) -> Result<()>;

    async fn delete_connections(&self, user_id: &UserId) -> Result<usize>;

    async fn insert_connections(&self, user_id: &UserId, rows: &[NewConnection]) -> Result<usize>;
}

/// `ConnectionStore` over the shared SQLite database.
/// The lock is taken per call and never held across a model request.
#[derive(Clone)]
pub struct SqliteConnectionStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteConnectionStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    fn enrich(db: &Database, row: ConnectionRow) -> Result<Connection> {
        let thought1 = db.thought_brief(&row.thought1_id)?.unwrap_or_default();
        let thought2 = db.thought_brief(&row.thought2_id)?.unwrap_or_default();

        Ok(Connection {
            id: Some(row.id),
            thought1_id: row.thought1_id,
            thought2_id: row.thought2_id,
            thought1,
            thought2,
            title: row.title,
            reason: Some(row.description.clone()),
            description: row.description,
            connection_type: row.connection_type,
            is_dismissed: Some(row.is_dismissed),
            created_at: Some(row.created_at),
        })
    }
}

#[async_trait]
impl ConnectionStore for SqliteConnectionStore {
    async fn fetch_candidate_thoughts(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ThoughtWithCategories>> {
        let db = self.db.lock().await;
        db.fetch_candidate_thoughts(user_id, limit)
    }

    async fn fetch_metadata(&self, user_id: &UserId) -> Result<Option<ConnectionMetadata>> {
        let db = self.db.lock().await;
        db.fetch_connection_metadata(user_id)
    }

    async fn load_connections(&self, user_id: &UserId) -> Result<Vec<Connection>> {
        let db = self.db.lock().await;
        db.fetch_connections(user_id, false)?
            .into_iter()
            .map(|row| Self::enrich(&db, row))
            .collect()
    }

    async fn upsert_analysis_metadata(
        &self,
        user_id: &UserId,
        analyzed_at: DateTime<Utc>,
        thoughts_analyzed: u32,
    ) -> Result<()> {
        let update = ConnectionMetadataUpdate {
            last_full_analysis_at: Some(analyzed_at.to_rfc3339()),
            thoughts_analyzed_count: Some(thoughts_analyzed),
            last_incremental_at: None,
        };

        let db = self.db.lock().await;
        db.upsert_connection_metadata(user_id, &update, analyzed_at)?;
        Ok(())
    }

    async fn delete_connections(&self, user_id: &UserId) -> Result<usize> {
        let db = self.db.lock().await;
        db.delete_connections_for_user(user_id)
    }

    async fn insert_connections(&self, user_id: &UserId, rows: &[NewConnection]) -> Result<usize> {
        let db = self.db.lock().await;
        Ok(db.create_connections(user_id, rows)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoughtmap_schemas::generate_user_id;

    #[tokio::test]
    async fn test_load_connections_joins_endpoints() {
        let db = Database::in_memory().unwrap();
        let user = generate_user_id();
        let a = db.create_thought(&user, "Learn Spanish", "daily practice", None).unwrap();
        let b = db.create_thought(&user, "Trip to Madrid", "in May", None).unwrap();
        db.add_category_to_thought(&a.id, "learning", &user).unwrap();

        let store = SqliteConnectionStore::new(Arc::new(Mutex::new(db)));
        let inserted = store
            .insert_connections(
                &user,
                &[NewConnection {
                    thought1_id: a.id.clone(),
                    thought2_id: b.id.clone(),
                    title: None,
                    description: "Practice before the trip".into(),
                    connection_type: None,
                }],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let loaded = store.load_connections(&user).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].thought1.title, "Learn Spanish");
        assert_eq!(loaded[0].thought1.categories, vec!["learning".to_string()]);
        assert_eq!(loaded[0].thought2.title, "Trip to Madrid");
        assert_eq!(loaded[0].reason.as_deref(), Some("Practice before the trip"));
        assert_eq!(loaded[0].is_dismissed, Some(false));
    }

    #[tokio::test]
    async fn test_dismissed_connections_are_hidden() {
        let db = Database::in_memory().unwrap();
        let user = generate_user_id();
        let a = db.create_thought(&user, "A", "a", None).unwrap();
        let b = db.create_thought(&user, "B", "b", None).unwrap();
        let rows = db
            .create_connections(
                &user,
                &[NewConnection {
                    thought1_id: a.id,
                    thought2_id: b.id,
                    title: None,
                    description: "linked".into(),
                    connection_type: None,
                }],
            )
            .unwrap();
        db.dismiss_connection(&user, &rows[0].id).unwrap();

        let store = SqliteConnectionStore::new(Arc::new(Mutex::new(db)));
        assert!(store.load_connections(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_analysis_metadata() {
        let store = SqliteConnectionStore::new(Arc::new(Mutex::new(Database::in_memory().unwrap())));
        let user = generate_user_id();
        assert!(store.fetch_metadata(&user).await.unwrap().is_none());

        let at = Utc::now();
        store.upsert_analysis_metadata(&user, at, 7).await.unwrap();

        let metadata = store.fetch_metadata(&user).await.unwrap().unwrap();
        assert_eq!(metadata.thoughts_analyzed_count, 7);
        assert_eq!(metadata.last_full_analysis_at, Some(at.to_rfc3339()));
    }
}
