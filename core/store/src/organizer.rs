use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use thoughtmap_schemas::{
    Cluster, ClusterCompletion, ClusterId, ClusterUpdate, ClusterWithThoughts, ThoughtId,
    ThoughtStatus, ThoughtWithCategories, UserId,
};
use tracing::{debug, info};

use crate::database::Database;

pub const MAX_CLUSTER_NAME_CHARS: usize = 100;

#[derive(Error, Debug)]
pub enum OrganizerError {
    #[error("Cluster name cannot be empty")]
    EmptyName,

    #[error("Cluster not found: {0}")]
    ClusterNotFound(ClusterId),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OrganizerError>;

fn whitespace_run() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Normalize a user-supplied cluster name.
/// Returns `None` when nothing printable is left.
pub fn sanitize_cluster_name(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .filter(|c| *c != '<' && *c != '>')
        .collect();

    let collapsed = whitespace_run().replace_all(stripped.trim(), " ");
    let name: String = collapsed.chars().take(MAX_CLUSTER_NAME_CHARS).collect();
    let name = name.trim_end().to_string();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Cluster management on top of the database: manual clusters, membership,
/// archiving and completion tracking.
pub struct ClusterOrganizer;

impl ClusterOrganizer {
    pub fn new() -> Self {
        Self
    }

    pub fn list_clusters(&self, db: &Database, user_id: &UserId) -> Result<Vec<ClusterWithThoughts>> {
        Ok(db.fetch_clusters_with_thoughts(user_id)?)
    }

    pub fn create_manual_cluster(&self, db: &Database, user_id: &UserId, name: &str) -> Result<Cluster> {
        let name = sanitize_cluster_name(name).ok_or(OrganizerError::EmptyName)?;
        let cluster = db.create_cluster(user_id, &name, true)?;

        info!("Created manual cluster \"{}\" for {}", cluster.name, user_id);
        Ok(cluster)
    }

    pub fn rename_cluster(
        &self,
        db: &Database,
        user_id: &UserId,
        cluster_id: &ClusterId,
        new_name: &str,
    ) -> Result<String> {
        let name = sanitize_cluster_name(new_name).ok_or(OrganizerError::EmptyName)?;

        let updated = db.update_cluster(
            user_id,
            cluster_id,
            &ClusterUpdate {
                name: Some(name.clone()),
                is_collapsed: None,
            },
        )?;

        if !updated {
            return Err(OrganizerError::ClusterNotFound(cluster_id.clone()));
        }

        debug!("Renamed cluster {} to \"{}\"", cluster_id, name);
        Ok(name)
    }

    pub fn set_collapsed(
        &self,
        db: &Database,
        user_id: &UserId,
        cluster_id: &ClusterId,
        is_collapsed: bool,
    ) -> Result<()> {
        let updated = db.update_cluster(
            user_id,
            cluster_id,
            &ClusterUpdate {
                name: None,
                is_collapsed: Some(is_collapsed),
            },
        )?;

        if !updated {
            return Err(OrganizerError::ClusterNotFound(cluster_id.clone()));
        }
        Ok(())
    }

    pub fn add_thought(
        &self,
        db: &Database,
        user_id: &UserId,
        cluster_id: &ClusterId,
        thought_id: &ThoughtId,
    ) -> Result<()> {
        self.require_cluster(db, user_id, cluster_id)?;
        db.add_thought_to_cluster(thought_id, cluster_id)?;
        Ok(())
    }

    pub fn remove_thought(
        &self,
        db: &Database,
        user_id: &UserId,
        cluster_id: &ClusterId,
        thought_id: &ThoughtId,
    ) -> Result<bool> {
        self.require_cluster(db, user_id, cluster_id)?;
        Ok(db.remove_thought_from_cluster(thought_id, cluster_id)?)
    }

    /// Archive every thought in the cluster. Returns how many were archived.
    pub fn archive_cluster(&self, db: &Database, user_id: &UserId, cluster_id: &ClusterId) -> Result<usize> {
        let cluster = self.require_cluster(db, user_id, cluster_id)?;
        let thoughts = db.cluster_thoughts(cluster_id)?;

        let mut archived = 0;
        for thought in &thoughts {
            if db.update_thought_status(user_id, &thought.thought.id, ThoughtStatus::Archived)? {
                archived += 1;
            }
        }

        info!(
            "Archived cluster \"{}\" ({} thoughts moved to archive)",
            cluster.name, archived
        );
        Ok(archived)
    }

    pub fn delete_cluster(&self, db: &Database, user_id: &UserId, cluster_id: &ClusterId) -> Result<()> {
        if !db.delete_cluster(user_id, cluster_id)? {
            return Err(OrganizerError::ClusterNotFound(cluster_id.clone()));
        }
        Ok(())
    }

    pub fn cluster_completion(
        &self,
        db: &Database,
        user_id: &UserId,
        cluster_id: &ClusterId,
    ) -> Result<ClusterCompletion> {
        self.require_cluster(db, user_id, cluster_id)?;
        let thoughts = db.cluster_thoughts(cluster_id)?;
        Ok(Self::completion_of(&thoughts))
    }

    /// Completion over the active thoughts only; archived members don't count.
    pub fn completion_of(thoughts: &[ThoughtWithCategories]) -> ClusterCompletion {
        let active: Vec<_> = thoughts
            .iter()
            .filter(|t| t.thought.status == ThoughtStatus::Active)
            .collect();
        let completed = active.iter().filter(|t| t.thought.is_completed).count();

        ClusterCompletion {
            completed,
            total: active.len(),
            is_fully_completed: !active.is_empty() && completed == active.len(),
        }
    }

    pub fn unclustered_thoughts(&self, db: &Database, user_id: &UserId) -> Result<Vec<ThoughtWithCategories>> {
        Ok(db.fetch_unclustered_thoughts(user_id)?)
    }

    fn require_cluster(&self, db: &Database, user_id: &UserId, cluster_id: &ClusterId) -> Result<Cluster> {
        db.get_cluster(user_id, cluster_id)?
            .ok_or_else(|| OrganizerError::ClusterNotFound(cluster_id.clone()))
    }
}

impl Default for ClusterOrganizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thoughtmap_schemas::{generate_user_id, ThoughtUpdate};

    #[test]
    fn test_sanitize_cluster_name() {
        assert_eq!(
            sanitize_cluster_name("  Weekend   <b>projects</b>\n").as_deref(),
            Some("Weekend bprojects/b")
        );
        assert_eq!(sanitize_cluster_name("   \t "), None);
        assert_eq!(sanitize_cluster_name("<>"), None);
        assert_eq!(sanitize_cluster_name("a\u{0007}b").as_deref(), Some("ab"));

        let long = "x".repeat(MAX_CLUSTER_NAME_CHARS + 20);
        assert_eq!(
            sanitize_cluster_name(&long).map(|n| n.chars().count()),
            Some(MAX_CLUSTER_NAME_CHARS)
        );
    }

    #[test]
    fn test_create_manual_cluster_rejects_empty_name() {
        let db = Database::in_memory().unwrap();
        let organizer = ClusterOrganizer::new();
        let user = generate_user_id();

        let err = organizer.create_manual_cluster(&db, &user, "  <> ").unwrap_err();
        assert!(matches!(err, OrganizerError::EmptyName));
        assert_eq!(err.to_string(), "Cluster name cannot be empty");

        let cluster = organizer.create_manual_cluster(&db, &user, " Reading list ").unwrap();
        assert_eq!(cluster.name, "Reading list");
        assert!(cluster.is_manual);
    }

    #[test]
    fn test_rename_unknown_cluster() {
        let db = Database::in_memory().unwrap();
        let organizer = ClusterOrganizer::new();
        let user = generate_user_id();

        let err = organizer
            .rename_cluster(&db, &user, &ClusterId("clu_missing".into()), "New")
            .unwrap_err();
        assert!(matches!(err, OrganizerError::ClusterNotFound(_)));
    }

    #[test]
    fn test_completion_counts_only_active_thoughts() {
        let db = Database::in_memory().unwrap();
        let organizer = ClusterOrganizer::new();
        let user = generate_user_id();
        let cluster = organizer.create_manual_cluster(&db, &user, "Chores").unwrap();

        let empty = organizer.cluster_completion(&db, &user, &cluster.id).unwrap();
        assert_eq!(empty.total, 0);
        assert!(!empty.is_fully_completed);

        let done = db.create_thought(&user, "Dishes", "wash", None).unwrap();
        let archived = db.create_thought(&user, "Old chore", "gone", None).unwrap();
        organizer.add_thought(&db, &user, &cluster.id, &done.id).unwrap();
        organizer.add_thought(&db, &user, &cluster.id, &archived.id).unwrap();

        db.update_thought(
            &user,
            &done.id,
            &ThoughtUpdate {
                is_completed: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        db.update_thought_status(&user, &archived.id, ThoughtStatus::Archived)
            .unwrap();

        let completion = organizer.cluster_completion(&db, &user, &cluster.id).unwrap();
        assert_eq!(completion.completed, 1);
        assert_eq!(completion.total, 1);
        assert!(completion.is_fully_completed);
    }
}
