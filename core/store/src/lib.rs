pub mod database;
pub mod organizer;

pub use database::{Database, DEFAULT_CONNECTION_RETENTION_DAYS};
pub use organizer::{sanitize_cluster_name, ClusterOrganizer, OrganizerError, MAX_CLUSTER_NAME_CHARS};
