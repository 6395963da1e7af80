use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ULID and ID Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThoughtId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ThoughtId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Thought Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThoughtStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "archived")]
    Archived,
}

impl ThoughtStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThoughtStatus::Active => "active",
            ThoughtStatus::Archived => "archived",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(ThoughtStatus::Active),
            "archived" => Some(ThoughtStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub id: ThoughtId,
    pub user_id: UserId,
    pub title: String,
    pub snippet: Option<String>,
    pub content: String,
    pub is_completed: bool,
    pub status: ThoughtStatus,
    pub created_at: String, // RFC3339
    pub updated_at: String, // RFC3339
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThoughtWithCategories {
    #[serde(flatten)]
    pub thought: Thought,
    pub categories: Vec<Category>,
}

impl ThoughtWithCategories {
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|c| c.name.clone()).collect()
    }
}

/// Partial update applied to a thought; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThoughtUpdate {
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub content: Option<String>,
    pub is_completed: Option<bool>,
}

// ============================================================================
// Cluster Schema
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub user_id: UserId,
    pub name: String,
    pub is_manual: bool,
    pub is_collapsed: bool,
    pub created_at: String, // RFC3339
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterWithThoughts {
    #[serde(flatten)]
    pub cluster: Cluster,
    pub thoughts: Vec<ThoughtWithCategories>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterUpdate {
    pub name: Option<String>,
    pub is_collapsed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCompletion {
    pub completed: usize,
    pub total: usize,
    pub is_fully_completed: bool,
}

// ============================================================================
// Connection Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    #[serde(rename = "problem_solution")]
    ProblemSolution,
    #[serde(rename = "goal_steps")]
    GoalSteps,
    #[serde(rename = "cause_effect")]
    CauseEffect,
    #[serde(rename = "contradiction")]
    Contradiction,
    #[serde(rename = "other")]
    Other,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::ProblemSolution => "problem_solution",
            ConnectionType::GoalSteps => "goal_steps",
            ConnectionType::CauseEffect => "cause_effect",
            ConnectionType::Contradiction => "contradiction",
            ConnectionType::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "problem_solution" => Some(ConnectionType::ProblemSolution),
            "goal_steps" => Some(ConnectionType::GoalSteps),
            "cause_effect" => Some(ConnectionType::CauseEffect),
            "contradiction" => Some(ConnectionType::Contradiction),
            "other" => Some(ConnectionType::Other),
            _ => None,
        }
    }
}

/// Stored connection row, one per discovered pair (no reverse duplicate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRow {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub thought1_id: ThoughtId,
    pub thought2_id: ThoughtId,
    pub title: Option<String>,
    pub description: String,
    pub connection_type: Option<ConnectionType>,
    pub is_dismissed: bool,
    pub created_at: String, // RFC3339
}

/// Row to insert; the store assigns id, owner and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConnection {
    pub thought1_id: ThoughtId,
    pub thought2_id: ThoughtId,
    pub title: Option<String>,
    pub description: String,
    pub connection_type: Option<ConnectionType>,
}

/// Display data for one endpoint of a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThoughtBrief {
    pub title: String,
    pub categories: Vec<String>,
    pub is_completed: bool,
}

/// A connection enriched with both endpoints, as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<ConnectionId>,
    pub thought1_id: ThoughtId,
    pub thought2_id: ThoughtId,
    pub thought1: ThoughtBrief,
    pub thought2: ThoughtBrief,
    pub title: Option<String>,
    pub description: String,
    /// Alias of `description` kept for older clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub connection_type: Option<ConnectionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_dismissed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Connection {
    pub fn to_new_connection(&self) -> NewConnection {
        NewConnection {
            thought1_id: self.thought1_id.clone(),
            thought2_id: self.thought2_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            connection_type: self.connection_type,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    pub user_id: UserId,
    pub last_full_analysis_at: Option<String>, // RFC3339
    pub thoughts_analyzed_count: u32,
    pub last_incremental_at: Option<String>, // RFC3339
    pub created_at: String,
    pub updated_at: String,
}

/// Partial metadata upsert; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetadataUpdate {
    pub last_full_analysis_at: Option<String>,
    pub thoughts_analyzed_count: Option<u32>,
    pub last_incremental_at: Option<String>,
}

// ============================================================================
// Model Chat Messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub cached: bool,
    pub last_updated: String, // RFC3339
    pub thoughts_analyzed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsResponse {
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnalysisMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error body; `connections` is only present on connection routes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateClusterRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: ThoughtStatus,
}

// ============================================================================
// Helper Functions
// ============================================================================

pub fn generate_user_id() -> UserId {
    UserId(format!("usr_{}", ulid::Ulid::new()))
}

pub fn generate_thought_id() -> ThoughtId {
    ThoughtId(format!("th_{}", ulid::Ulid::new()))
}

pub fn generate_category_id() -> CategoryId {
    CategoryId(format!("cat_{}", ulid::Ulid::new()))
}

pub fn generate_cluster_id() -> ClusterId {
    ClusterId(format!("clu_{}", ulid::Ulid::new()))
}

pub fn generate_connection_id() -> ConnectionId {
    ConnectionId(format!("conn_{}", ulid::Ulid::new()))
}
