use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thoughtmap_connections::{
    get_connections, ChatModel, ConnectionDiscovery, ConnectionStore, ConnectionsError,
    ModelError, PersistenceStatus,
};
use thoughtmap_schemas::{
    Category, CategoryId, Connection, ConnectionMetadata, Message, NewConnection, Thought,
    ThoughtBrief, ThoughtId, ThoughtStatus, ThoughtWithCategories, UserId,
};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct StoreState {
    thoughts: Vec<ThoughtWithCategories>,
    metadata: Option<ConnectionMetadata>,
    connections: Vec<NewConnection>,
    metadata_writes: usize,
}

#[derive(Default)]
struct FakeStore {
    state: Mutex<StoreState>,
    fail_writes: bool,
}

impl FakeStore {
    fn with_thoughts(count: usize) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().thoughts = (0..count).map(thought).collect();
        store
    }

    fn failing_writes(count: usize) -> Self {
        let mut store = Self::with_thoughts(count);
        store.fail_writes = true;
        store
    }

    fn analyzed_at(&self, at: DateTime<Utc>, count: u32) {
        self.state.lock().unwrap().metadata = Some(ConnectionMetadata {
            user_id: user(),
            last_full_analysis_at: Some(at.to_rfc3339()),
            thoughts_analyzed_count: count,
            last_incremental_at: None,
            created_at: at.to_rfc3339(),
            updated_at: at.to_rfc3339(),
        });
    }

    fn store_connection(&self, a: usize, b: usize, reason: &str) {
        self.state.lock().unwrap().connections.push(NewConnection {
            thought1_id: thought_id(a),
            thought2_id: thought_id(b),
            title: None,
            description: reason.into(),
            connection_type: None,
        });
    }

    fn brief(state: &StoreState, id: &ThoughtId) -> ThoughtBrief {
        state
            .thoughts
            .iter()
            .find(|t| &t.thought.id == id)
            .map(|t| ThoughtBrief {
                title: t.thought.title.clone(),
                categories: t.category_names(),
                is_completed: t.thought.is_completed,
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionStore for FakeStore {
    async fn fetch_candidate_thoughts(
        &self,
        _user_id: &UserId,
        limit: usize,
    ) -> Result<Vec<ThoughtWithCategories>> {
        let state = self.state.lock().unwrap();
        Ok(state.thoughts.iter().take(limit).cloned().collect())
    }

    async fn fetch_metadata(&self, _user_id: &UserId) -> Result<Option<ConnectionMetadata>> {
        Ok(self.state.lock().unwrap().metadata.clone())
    }

    async fn load_connections(&self, _user_id: &UserId) -> Result<Vec<Connection>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .connections
            .iter()
            .map(|c| Connection {
                id: None,
                thought1_id: c.thought1_id.clone(),
                thought2_id: c.thought2_id.clone(),
                thought1: Self::brief(&state, &c.thought1_id),
                thought2: Self::brief(&state, &c.thought2_id),
                title: c.title.clone(),
                description: c.description.clone(),
                reason: Some(c.description.clone()),
                connection_type: c.connection_type,
                is_dismissed: Some(false),
                created_at: None,
            })
            .collect())
    }

    async fn upsert_analysis_metadata(
        &self,
        user_id: &UserId,
        analyzed_at: DateTime<Utc>,
        thoughts_analyzed: u32,
    ) -> Result<()> {
        if self.fail_writes {
            bail!("metadata table unavailable");
        }
        let mut state = self.state.lock().unwrap();
        state.metadata_writes += 1;
        state.metadata = Some(ConnectionMetadata {
            user_id: user_id.clone(),
            last_full_analysis_at: Some(analyzed_at.to_rfc3339()),
            thoughts_analyzed_count: thoughts_analyzed,
            last_incremental_at: None,
            created_at: analyzed_at.to_rfc3339(),
            updated_at: analyzed_at.to_rfc3339(),
        });
        Ok(())
    }

    async fn delete_connections(&self, _user_id: &UserId) -> Result<usize> {
        if self.fail_writes {
            bail!("connections table unavailable");
        }
        let mut state = self.state.lock().unwrap();
        let deleted = state.connections.len();
        state.connections.clear();
        Ok(deleted)
    }

    async fn insert_connections(&self, _user_id: &UserId, rows: &[NewConnection]) -> Result<usize> {
        if self.fail_writes {
            bail!("connections table unavailable");
        }
        self.state.lock().unwrap().connections.extend_from_slice(rows);
        Ok(rows.len())
    }
}

enum Reply {
    Json(Value),
    MissingKey,
}

struct FakeModel {
    reply: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl FakeModel {
    fn replying(value: Value) -> Self {
        Self {
            reply: Reply::Json(value),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn pairs(pairs: &[(i64, i64)]) -> Self {
        let connections: Vec<Value> = pairs
            .iter()
            .map(|(a, b)| {
                json!({
                    "thought1_index": a,
                    "thought2_index": b,
                    "reason": format!("{} and {} share a theme", a, b)
                })
            })
            .collect();
        Self::replying(json!({ "connections": connections }))
    }

    fn without_key() -> Self {
        Self {
            reply: Reply::MissingKey,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    async fn complete_json(&self, messages: &[Message]) -> Result<Value, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        match &self.reply {
            Reply::Json(value) => Ok(value.clone()),
            Reply::MissingKey => Err(ModelError::MissingCredentials("GEMINI_API_KEY".into())),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn user() -> UserId {
    UserId("usr_scenario".into())
}

fn thought_id(i: usize) -> ThoughtId {
    ThoughtId(format!("th_{:02}", i))
}

/// Thought `i` of a newest-first candidate list
fn thought(i: usize) -> ThoughtWithCategories {
    ThoughtWithCategories {
        thought: Thought {
            id: thought_id(i),
            user_id: user(),
            title: format!("Thought {}", i),
            snippet: Some(format!("snippet {}", i)),
            content: format!("content of thought {}", i),
            is_completed: i % 3 == 0,
            status: ThoughtStatus::Active,
            created_at: "2024-06-01T12:00:00+00:00".into(),
            updated_at: "2024-06-01T12:00:00+00:00".into(),
        },
        categories: vec![Category {
            id: CategoryId(format!("cat_{}", i % 4)),
            name: format!("category {}", i % 4),
        }],
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_single_thought_needs_more_data() {
    let store = FakeStore::with_thoughts(1);
    let model = FakeModel::pairs(&[(0, 1)]);
    let discovery = ConnectionDiscovery::default();

    let outcome = discovery
        .discover(&store, &model, &user(), Utc::now())
        .await
        .unwrap();

    assert!(outcome.connections.is_empty());
    assert_eq!(
        outcome.message.as_deref(),
        Some("Need at least 2 thoughts to find connections")
    );
    assert_eq!(outcome.persistence, PersistenceStatus::NotAttempted);
    assert_eq!(model.calls(), 0);
    assert!(store.state.lock().unwrap().metadata.is_none());
}

#[tokio::test]
async fn test_insufficient_data_wins_over_missing_key() {
    let store = FakeStore::with_thoughts(1);
    let model = FakeModel::without_key();

    let outcome = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), Utc::now())
        .await
        .unwrap();
    assert!(outcome.message.is_some());

    let store = FakeStore::with_thoughts(3);
    let err = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectionsError::Configuration(_)));
    assert_eq!(err.to_string(), "GEMINI_API_KEY not configured");
    assert!(store.state.lock().unwrap().metadata.is_none());
}

#[tokio::test]
async fn test_out_of_range_pair_from_truncated_list_is_dropped() {
    let store = FakeStore::with_thoughts(25);
    let model = FakeModel::pairs(&[(0, 3), (19, 25)]);
    let now = Utc::now();

    let outcome = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), now)
        .await
        .unwrap();

    assert_eq!(outcome.connections.len(), 1);
    let conn = &outcome.connections[0];
    assert_eq!(conn.thought1_id, thought_id(0));
    assert_eq!(conn.thought2_id, thought_id(3));
    assert!(conn.thought1.is_completed);
    assert!(conn.thought2.is_completed);
    assert_eq!(conn.thought1.categories, vec!["category 0".to_string()]);

    let metadata = outcome.metadata.unwrap();
    assert!(!metadata.cached);
    assert_eq!(metadata.thoughts_analyzed, 25);
    assert_eq!(outcome.persistence, PersistenceStatus::Saved);

    // Only the first 20 candidates reach the prompt
    let prompts = model.prompts.lock().unwrap();
    let prompt = &prompts[0][1].content;
    assert!(prompt.contains("20. \"Thought 19\""));
    assert!(!prompt.contains("21. "));

    let state = store.state.lock().unwrap();
    assert_eq!(state.connections.len(), 1);
    assert_eq!(state.metadata.as_ref().unwrap().thoughts_analyzed_count, 25);
}

#[tokio::test]
async fn test_fresh_analysis_is_served_from_cache() {
    let now = Utc::now();
    let analyzed_at = now - Duration::minutes(90);
    let store = FakeStore::with_thoughts(5);
    store.analyzed_at(analyzed_at, 5);
    store.store_connection(1, 4, "stored reason");
    let model = FakeModel::pairs(&[(0, 2)]);

    let result = get_connections(
        &ConnectionDiscovery::default(),
        &store,
        &model,
        &user(),
        false,
        now,
    )
    .await
    .unwrap();

    assert!(result.is_cached());
    assert_eq!(model.calls(), 0);

    let response = result.into_response();
    assert_eq!(response.connections.len(), 1);
    assert_eq!(response.connections[0].description, "stored reason");
    assert_eq!(response.connections[0].thought1.title, "Thought 1");

    let metadata = response.metadata.unwrap();
    assert!(metadata.cached);
    assert_eq!(metadata.last_updated, analyzed_at.to_rfc3339());
    assert_eq!(metadata.thoughts_analyzed, 5);
    assert_eq!(store.state.lock().unwrap().metadata_writes, 0);
}

#[tokio::test]
async fn test_stale_analysis_reruns_and_replaces() {
    let now = Utc::now();
    let store = FakeStore::with_thoughts(6);
    store.analyzed_at(now - Duration::minutes(150), 6);
    store.store_connection(1, 4, "old reason");
    let model = FakeModel::pairs(&[(0, 2), (3, 5)]);

    let result = get_connections(
        &ConnectionDiscovery::default(),
        &store,
        &model,
        &user(),
        false,
        now,
    )
    .await
    .unwrap();

    assert!(!result.is_cached());
    assert_eq!(model.calls(), 1);

    let state = store.state.lock().unwrap();
    let stored: Vec<_> = state
        .connections
        .iter()
        .map(|c| (c.thought1_id.clone(), c.thought2_id.clone()))
        .collect();
    assert_eq!(
        stored,
        vec![(thought_id(0), thought_id(2)), (thought_id(3), thought_id(5))]
    );
    assert!(state.connections.iter().all(|c| c.description != "old reason"));
    assert_eq!(
        state.metadata.as_ref().unwrap().last_full_analysis_at,
        Some(now.to_rfc3339())
    );
}

#[tokio::test]
async fn test_no_metadata_and_forced_refresh_run_discovery() {
    let now = Utc::now();
    let model = FakeModel::pairs(&[(0, 1)]);

    let store = FakeStore::with_thoughts(2);
    let result = get_connections(&ConnectionDiscovery::default(), &store, &model, &user(), false, now)
        .await
        .unwrap();
    assert!(!result.is_cached());

    let store = FakeStore::with_thoughts(2);
    store.analyzed_at(now - Duration::minutes(5), 2);
    let result = get_connections(&ConnectionDiscovery::default(), &store, &model, &user(), true, now)
        .await
        .unwrap();
    assert!(!result.is_cached());
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_results_are_capped_in_model_order() {
    let store = FakeStore::with_thoughts(20);
    let pairs: Vec<(i64, i64)> = (1..16).map(|i| (0, i)).collect();
    let model = FakeModel::pairs(&pairs);

    let outcome = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome.connections.len(), 10);
    let seconds: Vec<_> = outcome.connections.iter().map(|c| c.thought2_id.clone()).collect();
    let expected: Vec<_> = (1..=10).map(thought_id).collect();
    assert_eq!(seconds, expected);
}

#[tokio::test]
async fn test_zero_results_still_record_the_analysis() {
    let now = Utc::now();
    let store = FakeStore::with_thoughts(4);
    store.store_connection(0, 1, "previous run");
    let model = FakeModel::replying(json!({ "connections": [] }));

    let outcome = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), now)
        .await
        .unwrap();

    assert!(outcome.connections.is_empty());
    assert_eq!(outcome.persistence, PersistenceStatus::Saved);

    let state = store.state.lock().unwrap();
    assert!(state.connections.is_empty());
    let metadata = state.metadata.as_ref().unwrap();
    assert_eq!(metadata.thoughts_analyzed_count, 4);
    assert_eq!(metadata.last_full_analysis_at, Some(now.to_rfc3339()));
}

#[tokio::test]
async fn test_write_failures_do_not_change_the_result() {
    let store = FakeStore::failing_writes(3);
    let model = FakeModel::pairs(&[(0, 1), (1, 2)]);

    let outcome = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), Utc::now())
        .await
        .unwrap();

    assert_eq!(outcome.connections.len(), 2);
    assert_eq!(
        outcome.persistence,
        PersistenceStatus::Incomplete {
            metadata_saved: false,
            connections_saved: false,
        }
    );
    assert_eq!(outcome.metadata.unwrap().thoughts_analyzed, 3);
}

#[tokio::test]
async fn test_malformed_response_is_an_upstream_error() {
    let store = FakeStore::with_thoughts(3);
    let model = FakeModel::replying(json!({ "pairs": [[0, 1]] }));

    let err = ConnectionDiscovery::default()
        .discover(&store, &model, &user(), Utc::now())
        .await
        .unwrap_err();

    assert!(matches!(err, ConnectionsError::UpstreamModel(_)));
    assert_eq!(err.status_code().as_u16(), 500);
    assert!(store.state.lock().unwrap().metadata.is_none());
}
