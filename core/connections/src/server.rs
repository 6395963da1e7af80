use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thoughtmap_schemas::{
    ClusterId, ClusterUpdate, ConnectionId, ConnectionsResponse, CreateClusterRequest, ThoughtId,
    ThoughtStatus, UpdateStatusRequest, UserId,
};
use thoughtmap_store::{ClusterOrganizer, Database};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::AuthUser;
use crate::cache_gate::get_connections;
use crate::config::DiscoveryConfig;
use crate::discovery::ConnectionDiscovery;
use crate::error::{ConnectionRouteError, ConnectionsError, Result};
use crate::llm_providers::ChatModel;
use crate::store::{ConnectionStore, SqliteConnectionStore};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub store: Arc<dyn ConnectionStore>,
    pub model: Arc<dyn ChatModel>,
    pub discovery: Arc<ConnectionDiscovery>,
    pub organizer: Arc<ClusterOrganizer>,
}

impl AppState {
    pub fn new(db: Database, model: Arc<dyn ChatModel>, config: DiscoveryConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        Self {
            store: Arc::new(SqliteConnectionStore::new(db.clone())),
            db,
            model,
            discovery: Arc::new(ConnectionDiscovery::new(config)),
            organizer: Arc::new(ClusterOrganizer::new()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        // Connections
        .route("/functions/v1/find-connections", post(find_connections))
        .route("/v1/connections", get(list_connections))
        .route("/v1/connections/:id/dismiss", post(dismiss_connection))
        // Clusters
        .route("/v1/clusters", get(list_clusters).post(create_cluster))
        .route("/v1/clusters/:id", patch(update_cluster).delete(delete_cluster))
        .route("/v1/clusters/:id/archive", post(archive_cluster))
        .route("/v1/clusters/:id/completion", get(cluster_completion))
        .route(
            "/v1/clusters/:id/thoughts/:thought_id",
            post(add_thought_to_cluster).delete(remove_thought_from_cluster),
        )
        // Thoughts
        .route("/v1/thoughts", get(list_thoughts))
        .route("/v1/thoughts/unclustered", get(unclustered_thoughts))
        .route("/v1/thoughts/:id/status", patch(update_thought_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "service": "connections",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ========== CONNECTIONS ==========

type RouteResult<T> = std::result::Result<T, ConnectionRouteError>;

/// Always runs a full analysis; the request body is ignored.
async fn find_connections(
    State(state): State<AppState>,
    auth: Result<AuthUser>,
) -> RouteResult<Json<ConnectionsResponse>> {
    let AuthUser(user) = auth?;
    let outcome = state
        .discovery
        .discover(state.store.as_ref(), state.model.as_ref(), &user, Utc::now())
        .await?;

    Ok(Json(outcome.into_response()))
}

#[derive(Debug, Deserialize)]
struct ConnectionsQuery {
    #[serde(default)]
    force_refresh: bool,
}

async fn list_connections(
    State(state): State<AppState>,
    auth: Result<AuthUser>,
    Query(query): Query<ConnectionsQuery>,
) -> RouteResult<Json<ConnectionsResponse>> {
    let AuthUser(user) = auth?;
    let result = get_connections(
        &state.discovery,
        state.store.as_ref(),
        state.model.as_ref(),
        &user,
        query.force_refresh,
        Utc::now(),
    )
    .await?;

    Ok(Json(result.into_response()))
}

async fn dismiss_connection(
    State(state): State<AppState>,
    auth: Result<AuthUser>,
    Path(id): Path<String>,
) -> RouteResult<impl IntoResponse> {
    let AuthUser(user) = auth?;
    let db = state.db.lock().await;
    if !db.dismiss_connection(&user, &ConnectionId(id))? {
        return Err(ConnectionsError::NotFound("Connection not found".into()).into());
    }
    Ok(Json(json!({ "success": true })))
}

// ========== CLUSTERS ==========

async fn list_clusters(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    let db = state.db.lock().await;
    let clusters = state.organizer.list_clusters(&db, &user)?;
    Ok(Json(clusters))
}

async fn create_cluster(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateClusterRequest>,
) -> Result<impl IntoResponse> {
    let db = state.db.lock().await;
    let cluster = state.organizer.create_manual_cluster(&db, &user, &req.name)?;
    Ok((StatusCode::CREATED, Json(cluster)))
}

async fn update_cluster(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(update): Json<ClusterUpdate>,
) -> Result<impl IntoResponse> {
    if update.name.is_none() && update.is_collapsed.is_none() {
        return Err(ConnectionsError::InvalidInput("Nothing to update".into()));
    }

    let cluster_id = ClusterId(id);
    let db = state.db.lock().await;

    if let Some(name) = &update.name {
        state.organizer.rename_cluster(&db, &user, &cluster_id, name)?;
    }
    if let Some(is_collapsed) = update.is_collapsed {
        state.organizer.set_collapsed(&db, &user, &cluster_id, is_collapsed)?;
    }

    let cluster = db
        .get_cluster(&user, &cluster_id)?
        .ok_or_else(|| ConnectionsError::NotFound(format!("Cluster not found: {}", cluster_id)))?;
    Ok(Json(cluster))
}

async fn delete_cluster(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let db = state.db.lock().await;
    state.organizer.delete_cluster(&db, &user, &ClusterId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn archive_cluster(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let db = state.db.lock().await;
    let archived = state.organizer.archive_cluster(&db, &user, &ClusterId(id))?;
    Ok(Json(json!({ "archived": archived })))
}

async fn cluster_completion(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let db = state.db.lock().await;
    let completion = state.organizer.cluster_completion(&db, &user, &ClusterId(id))?;
    Ok(Json(completion))
}

fn require_thought(db: &Database, user: &UserId, id: &ThoughtId) -> Result<()> {
    match db.get_thought(id)? {
        Some(thought) if &thought.user_id == user => Ok(()),
        _ => Err(ConnectionsError::NotFound(format!("Thought not found: {}", id))),
    }
}

async fn add_thought_to_cluster(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, thought_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let thought_id = ThoughtId(thought_id);
    let db = state.db.lock().await;
    require_thought(&db, &user, &thought_id)?;
    state
        .organizer
        .add_thought(&db, &user, &ClusterId(id), &thought_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_thought_from_cluster(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((id, thought_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let db = state.db.lock().await;
    let removed = state
        .organizer
        .remove_thought(&db, &user, &ClusterId(id), &ThoughtId(thought_id))?;

    if !removed {
        return Err(ConnectionsError::NotFound(
            "Thought is not in this cluster".into(),
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ========== THOUGHTS ==========

#[derive(Debug, Deserialize)]
struct ThoughtsQuery {
    status: Option<String>,
}

async fn list_thoughts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<ThoughtsQuery>,
) -> Result<impl IntoResponse> {
    let status = match query.status.as_deref() {
        None => ThoughtStatus::Active,
        Some(raw) => ThoughtStatus::parse(raw)
            .ok_or_else(|| ConnectionsError::InvalidInput(format!("Unknown status: {}", raw)))?,
    };

    let db = state.db.lock().await;
    let thoughts = db.fetch_thoughts_with_categories(&user, status)?;
    Ok(Json(thoughts))
}

async fn unclustered_thoughts(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<impl IntoResponse> {
    let db = state.db.lock().await;
    let thoughts = state.organizer.unclustered_thoughts(&db, &user)?;
    Ok(Json(json!({
        "count": thoughts.len(),
        "thoughts": thoughts,
    })))
}

async fn update_thought_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse> {
    let thought_id = ThoughtId(id);
    let db = state.db.lock().await;

    if !db.update_thought_status(&user, &thought_id, req.status)? {
        return Err(ConnectionsError::NotFound(format!(
            "Thought not found: {}",
            thought_id
        )));
    }

    info!("Thought {} is now {}", thought_id, req.status.as_str());
    Ok(Json(json!({ "id": thought_id, "status": req.status })))
}
