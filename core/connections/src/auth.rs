use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use thoughtmap_schemas::UserId;
use thoughtmap_store::Database;
use tracing::debug;

use crate::error::{ConnectionsError, Result};
use crate::server::AppState;

/// Caller identity resolved from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

/// Pull the token out of `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ConnectionsError::Authentication("No authorization header".into()))?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ConnectionsError::Authentication("User not authenticated".into()))
}

pub fn resolve_user(db: &Database, headers: &HeaderMap) -> Result<UserId> {
    let token = bearer_token(headers)?;
    db.resolve_api_token(token)?.ok_or_else(|| {
        debug!("Rejected unknown bearer token");
        ConnectionsError::Authentication("User not authenticated".into())
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ConnectionsError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let db = state.db.lock().await;
        resolve_user(&db, &parts.headers).map(AuthUser)
    }
}
