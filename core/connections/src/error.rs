use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use thoughtmap_schemas::{Connection, ErrorResponse};
use thoughtmap_store::OrganizerError;

/// Failures of the model collaborator.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{0} not configured")]
    MissingCredentials(String),

    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("Model API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Transport(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConnectionsError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    UpstreamModel(String),

    #[error("{0}")]
    Storage(anyhow::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, ConnectionsError>;

impl ConnectionsError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConnectionsError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ConnectionsError::NotFound(_) => StatusCode::NOT_FOUND,
            ConnectionsError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ConnectionsError::Configuration(_)
            | ConnectionsError::UpstreamModel(_)
            | ConnectionsError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ModelError> for ConnectionsError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::MissingCredentials(_) => ConnectionsError::Configuration(err.to_string()),
            other => ConnectionsError::UpstreamModel(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ConnectionsError {
    fn from(err: anyhow::Error) -> Self {
        ConnectionsError::Storage(err)
    }
}

impl From<OrganizerError> for ConnectionsError {
    fn from(err: OrganizerError) -> Self {
        match err {
            OrganizerError::EmptyName => ConnectionsError::InvalidInput(err.to_string()),
            OrganizerError::ClusterNotFound(_) => ConnectionsError::NotFound(err.to_string()),
            OrganizerError::Storage(e) => ConnectionsError::Storage(e),
        }
    }
}

impl ConnectionsError {
    fn into_body(self, connections: Option<Vec<Connection>>) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            connections,
        };
        (self.status_code(), Json(body)).into_response()
    }
}

impl IntoResponse for ConnectionsError {
    fn into_response(self) -> Response {
        self.into_body(None)
    }
}

/// Error on a connection route; the body carries an empty `connections` list
/// so clients can always read that field.
#[derive(Debug)]
pub struct ConnectionRouteError(pub ConnectionsError);

impl From<ConnectionsError> for ConnectionRouteError {
    fn from(err: ConnectionsError) -> Self {
        ConnectionRouteError(err)
    }
}

impl From<anyhow::Error> for ConnectionRouteError {
    fn from(err: anyhow::Error) -> Self {
        ConnectionRouteError(ConnectionsError::Storage(err))
    }
}

impl IntoResponse for ConnectionRouteError {
    fn into_response(self) -> Response {
        self.0.into_body(Some(Vec::new()))
    }
}
