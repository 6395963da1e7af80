pub mod auth;
pub mod cache_gate;
pub mod config;
pub mod discovery;
pub mod error;
pub mod llm_providers;
pub mod prompts;
pub mod reconcile;
pub mod server;
pub mod store;

pub use cache_gate::{freshness, get_connections, ConnectionsResult, Freshness};
pub use config::{DiscoveryConfig, LLMConfig, LLMProviderKind, ServiceConfig};
pub use discovery::{ConnectionDiscovery, DiscoveryOutcome, PersistenceStatus};
pub use error::{ConnectionsError, ModelError};
pub use llm_providers::{ChatModel, GeminiProvider, OpenAIProvider};
pub use server::{router, AppState};
pub use store::{ConnectionStore, SqliteConnectionStore};
