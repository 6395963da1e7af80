use chrono::{DateTime, Utc};
use thoughtmap_schemas::{AnalysisMetadata, Connection, ConnectionsResponse, NewConnection, UserId};
use tracing::{debug, error, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::{ConnectionsError, Result};
use crate::llm_providers::ChatModel;
use crate::prompts::{analysis_messages, summarize, ThoughtSummary};
use crate::reconcile::{parse_model_response, reconcile};
use crate::store::ConnectionStore;

/// What happened to the write-back after connections were computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStatus {
    /// Nothing to save (too few thoughts)
    NotAttempted,
    Saved,
    Incomplete {
        metadata_saved: bool,
        connections_saved: bool,
    },
}

impl PersistenceStatus {
    pub fn is_saved(&self) -> bool {
        matches!(self, PersistenceStatus::Saved)
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub connections: Vec<Connection>,
    /// `None` when the run stopped before calling the model
    pub metadata: Option<AnalysisMetadata>,
    pub message: Option<String>,
    pub persistence: PersistenceStatus,
}

impl DiscoveryOutcome {
    fn insufficient(min_thoughts: usize) -> Self {
        Self {
            connections: Vec::new(),
            metadata: None,
            message: Some(format!(
                "Need at least {} thoughts to find connections",
                min_thoughts
            )),
            persistence: PersistenceStatus::NotAttempted,
        }
    }

    pub fn into_response(self) -> ConnectionsResponse {
        ConnectionsResponse {
            connections: self.connections,
            metadata: self.metadata,
            message: self.message,
        }
    }
}

/// Full analysis of a user's active thoughts: prompt, model call,
/// reconciliation and replacement of the stored connection set.
pub struct ConnectionDiscovery {
    config: DiscoveryConfig,
}

impl ConnectionDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Run a full analysis. Model and read failures are errors; write-back
    /// failures are only reported in the outcome's `persistence`.
    pub async fn discover(
        &self,
        store: &dyn ConnectionStore,
        model: &dyn ChatModel,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<DiscoveryOutcome> {
        let candidates = store
            .fetch_candidate_thoughts(user_id, self.config.candidate_limit)
            .await
            .map_err(ConnectionsError::Storage)?;

        info!("Found {} active thoughts for {}", candidates.len(), user_id);

        if candidates.len() < self.config.min_thoughts {
            return Ok(DiscoveryOutcome::insufficient(self.config.min_thoughts));
        }

        let summaries: Vec<ThoughtSummary> = candidates
            .iter()
            .take(self.config.prompt_limit)
            .map(|t| summarize(t, self.config.snippet_fallback_chars))
            .collect();

        debug!("Calling model with {} thought summaries", summaries.len());
        let response = model.complete_json(&analysis_messages(&summaries)).await?;

        let proposals = parse_model_response(&response)?;
        let connections = reconcile(&proposals, &summaries, self.config.max_connections);

        if connections.len() < proposals.len() {
            warn!(
                "Kept {} of {} proposed connections",
                connections.len(),
                proposals.len()
            );
        }
        info!("Found {} connections", connections.len());

        let thoughts_analyzed = candidates.len() as u32;
        let persistence = self
            .persist(store, user_id, &connections, thoughts_analyzed, now)
            .await;

        Ok(DiscoveryOutcome {
            connections,
            metadata: Some(AnalysisMetadata {
                cached: false,
                last_updated: now.to_rfc3339(),
                thoughts_analyzed,
            }),
            message: None,
            persistence,
        })
    }

    /// Metadata first, then delete-and-insert. Every failure is logged and
    /// recorded; none aborts the run.
    async fn persist(
        &self,
        store: &dyn ConnectionStore,
        user_id: &UserId,
        connections: &[Connection],
        thoughts_analyzed: u32,
        now: DateTime<Utc>,
    ) -> PersistenceStatus {
        let metadata_saved = match store
            .upsert_analysis_metadata(user_id, now, thoughts_analyzed)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to update connection metadata for {}: {:#}", user_id, e);
                false
            }
        };

        let deleted = match store.delete_connections(user_id).await {
            Ok(count) => {
                debug!("Deleted {} old connections", count);
                true
            }
            Err(e) => {
                error!("Failed to delete old connections for {}: {:#}", user_id, e);
                false
            }
        };

        let inserted = if connections.is_empty() {
            true
        } else {
            let rows: Vec<NewConnection> = connections.iter().map(Connection::to_new_connection).collect();
            match store.insert_connections(user_id, &rows).await {
                Ok(count) => {
                    debug!("Saved {} connections", count);
                    true
                }
                Err(e) => {
                    error!("Failed to save connections for {}: {:#}", user_id, e);
                    false
                }
            }
        };

        let connections_saved = deleted && inserted;
        if metadata_saved && connections_saved {
            PersistenceStatus::Saved
        } else {
            PersistenceStatus::Incomplete {
                metadata_saved,
                connections_saved,
            }
        }
    }
}

impl Default for ConnectionDiscovery {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}
