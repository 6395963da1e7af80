use chrono::{DateTime, Duration, Utc};
use thoughtmap_schemas::{AnalysisMetadata, ConnectionMetadata, ConnectionsResponse, UserId};
use tracing::{debug, info};

use crate::discovery::{ConnectionDiscovery, DiscoveryOutcome};
use crate::error::{ConnectionsError, Result};
use crate::llm_providers::ChatModel;
use crate::store::ConnectionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    NoAnalysis,
    Fresh,
    Stale,
}

/// Classify stored metadata against the freshness window.
/// A timestamp that doesn't parse counts as stale.
pub fn freshness(
    metadata: Option<&ConnectionMetadata>,
    now: DateTime<Utc>,
    window_minutes: i64,
) -> Freshness {
    let Some(raw) = metadata.and_then(|m| m.last_full_analysis_at.as_deref()) else {
        return Freshness::NoAnalysis;
    };

    let Ok(analyzed_at) = DateTime::parse_from_rfc3339(raw) else {
        debug!("Unparseable analysis timestamp {:?}", raw);
        return Freshness::Stale;
    };

    let age = now.signed_duration_since(analyzed_at.with_timezone(&Utc));
    if age < Duration::minutes(window_minutes) {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionsResult {
    Cached(ConnectionsResponse),
    Discovered(DiscoveryOutcome),
}

impl ConnectionsResult {
    pub fn is_cached(&self) -> bool {
        matches!(self, ConnectionsResult::Cached(_))
    }

    pub fn into_response(self) -> ConnectionsResponse {
        match self {
            ConnectionsResult::Cached(response) => response,
            ConnectionsResult::Discovered(outcome) => outcome.into_response(),
        }
    }
}

/// Serve stored connections while the last full analysis is fresh,
/// otherwise (or when forced) run discovery.
pub async fn get_connections(
    discovery: &ConnectionDiscovery,
    store: &dyn ConnectionStore,
    model: &dyn ChatModel,
    user_id: &UserId,
    force_refresh: bool,
    now: DateTime<Utc>,
) -> Result<ConnectionsResult> {
    if !force_refresh {
        let metadata = store
            .fetch_metadata(user_id)
            .await
            .map_err(ConnectionsError::Storage)?;

        let window = discovery.config().freshness_window_minutes;
        let fresh = metadata.filter(|m| freshness(Some(m), now, window) == Freshness::Fresh);
        if let Some(metadata) = fresh {
            let connections = store
                .load_connections(user_id)
                .await
                .map_err(ConnectionsError::Storage)?;

            info!(
                "Serving {} cached connections for {}",
                connections.len(),
                user_id
            );

            return Ok(ConnectionsResult::Cached(ConnectionsResponse {
                connections,
                metadata: Some(AnalysisMetadata {
                    cached: true,
                    last_updated: metadata.last_full_analysis_at.unwrap_or_default(),
                    thoughts_analyzed: metadata.thoughts_analyzed_count,
                }),
                message: None,
            }));
        }

        info!("No fresh analysis for {}, running discovery", user_id);
    } else {
        info!("Forced refresh for {}", user_id);
    }

    let outcome = discovery.discover(store, model, user_id, now).await?;
    Ok(ConnectionsResult::Discovered(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(at: Option<String>) -> ConnectionMetadata {
        ConnectionMetadata {
            user_id: UserId("usr_test".into()),
            last_full_analysis_at: at,
            thoughts_analyzed_count: 4,
            last_incremental_at: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_missing_metadata_is_no_analysis() {
        let now = Utc::now();
        assert_eq!(freshness(None, now, 120), Freshness::NoAnalysis);
        assert_eq!(freshness(Some(&metadata(None)), now, 120), Freshness::NoAnalysis);
    }

    #[test]
    fn test_window_boundaries() {
        let now = Utc::now();
        let at = |minutes: i64| metadata(Some((now - Duration::minutes(minutes)).to_rfc3339()));

        assert_eq!(freshness(Some(&at(90)), now, 120), Freshness::Fresh);
        assert_eq!(freshness(Some(&at(119)), now, 120), Freshness::Fresh);
        assert_eq!(freshness(Some(&at(120)), now, 120), Freshness::Stale);
        assert_eq!(freshness(Some(&at(150)), now, 120), Freshness::Stale);
    }

    #[test]
    fn test_garbage_timestamp_is_stale() {
        let now = Utc::now();
        assert_eq!(
            freshness(Some(&metadata(Some("yesterday".into()))), now, 120),
            Freshness::Stale
        );
    }
}
