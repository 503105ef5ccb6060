use std::sync::Arc;

use pigo_api::traits::StreamBackend;
use pigo_api::RetryPolicy;

use crate::error::PigoError;
use crate::models::{CandidateServer, MediaIdentity};

/// Lists candidate servers for a media identity.
pub struct ServerDirectory<B> {
    backend: Arc<B>,
    retry: RetryPolicy,
}

impl<B: StreamBackend> ServerDirectory<B> {
    pub fn new(backend: Arc<B>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Fetch the server list. An empty list is a valid answer, not an error.
    pub async fn list(
        &self,
        identity: &MediaIdentity,
        season: Option<u32>,
        episode: Option<u32>,
    ) -> Result<Vec<CandidateServer>, PigoError> {
        let query = identity.server_query(season, episode);
        let servers = self
            .retry
            .run("ListServers", || self.backend.list_servers(&query))
            .await
            .map_err(|e| PigoError::Backend(e.to_string()))?;

        if servers.is_empty() {
            tracing::info!(id = identity.id, kind = %identity.kind, "no servers available");
        } else {
            tracing::debug!(id = identity.id, count = servers.len(), "servers listed");
        }
        Ok(servers)
    }
}

/// Default selection: the previously chosen server by name if it is still
/// offered, otherwise the first entry.
pub fn select_default<'a>(
    servers: &'a [CandidateServer],
    preferred: Option<&str>,
) -> Option<&'a CandidateServer> {
    preferred
        .and_then(|name| servers.iter().find(|s| s.name == name))
        .or_else(|| servers.first())
}
