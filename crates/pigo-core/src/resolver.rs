use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use pigo_api::traits::StreamBackend;
use pigo_api::RetryPolicy;

use crate::error::PigoError;
use crate::models::{CandidateServer, StreamDescriptor};

/// Outcome of a resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This call belongs to the latest selection; its descriptor is current.
    Current(StreamDescriptor),
    /// A newer selection (or a cancel) arrived while this call was in flight.
    Superseded,
}

/// Resolves a selected server into a playable stream descriptor.
///
/// Each call takes a ticket from a generation counter. A result is only
/// published if its ticket is still the newest when the network call returns,
/// so the stored descriptor always reflects the last selection.
pub struct StreamResolver<B> {
    backend: Arc<B>,
    retry: RetryPolicy,
    generation: AtomicU64,
    current: Mutex<Option<StreamDescriptor>>,
}

impl<B: StreamBackend> StreamResolver<B> {
    pub fn new(backend: Arc<B>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    pub async fn resolve(&self, server: &CandidateServer) -> Result<Resolution, PigoError> {
        // A new selection retires the previous stream even if it never resolves.
        let ticket = {
            let mut current = self.lock_current();
            current.take();
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        tracing::debug!(server = %server.name, ticket, "resolving stream");

        let result = self
            .retry
            .run("FetchStream", || self.backend.fetch_stream(server))
            .await;

        // Check and publish under one lock so a newer ticket cannot slip in between.
        let mut current = self.lock_current();
        if self.generation.load(Ordering::SeqCst) != ticket {
            tracing::debug!(server = %server.name, ticket, "stale resolution discarded");
            return Ok(Resolution::Superseded);
        }

        let descriptor = result.map_err(|e| PigoError::Backend(e.to_string()))?;
        tracing::info!(
            server = %server.name,
            hls = descriptor.is_hls(),
            "stream resolved"
        );
        *current = Some(descriptor.clone());
        Ok(Resolution::Current(descriptor))
    }

    /// Invalidate any in-flight resolution and forget the current descriptor.
    pub fn cancel(&self) {
        let mut current = self.lock_current();
        self.generation.fetch_add(1, Ordering::SeqCst);
        current.take();
    }

    /// Descriptor of the most recent selection, if it has resolved.
    pub fn current(&self) -> Option<StreamDescriptor> {
        self.lock_current().clone()
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<StreamDescriptor>> {
        // Only plain assignments happen under the lock, so a poisoned value is still whole.
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
