use std::sync::atomic::{AtomicBool, Ordering};

use pigo_api::traits::HistorySink;

use crate::models::WatchHistoryEvent;

/// Records watch history at most once per playback session.
///
/// Write failures are logged and swallowed; they never reach the playback path.
#[derive(Debug, Default)]
pub struct WatchHistoryRecorder {
    recorded: AtomicBool,
}

impl WatchHistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the write unless one was already attempted.
    ///
    /// Returns `true` if this call made the attempt, whatever its result.
    pub async fn record_once<H: HistorySink>(&self, sink: &H, event: &WatchHistoryEvent) -> bool {
        if self.recorded.swap(true, Ordering::SeqCst) {
            return false;
        }
        match sink.record(event).await {
            Ok(()) => tracing::info!(
                media_id = event.media_id,
                kind = %event.kind,
                "watch history recorded"
            ),
            Err(e) => tracing::warn!(
                media_id = event.media_id,
                error = %e,
                "failed to record watch history"
            ),
        }
        true
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::SeqCst)
    }

    /// Start a new session (e.g. a different episode).
    pub fn reset(&self) {
        self.recorded.store(false, Ordering::SeqCst);
    }
}
