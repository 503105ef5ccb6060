//! Handing playback off to the companion app through a custom URI scheme.
//!
//! An attempt moves `idle → launching → launched | redirecting`. After the
//! URI is opened, a visibility-loss signal and a fixed timer race; both feed
//! the same [`HandoffController::resolve`] transition, which only acts once.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use url::form_urlencoded;

use pigo_api::traits::HistorySink;

use crate::history::WatchHistoryRecorder;
use crate::models::WatchHistoryEvent;

// ── Platform ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Windows,
    MacOs,
    Linux,
    Other,
}

impl Platform {
    /// Best-effort platform detection from a browser user-agent string.
    pub fn from_user_agent(ua: &str) -> Self {
        let ua = ua.to_lowercase();
        // Android user agents also mention Linux.
        if ua.contains("android") {
            Self::Android
        } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
            Self::Ios
        } else if ua.contains("windows") {
            Self::Windows
        } else if ua.contains("mac os x") || ua.contains("macintosh") {
            Self::MacOs
        } else if ua.contains("linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }

    /// Platform this process is running on.
    pub fn current() -> Self {
        match std::env::consts::OS {
            "android" => Self::Android,
            "ios" => Self::Ios,
            "windows" => Self::Windows,
            "macos" => Self::MacOs,
            "linux" => Self::Linux,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Windows => "windows",
            Self::MacOs => "macos",
            Self::Linux => "linux",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            "windows" => Ok(Self::Windows),
            "macos" => Ok(Self::MacOs),
            "linux" => Ok(Self::Linux),
            "other" => Ok(Self::Other),
            _ => Err(UnknownPlatform(s.to_string())),
        }
    }
}

/// Whether a platform can host the companion app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapability {
    pub platform: Platform,
    pub companion_app: bool,
}

// ── Config ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffConfig {
    pub scheme: String,
    pub app_version: String,
    pub timeout: Duration,
    pub install_page: String,
    pub capable_platforms: Vec<Platform>,
}

impl HandoffConfig {
    pub fn capability(&self, platform: Platform) -> PlatformCapability {
        PlatformCapability {
            platform,
            companion_app: self.capable_platforms.contains(&platform),
        }
    }

    /// `<scheme>://open?url=<stream uri>&version=<app version>`
    pub fn launch_uri(&self, stream_uri: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("url", stream_uri)
            .append_pair("version", &self.app_version)
            .finish();
        format!("{}://open?{query}", self.scheme)
    }
}

// ── Host seam ───────────────────────────────────────────────────

/// The environment the controller drives: OS URI handling, the visibility
/// signal, and in-app navigation.
pub trait HandoffHost: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Ask the OS to handle a custom-scheme URI.
    fn open_uri(&self, uri: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Resolves when the page loses visibility (the OS switched apps).
    fn visibility_lost(&self) -> impl Future<Output = ()> + Send;

    /// Navigate to an in-app page.
    fn redirect(&self, page: &str);
}

// ── Controller ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffState {
    #[default]
    Idle,
    Launching,
    Launched,
    Redirecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffOutcome {
    /// Visibility was lost before the timeout; the app is assumed open.
    AppOpened,
    /// The timer won. The app is missing or just slow; either way we redirect.
    AppMissing,
    /// The platform cannot host the app; redirected without trying.
    UnsupportedPlatform,
}

#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("a handoff attempt is already in progress")]
    InProgress,
    #[error("failed to open companion app URI: {0}")]
    Launch(String),
}

#[derive(Debug, Default)]
struct Attempt {
    state: HandoffState,
    launched_at: Option<Instant>,
    resolved_after: Option<Duration>,
}

/// Drives one companion-app handoff attempt at a time.
pub struct HandoffController<H> {
    host: H,
    config: HandoffConfig,
    attempt: Mutex<Attempt>,
    recorder: WatchHistoryRecorder,
}

impl<H: HandoffHost> HandoffController<H> {
    pub fn new(host: H, config: HandoffConfig) -> Self {
        Self {
            host,
            config,
            attempt: Mutex::new(Attempt::default()),
            recorder: WatchHistoryRecorder::new(),
        }
    }

    pub fn state(&self) -> HandoffState {
        self.lock().state
    }

    /// Time from opening the URI to the terminal transition of the last
    /// attempt that launched.
    pub fn resolved_after(&self) -> Option<Duration> {
        self.lock().resolved_after
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run one handoff attempt to its terminal state.
    ///
    /// History is written once per attempt, concurrently with the
    /// visibility/timeout race; its failure never affects the outcome. The
    /// write gets no longer than the handoff timeout.
    pub async fn launch<S: HistorySink>(
        &self,
        stream_uri: &str,
        capability: PlatformCapability,
        history: &S,
        event: &WatchHistoryEvent,
    ) -> Result<HandoffOutcome, HandoffError> {
        {
            let mut attempt = self.lock();
            if attempt.state == HandoffState::Launching {
                tracing::debug!("handoff already in progress, ignoring");
                return Err(HandoffError::InProgress);
            }
            if !capability.companion_app {
                attempt.state = HandoffState::Redirecting;
                drop(attempt);
                tracing::info!(platform = %capability.platform, "platform cannot host companion app");
                self.host.redirect(&self.config.install_page);
                return Ok(HandoffOutcome::UnsupportedPlatform);
            }
            *attempt = Attempt {
                state: HandoffState::Launching,
                launched_at: Some(Instant::now()),
                resolved_after: None,
            };
        }
        self.recorder.reset();

        let uri = self.config.launch_uri(stream_uri);
        tracing::info!(platform = %capability.platform, %uri, "launching companion app");

        if let Err(e) = self.host.open_uri(&uri).await {
            tracing::warn!(error = %e, "companion app URI was not handled");
            self.resolve(HandoffOutcome::AppMissing);
            return Err(HandoffError::Launch(e.to_string()));
        }

        let race = async {
            tokio::select! {
                _ = self.host.visibility_lost() => self.resolve(HandoffOutcome::AppOpened),
                _ = tokio::time::sleep(self.config.timeout) => self.resolve(HandoffOutcome::AppMissing),
            };
        };
        let record = async {
            let write = self.recorder.record_once(history, event);
            if tokio::time::timeout(self.config.timeout, write).await.is_err() {
                tracing::warn!("watch history write timed out");
            }
        };
        tokio::join!(race, record);

        Ok(match self.state() {
            HandoffState::Launched => HandoffOutcome::AppOpened,
            _ => HandoffOutcome::AppMissing,
        })
    }

    /// The single terminal transition. Only the first call for an attempt
    /// acts; later calls return `false`.
    fn resolve(&self, outcome: HandoffOutcome) -> bool {
        let next = match outcome {
            HandoffOutcome::AppOpened => HandoffState::Launched,
            HandoffOutcome::AppMissing | HandoffOutcome::UnsupportedPlatform => {
                HandoffState::Redirecting
            }
        };
        let elapsed = {
            let mut attempt = self.lock();
            if attempt.state != HandoffState::Launching {
                return false;
            }
            attempt.state = next;
            attempt.resolved_after = attempt.launched_at.map(|at| at.elapsed());
            attempt.resolved_after.unwrap_or_default()
        };
        let elapsed_ms = elapsed.as_millis() as u64;

        match next {
            HandoffState::Launched => tracing::info!(elapsed_ms, "companion app opened"),
            _ => {
                tracing::warn!(
                    elapsed_ms,
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "companion app did not open, redirecting to install page"
                );
                self.host.redirect(&self.config.install_page);
            }
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
