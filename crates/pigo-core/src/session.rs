use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pigo_api::traits::{HistorySink, StreamBackend};
use pigo_api::RetryPolicy;

use crate::directory::{select_default, ServerDirectory};
use crate::error::PigoError;
use crate::handoff::{HandoffController, HandoffHost, HandoffOutcome, HandoffState, PlatformCapability};
use crate::history::WatchHistoryRecorder;
use crate::loader::{EngineFactory, LoaderState, PlaybackSurface, StreamLoader};
use crate::models::{CandidateServer, MediaIdentity, StreamDescriptor, WatchHistoryEvent};
use crate::resolver::{Resolution, StreamResolver};

/// Servers on offer plus the one selected by default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListing {
    pub servers: Vec<CandidateServer>,
    pub default: Option<CandidateServer>,
}

#[derive(Debug, Default)]
struct Selection {
    season: Option<u32>,
    episode: Option<u32>,
    /// Name of the last server the user picked; survives episode changes.
    preferred: Option<String>,
}

/// Playback of one media identity, from server listing to handoff.
pub struct PlaybackSession<B, F: EngineFactory, H> {
    identity: MediaIdentity,
    user_id: String,
    backend: Arc<B>,
    directory: ServerDirectory<B>,
    resolver: StreamResolver<B>,
    loader: StreamLoader<B, F>,
    handoff: HandoffController<H>,
    history: WatchHistoryRecorder,
    selection: Mutex<Selection>,
}

impl<B, F, H> PlaybackSession<B, F, H>
where
    B: StreamBackend + HistorySink,
    F: EngineFactory,
    H: HandoffHost,
{
    pub fn new(
        identity: MediaIdentity,
        user_id: impl Into<String>,
        backend: Arc<B>,
        retry: RetryPolicy,
        loader: StreamLoader<B, F>,
        handoff: HandoffController<H>,
    ) -> Self {
        Self {
            identity,
            user_id: user_id.into(),
            directory: ServerDirectory::new(Arc::clone(&backend), retry),
            resolver: StreamResolver::new(Arc::clone(&backend), retry),
            backend,
            loader,
            handoff,
            history: WatchHistoryRecorder::new(),
            selection: Mutex::new(Selection::default()),
        }
    }

    pub fn identity(&self) -> &MediaIdentity {
        &self.identity
    }

    /// Switch episode. Invalidates the current stream and history guard.
    pub fn set_episode(&self, season: Option<u32>, episode: Option<u32>) {
        {
            let mut selection = self.lock();
            selection.season = season;
            selection.episode = episode;
        }
        self.teardown();
        self.history.reset();
    }

    /// List servers and pick the default: the remembered server if still
    /// offered, else the first.
    pub async fn servers(&self) -> Result<ServerListing, PigoError> {
        let (season, episode, preferred) = {
            let s = self.lock();
            (s.season, s.episode, s.preferred.clone())
        };
        let servers = self.directory.list(&self.identity, season, episode).await?;
        let default = select_default(&servers, preferred.as_deref()).cloned();
        Ok(ServerListing { servers, default })
    }

    /// Select a server and resolve its stream. A newer selection supersedes
    /// this one.
    pub async fn select(&self, server: &CandidateServer) -> Result<Resolution, PigoError> {
        self.lock().preferred = Some(server.name.clone());
        self.loader.detach();
        self.resolver.resolve(server).await
    }

    pub fn current_stream(&self) -> Option<StreamDescriptor> {
        self.resolver.current()
    }

    /// Attach the current stream to an in-page surface.
    pub async fn play_in_page<S: PlaybackSurface + 'static>(
        &self,
        surface: Arc<S>,
    ) -> Result<LoaderState, PigoError> {
        let descriptor = self.resolver.current().ok_or(PigoError::NoStream)?;
        Ok(self.loader.attach(surface, &descriptor).await)
    }

    /// Surface reported playback start; records history at most once.
    pub async fn playback_started(&self) -> bool {
        self.history.record_once(self.backend.as_ref(), &self.history_event()).await
    }

    /// Hand the current stream off to the companion app.
    pub async fn hand_off(&self, capability: PlatformCapability) -> Result<HandoffOutcome, PigoError> {
        let descriptor = self.resolver.current().ok_or(PigoError::NoStream)?;
        self.handoff
            .launch(&descriptor.uri, capability, self.backend.as_ref(), &self.history_event())
            .await
            .map_err(|e| PigoError::Handoff(e.to_string()))
    }

    /// Cancel in-flight resolution and release the streaming engine.
    pub fn teardown(&self) {
        self.resolver.cancel();
        self.loader.detach();
    }

    pub fn loader_state(&self) -> LoaderState {
        self.loader.state()
    }

    pub fn handoff_state(&self) -> HandoffState {
        self.handoff.state()
    }

    fn history_event(&self) -> WatchHistoryEvent {
        WatchHistoryEvent::now(self.user_id.clone(), self.identity.id, self.identity.kind)
    }

    fn lock(&self) -> MutexGuard<'_, Selection> {
        self.selection.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use pigo_api::backend::ProxyEndpoint;
    use url::Url;

    use crate::config::AppConfig;
    use crate::handoff::Platform;
    use crate::models::MediaKind;
    use crate::testing::{descriptor, server, FakeBackend, FakeFactory, FakeHost, FakeSurface};

    type Session = PlaybackSession<FakeBackend, FakeFactory, FakeHost>;

    fn session(backend: FakeBackend, host: FakeHost) -> Session {
        let backend = Arc::new(backend);
        let proxy = ProxyEndpoint::new(&Url::parse("https://app.example.org/api").unwrap()).unwrap();
        let loader = StreamLoader::new(Arc::clone(&backend), proxy, FakeFactory::default());
        let handoff = HandoffController::new(host, AppConfig::default().handoff_config());
        PlaybackSession::new(
            MediaIdentity::new(1399, MediaKind::Series, "Game of Thrones"),
            "user-7",
            backend,
            RetryPolicy::immediate(2),
            loader,
            handoff,
        )
    }

    fn two_servers() -> FakeBackend {
        let alpha = server("alpha");
        let beta = server("beta");
        FakeBackend::with_servers(vec![alpha.clone(), beta.clone()])
            .stream(&alpha, Duration::ZERO, descriptor("https://a.example.net/m.m3u8", None))
            .stream(&beta, Duration::ZERO, descriptor("https://b.example.net/m.m3u8", None))
    }

    #[tokio::test]
    async fn test_full_in_page_flow() {
        let s = session(two_servers(), FakeHost::default());
        s.set_episode(Some(1), Some(3));

        let listing = s.servers().await.unwrap();
        assert_eq!(listing.default.as_ref().unwrap().name, "alpha");

        let res = s.select(listing.default.as_ref().unwrap()).await.unwrap();
        assert!(matches!(res, Resolution::Current(_)));

        let surface = Arc::new(FakeSurface::default());
        assert_eq!(s.play_in_page(surface).await.unwrap(), LoaderState::Playing);

        assert!(s.playback_started().await);
        assert!(!s.playback_started().await);
        let history = s.backend.history.lock().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_id, "user-7");
        assert_eq!(history[0].media_id, 1399);

        let queries = s.backend.queries.lock().unwrap();
        assert_eq!((queries[0].season, queries[0].episode), (Some(1), Some(3)));
    }

    #[tokio::test]
    async fn test_remembered_server_survives_episode_change() {
        let s = session(two_servers(), FakeHost::default());

        s.select(&server("beta")).await.unwrap();
        s.set_episode(Some(1), Some(4));
        assert!(s.current_stream().is_none());

        let listing = s.servers().await.unwrap();
        assert_eq!(listing.default.unwrap().name, "beta");
    }

    #[tokio::test]
    async fn test_failed_selection_does_not_play_previous_server() {
        let s = session(two_servers(), FakeHost::default());
        s.select(&server("alpha")).await.unwrap();

        s.backend.fetch_failures.store(5, Ordering::SeqCst);
        assert!(s.select(&server("beta")).await.is_err());
        assert!(s.current_stream().is_none());

        let played = s.play_in_page(Arc::new(FakeSurface::default())).await;
        assert!(matches!(played, Err(PigoError::NoStream)));
        let capability = AppConfig::default().handoff_config().capability(Platform::Android);
        assert!(matches!(s.hand_off(capability).await, Err(PigoError::NoStream)));
        assert!(s.handoff.host().opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_play_without_stream_is_error() {
        let s = session(two_servers(), FakeHost::default());
        let result = s.play_in_page(Arc::new(FakeSurface::default())).await;
        assert!(matches!(result, Err(PigoError::NoStream)));
    }

    #[tokio::test]
    async fn test_teardown_releases_engine() {
        let s = session(two_servers(), FakeHost::default());
        s.select(&server("alpha")).await.unwrap();
        let surface = Arc::new(FakeSurface::default());
        s.play_in_page(Arc::clone(&surface)).await.unwrap();

        s.teardown();
        assert_eq!(s.loader_state(), LoaderState::Idle);
        assert_eq!(surface.cleared.load(Ordering::SeqCst), 1);
        assert!(s.current_stream().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hand_off_uses_current_stream() {
        let host = FakeHost {
            blur_after: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let s = session(two_servers(), host);
        s.select(&server("beta")).await.unwrap();

        let capability = AppConfig::default().handoff_config().capability(Platform::Android);
        let outcome = s.hand_off(capability).await.unwrap();
        assert_eq!(outcome, HandoffOutcome::AppOpened);
        assert_eq!(s.handoff_state(), HandoffState::Launched);

        let opened = s.handoff.host().opened.lock().unwrap();
        assert!(opened[0].contains("b.example.net"));
        assert_eq!(s.backend.history.lock().unwrap().len(), 1);
    }
}
