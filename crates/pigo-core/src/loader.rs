//! Attaching a resolved stream to a playback surface.
//!
//! Two seams are involved: a [`StreamEngine`] (an adaptive-streaming player
//! that fetches manifests and segments itself) and a [`PlaybackSurface`]
//! (whatever finally renders frames). The loader never lets either talk to
//! the origin host directly; every fetch goes through the backend proxy.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use url::Url;

use pigo_api::backend::ProxyEndpoint;
use pigo_api::traits::StreamBackend;

use crate::models::{StreamDescriptor, StreamHeaders};

// ── Seams ───────────────────────────────────────────────────────

/// A source handed straight to the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceSource {
    /// A URL the surface fetches itself (always a proxy URL).
    Url(String),
    /// An in-memory manifest or media blob.
    Bytes { data: Vec<u8>, mime: &'static str },
}

pub trait PlaybackSurface: Send + Sync {
    /// Whether the surface can play `mime` without a streaming engine.
    fn can_play_native(&self, mime: &str) -> bool;

    fn set_source(&self, source: SurfaceSource);

    /// Drop the current source. Called whenever the loader detaches.
    fn clear(&self);
}

/// An adaptive-streaming engine instance.
///
/// The engine must pass every manifest and segment URL it requests through
/// the [`RequestRewriter`] it was loaded with.
pub trait StreamEngine: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the manifest and start playback. Resolves once playback is
    /// underway or has definitively failed.
    fn load(
        &self,
        manifest_url: &str,
        rewriter: RequestRewriter,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Release every resource held by this instance.
    fn destroy(&self);
}

/// Creates engine instances; one per attach.
pub trait EngineFactory: Send + Sync {
    type Engine: StreamEngine;

    /// Whether adaptive streaming is available on this platform at all.
    fn is_supported(&self) -> bool;

    fn create(&self) -> Self::Engine;
}

// ── Request rewriting ───────────────────────────────────────────

/// Rewrites engine requests to go through the same-origin proxy.
#[derive(Debug, Clone)]
pub struct RequestRewriter {
    proxy: ProxyEndpoint,
    headers: StreamHeaders,
    base: Option<Url>,
}

impl RequestRewriter {
    pub fn new(proxy: ProxyEndpoint, descriptor: &StreamDescriptor) -> Self {
        Self {
            proxy,
            headers: descriptor.headers.clone(),
            base: Url::parse(&descriptor.uri).ok(),
        }
    }

    /// A rewriter with the same proxy and headers that resolves relative
    /// requests against `upstream`, e.g. a variant playlist's location.
    pub fn with_base(&self, upstream: &str) -> Self {
        Self {
            proxy: self.proxy.clone(),
            headers: self.headers.clone(),
            base: Url::parse(upstream).ok().or_else(|| self.base.clone()),
        }
    }

    /// Absolute upstream URL for a request.
    pub fn resolve(&self, request: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(request)
                .map(String::from)
                .unwrap_or_else(|_| request.to_string()),
            None => request.to_string(),
        }
    }

    /// Proxy URL for a request. Relative requests resolve against the stream
    /// URI; requests already aimed at the proxy are returned unchanged.
    pub fn rewrite(&self, request: &str) -> String {
        if self.proxy.is_proxied(request) {
            return request.to_string();
        }
        self.proxy.url_for(&self.resolve(request), &self.headers).into()
    }
}

// ── State machine ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadFailure {
    #[error("this platform cannot play the stream format")]
    Unsupported,
    #[error("streaming engine error: {0}")]
    Engine(String),
    #[error("proxy fetch failed: {0}")]
    Proxy(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoaderState {
    #[default]
    Idle,
    Loading,
    Playing,
    Failed(LoadFailure),
}

struct Inner<E> {
    state: LoaderState,
    engine: Option<Arc<E>>,
    surface: Option<Arc<dyn PlaybackSurface>>,
    generation: u64,
}

/// Attaches stream descriptors to a surface: `idle → loading → playing | failed`.
pub struct StreamLoader<B, F: EngineFactory> {
    backend: Arc<B>,
    proxy: ProxyEndpoint,
    factory: F,
    inner: Mutex<Inner<F::Engine>>,
}

impl<B: StreamBackend, F: EngineFactory> StreamLoader<B, F> {
    pub fn new(backend: Arc<B>, proxy: ProxyEndpoint, factory: F) -> Self {
        Self {
            backend,
            proxy,
            factory,
            inner: Mutex::new(Inner {
                state: LoaderState::Idle,
                engine: None,
                surface: None,
                generation: 0,
            }),
        }
    }

    pub fn state(&self) -> LoaderState {
        self.lock().state.clone()
    }

    /// Attach `descriptor` to `surface`, replacing whatever was attached.
    /// The previously attached surface is cleared first.
    ///
    /// Returns the resulting state. If [`detach`](Self::detach) or another
    /// attach runs meanwhile, the state that superseding call left is returned.
    pub async fn attach<S: PlaybackSurface + 'static>(
        &self,
        surface: Arc<S>,
        descriptor: &StreamDescriptor,
    ) -> LoaderState {
        let generation = self.reset(LoaderState::Loading, Some(Arc::clone(&surface) as Arc<dyn PlaybackSurface>));
        tracing::debug!(uri = %descriptor.uri, hls = descriptor.is_hls(), "attaching stream");

        let outcome = self.load(surface.as_ref(), descriptor, generation).await;
        self.finish(generation, outcome)
    }

    /// Release the engine, clear the surface and return to `idle`. Any
    /// in-flight attach is abandoned.
    pub fn detach(&self) {
        self.reset(LoaderState::Idle, None);
        tracing::debug!("stream detached");
    }

    async fn load<S: PlaybackSurface>(
        &self,
        surface: &S,
        descriptor: &StreamDescriptor,
        generation: u64,
    ) -> Result<(), LoadFailure> {
        let mime = descriptor.mime_type();
        let rewriter = RequestRewriter::new(self.proxy.clone(), descriptor);

        if !descriptor.is_hls() {
            if !surface.can_play_native(mime) {
                return Err(LoadFailure::Unsupported);
            }
            if self.is_current(generation) {
                surface.set_source(SurfaceSource::Url(rewriter.rewrite(&descriptor.uri)));
            }
            return Ok(());
        }

        if self.factory.is_supported() {
            let engine = Arc::new(self.factory.create());
            if !self.install(generation, Arc::clone(&engine)) {
                engine.destroy();
                return Ok(());
            }
            return engine
                .load(&descriptor.uri, rewriter)
                .await
                .map_err(|e| LoadFailure::Engine(e.to_string()));
        }

        if surface.can_play_native(mime) {
            tracing::debug!("no streaming engine, falling back to proxied manifest blob");
            let data = self
                .backend
                .fetch_proxied(&descriptor.uri, &descriptor.headers)
                .await
                .map_err(|e| LoadFailure::Proxy(e.to_string()))?;
            if self.is_current(generation) {
                surface.set_source(SurfaceSource::Bytes { data, mime });
            }
            return Ok(());
        }

        Err(LoadFailure::Unsupported)
    }

    fn finish(&self, generation: u64, outcome: Result<(), LoadFailure>) -> LoaderState {
        let mut inner = self.lock();
        if inner.generation != generation {
            return inner.state.clone();
        }
        inner.state = match outcome {
            Ok(()) => {
                tracing::info!("stream playing");
                LoaderState::Playing
            }
            Err(failure) => {
                tracing::warn!(error = %failure, "stream attach failed");
                if let Some(engine) = inner.engine.take() {
                    engine.destroy();
                }
                LoaderState::Failed(failure)
            }
        };
        inner.state.clone()
    }

    /// Register `engine` for `generation`; false if that attach is stale.
    fn install(&self, generation: u64, engine: Arc<F::Engine>) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        inner.engine = Some(engine);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn reset(&self, next: LoaderState, surface: Option<Arc<dyn PlaybackSurface>>) -> u64 {
        let (generation, previous) = {
            let mut inner = self.lock();
            inner.generation += 1;
            if let Some(engine) = inner.engine.take() {
                engine.destroy();
            }
            inner.state = next;
            let previous = std::mem::replace(&mut inner.surface, surface);
            (inner.generation, previous)
        };
        if let Some(previous) = previous {
            previous.clear();
        }
        generation
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F::Engine>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use crate::testing::{descriptor, FakeBackend, FakeFactory, FakeSurface};

    fn proxy() -> ProxyEndpoint {
        ProxyEndpoint::new(&Url::parse("https://app.example.org/api").unwrap()).unwrap()
    }

    fn query(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn loader(factory: FakeFactory) -> StreamLoader<FakeBackend, FakeFactory> {
        let backend = FakeBackend {
            manifest: b"#EXTM3U\n".to_vec(),
            ..Default::default()
        };
        StreamLoader::new(Arc::new(backend), proxy(), factory)
    }

    #[tokio::test]
    async fn test_every_engine_request_goes_through_proxy_with_referer() {
        let loader = loader(FakeFactory::default());
        let surface = Arc::new(FakeSurface::default());
        let d = descriptor(
            "https://cdn.example.net/hls/master.m3u8",
            Some("https://example.com"),
        );

        let state = loader.attach(Arc::clone(&surface), &d).await;
        assert_eq!(state, LoaderState::Playing);

        let requests = loader.factory.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        for request in requests.iter() {
            assert!(request.starts_with("https://app.example.org/api/sources/proxy-stream?"));
            let q = query(request);
            assert!(q.contains(&("referer".into(), "https://example.com".into())));
            assert!(q.contains(&("userAgent".into(), "Mozilla/5.0".into())));
            let upstream = &q.iter().find(|(k, _)| k == "url").unwrap().1;
            assert!(upstream.starts_with("https://cdn"));
        }
        // Relative segments resolve against the manifest location.
        assert!(query(&requests[1]).contains(&(
            "url".into(),
            "https://cdn.example.net/hls/seg-0.ts".into()
        )));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let d = descriptor("https://cdn.example.net/a.m3u8", Some("https://example.com"));
        let rewriter = RequestRewriter::new(proxy(), &d);
        let once = rewriter.rewrite("seg.ts");
        assert_eq!(rewriter.rewrite(&once), once);
    }

    #[tokio::test]
    async fn test_blob_fallback_when_engine_unavailable() {
        let loader = loader(FakeFactory {
            unsupported: true,
            ..Default::default()
        });
        let surface = Arc::new(FakeSurface::native(&["application/vnd.apple.mpegurl"]));
        let d = descriptor("https://cdn.example.net/master.m3u8", Some("https://example.com"));

        assert_eq!(loader.attach(Arc::clone(&surface), &d).await, LoaderState::Playing);

        let sources = surface.sources.lock().unwrap();
        assert_eq!(
            *sources,
            vec![SurfaceSource::Bytes {
                data: b"#EXTM3U\n".to_vec(),
                mime: "application/vnd.apple.mpegurl",
            }]
        );
        let proxied = loader.backend.proxied.lock().unwrap();
        assert_eq!(proxied[0].0, "https://cdn.example.net/master.m3u8");
        assert_eq!(proxied[0].1.referer.as_deref(), Some("https://example.com"));
        assert_eq!(loader.factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blob_fallback_proxy_failure_reported() {
        let loader = loader(FakeFactory {
            unsupported: true,
            ..Default::default()
        });
        loader.backend.proxy_fails.store(true, Ordering::SeqCst);
        let surface = Arc::new(FakeSurface::native(&["application/vnd.apple.mpegurl"]));
        let d = descriptor("https://cdn.example.net/master.m3u8", None);

        let state = loader.attach(Arc::clone(&surface), &d).await;
        assert!(matches!(state, LoaderState::Failed(LoadFailure::Proxy(_))));
        assert!(surface.sources.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_neither_path_viable_is_failed() {
        let loader = loader(FakeFactory {
            unsupported: true,
            ..Default::default()
        });
        let surface = Arc::new(FakeSurface::default());
        let d = descriptor("https://cdn.example.net/master.m3u8", None);

        let state = loader.attach(Arc::clone(&surface), &d).await;
        assert_eq!(state, LoaderState::Failed(LoadFailure::Unsupported));
        assert_eq!(loader.state(), state);
    }

    #[tokio::test]
    async fn test_progressive_stream_set_as_proxied_url() {
        let loader = loader(FakeFactory::default());
        let surface = Arc::new(FakeSurface::native(&["video/mp4"]));
        let d = descriptor("https://cdn.example.net/movie.mp4", Some("https://example.com"));

        assert_eq!(loader.attach(Arc::clone(&surface), &d).await, LoaderState::Playing);
        let sources = surface.sources.lock().unwrap();
        let SurfaceSource::Url(url) = &sources[0] else {
            panic!("expected url source");
        };
        assert!(query(url).contains(&("url".into(), "https://cdn.example.net/movie.mp4".into())));
        assert_eq!(loader.factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_engine_failure_releases_engine() {
        let factory = FakeFactory::default();
        factory.fail.store(true, Ordering::SeqCst);
        let loader = loader(factory);
        let d = descriptor("https://cdn.example.net/master.m3u8", None);

        let state = loader.attach(Arc::new(FakeSurface::default()), &d).await;
        assert!(matches!(state, LoaderState::Failed(LoadFailure::Engine(_))));
        assert_eq!(loader.factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reattach_destroys_previous_engine() {
        let loader = loader(FakeFactory::default());
        let surface = Arc::new(FakeSurface::default());
        let d = descriptor("https://cdn.example.net/master.m3u8", None);

        loader.attach(Arc::clone(&surface), &d).await;
        loader.attach(Arc::clone(&surface), &d).await;
        assert_eq!(loader.factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(loader.factory.destroyed.load(Ordering::SeqCst), 1);

        loader.detach();
        assert_eq!(loader.factory.destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(loader.state(), LoaderState::Idle);
    }

    #[tokio::test]
    async fn test_detach_clears_surface() {
        let loader = loader(FakeFactory::default());
        let surface = Arc::new(FakeSurface::native(&["video/mp4"]));
        let d = descriptor("https://cdn.example.net/movie.mp4", None);

        loader.attach(Arc::clone(&surface), &d).await;
        assert_eq!(surface.sources.lock().unwrap().len(), 1);

        loader.detach();
        assert!(surface.sources.lock().unwrap().is_empty());
        assert_eq!(surface.cleared.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_reattach_leaves_surface_clean() {
        let loader = loader(FakeFactory {
            unsupported: true,
            ..Default::default()
        });
        let surface = Arc::new(FakeSurface::native(&["video/mp4"]));

        loader
            .attach(Arc::clone(&surface), &descriptor("https://cdn.example.net/movie.mp4", None))
            .await;
        let state = loader
            .attach(Arc::clone(&surface), &descriptor("https://cdn.example.net/master.m3u8", None))
            .await;

        assert_eq!(state, LoaderState::Failed(LoadFailure::Unsupported));
        assert!(surface.sources.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_during_load_ends_idle() {
        let loader = loader(FakeFactory {
            latency: Duration::from_secs(2),
            ..Default::default()
        });
        let surface = Arc::new(FakeSurface::default());
        let d = descriptor("https://cdn.example.net/master.m3u8", None);

        let (state, _) = tokio::join!(loader.attach(Arc::clone(&surface), &d), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(loader.state(), LoaderState::Loading);
            loader.detach();
        });

        assert_eq!(state, LoaderState::Idle);
        assert_eq!(loader.state(), LoaderState::Idle);
        assert_eq!(loader.factory.destroyed.load(Ordering::SeqCst), 1);
    }
}
