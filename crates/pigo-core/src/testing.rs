//! In-process fakes for every seam the core drives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pigo_api::backend::BackendError;
use pigo_api::traits::{HistorySink, StreamBackend};

use crate::handoff::HandoffHost;
use crate::loader::{EngineFactory, PlaybackSurface, RequestRewriter, StreamEngine, SurfaceSource};
use crate::models::{
    CandidateServer, ServerQuery, StreamDescriptor, StreamHeaders, WatchHistoryEvent,
};

pub(crate) fn server(name: &str) -> CandidateServer {
    CandidateServer {
        name: name.into(),
        link: format!("https://{name}.example.net/embed/1"),
        domain: format!("https://{name}.example.net"),
    }
}

pub(crate) fn descriptor(uri: &str, referer: Option<&str>) -> StreamDescriptor {
    StreamDescriptor {
        uri: uri.into(),
        headers: StreamHeaders {
            referer: referer.map(Into::into),
            user_agent: Some("Mozilla/5.0".into()),
        },
    }
}

fn unavailable() -> BackendError {
    BackendError::Api {
        status: 503,
        message: "unavailable".into(),
    }
}

/// Backend fake with per-link stream latency and scripted failures.
#[derive(Default)]
pub(crate) struct FakeBackend {
    pub servers: Vec<CandidateServer>,
    /// Stream per server link, returned after the given (virtual) delay.
    pub streams: HashMap<String, (Duration, StreamDescriptor)>,
    pub list_failures: AtomicU32,
    pub fetch_failures: AtomicU32,
    pub proxy_fails: AtomicBool,
    pub manifest: Vec<u8>,
    pub queries: Mutex<Vec<ServerQuery>>,
    pub fetched: Mutex<Vec<String>>,
    pub proxied: Mutex<Vec<(String, StreamHeaders)>>,
    pub history: Mutex<Vec<WatchHistoryEvent>>,
}

impl FakeBackend {
    pub fn with_servers(servers: Vec<CandidateServer>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    pub fn stream(mut self, server: &CandidateServer, delay: Duration, d: StreamDescriptor) -> Self {
        self.streams.insert(server.link.clone(), (delay, d));
        self
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl StreamBackend for FakeBackend {
    type Error = BackendError;

    async fn list_servers(&self, query: &ServerQuery) -> Result<Vec<CandidateServer>, BackendError> {
        self.queries.lock().unwrap().push(query.clone());
        if Self::take_failure(&self.list_failures) {
            return Err(unavailable());
        }
        Ok(self.servers.clone())
    }

    async fn fetch_stream(&self, server: &CandidateServer) -> Result<StreamDescriptor, BackendError> {
        self.fetched.lock().unwrap().push(server.link.clone());
        if Self::take_failure(&self.fetch_failures) {
            return Err(unavailable());
        }
        let (delay, d) = self
            .streams
            .get(&server.link)
            .cloned()
            .ok_or_else(|| BackendError::Parse(format!("no stream for {}", server.link)))?;
        tokio::time::sleep(delay).await;
        Ok(d)
    }

    async fn fetch_proxied(&self, url: &str, headers: &StreamHeaders) -> Result<Vec<u8>, BackendError> {
        self.proxied
            .lock()
            .unwrap()
            .push((url.to_string(), headers.clone()));
        if self.proxy_fails.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(self.manifest.clone())
    }
}

/// History sink that records every write.
#[derive(Default)]
pub(crate) struct FakeHistory {
    pub events: Mutex<Vec<WatchHistoryEvent>>,
    pub fail: AtomicBool,
    pub delay: Duration,
}

impl FakeHistory {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl HistorySink for FakeHistory {
    type Error = BackendError;

    async fn record(&self, event: &WatchHistoryEvent) -> Result<(), BackendError> {
        self.events.lock().unwrap().push(event.clone());
        tokio::time::sleep(self.delay).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

impl HistorySink for FakeBackend {
    type Error = BackendError;

    async fn record(&self, event: &WatchHistoryEvent) -> Result<(), BackendError> {
        self.history.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Surface that plays the listed mime types natively and keeps every source.
#[derive(Default)]
pub(crate) struct FakeSurface {
    pub native: Vec<&'static str>,
    pub sources: Mutex<Vec<SurfaceSource>>,
    pub cleared: AtomicUsize,
}

impl FakeSurface {
    pub fn native(mimes: &[&'static str]) -> Self {
        Self {
            native: mimes.to_vec(),
            ..Default::default()
        }
    }
}

impl PlaybackSurface for FakeSurface {
    fn can_play_native(&self, mime: &str) -> bool {
        self.native.contains(&mime)
    }

    fn set_source(&self, source: SurfaceSource) {
        self.sources.lock().unwrap().push(source);
    }

    fn clear(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().clear();
    }
}

/// Engine that "plays" by requesting a manifest and a few segments.
pub(crate) struct FakeEngine {
    requests: Arc<Mutex<Vec<String>>>,
    destroyed: Arc<AtomicUsize>,
    latency: Duration,
    fail: bool,
}

impl StreamEngine for FakeEngine {
    type Error = std::io::Error;

    async fn load(&self, manifest_url: &str, rewriter: RequestRewriter) -> Result<(), Self::Error> {
        let mut requests = vec![rewriter.rewrite(manifest_url)];
        for segment in ["seg-0.ts", "seg-1.ts", "https://cdn2.example.net/seg-2.ts"] {
            requests.push(rewriter.rewrite(segment));
        }
        tokio::time::sleep(self.latency).await;
        self.requests.lock().unwrap().extend(requests);
        if self.fail {
            return Err(std::io::Error::other("manifest parse error"));
        }
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeFactory {
    pub unsupported: bool,
    pub fail: AtomicBool,
    pub latency: Duration,
    pub requests: Arc<Mutex<Vec<String>>>,
    pub destroyed: Arc<AtomicUsize>,
    pub created: AtomicUsize,
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn is_supported(&self) -> bool {
        !self.unsupported
    }

    fn create(&self) -> FakeEngine {
        self.created.fetch_add(1, Ordering::SeqCst);
        FakeEngine {
            requests: Arc::clone(&self.requests),
            destroyed: Arc::clone(&self.destroyed),
            latency: self.latency,
            fail: self.fail.load(Ordering::SeqCst),
        }
    }
}

/// Host whose page loses visibility after `blur_after`, or never.
#[derive(Default)]
pub(crate) struct FakeHost {
    pub blur_after: Option<Duration>,
    pub open_fails: bool,
    pub opened: Mutex<Vec<String>>,
    pub redirects: Mutex<Vec<String>>,
    pub subscriptions: AtomicUsize,
}

impl HandoffHost for FakeHost {
    type Error = std::io::Error;

    async fn open_uri(&self, uri: &str) -> Result<(), std::io::Error> {
        self.opened.lock().unwrap().push(uri.to_string());
        if self.open_fails {
            return Err(std::io::Error::other("no handler for scheme"));
        }
        Ok(())
    }

    async fn visibility_lost(&self) {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.blur_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending().await,
        }
    }

    fn redirect(&self, page: &str) {
        self.redirects.lock().unwrap().push(page.to_string());
    }
}
