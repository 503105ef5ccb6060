//! Trait definitions for the services the playback core talks to.
//!
//! The secondary anime catalog, the stream aggregation backend and the
//! watch-history endpoint are each hidden behind one trait, so the core can be
//! driven by the real HTTP clients or by in-process fakes.

use std::fmt;
use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::retry::Transient;

/// A secondary catalog that can be searched by title.
pub trait CatalogSource: Send + Sync {
    type Error: std::error::Error + Transient + Send + Sync + 'static;

    /// Fuzzy search by title. Each entry carries one hop of relations.
    fn search(
        &self,
        title: &str,
    ) -> impl Future<Output = Result<Vec<AnimeEntry>, Self::Error>> + Send;
}

/// The aggregation backend that lists servers and extracts streams.
pub trait StreamBackend: Send + Sync {
    type Error: std::error::Error + Transient + Send + Sync + 'static;

    /// List candidate servers for a media identity.
    fn list_servers(
        &self,
        query: &ServerQuery,
    ) -> impl Future<Output = Result<Vec<CandidateServer>, Self::Error>> + Send;

    /// Extract a concrete stream URI (and required headers) from one server.
    fn fetch_stream(
        &self,
        server: &CandidateServer,
    ) -> impl Future<Output = Result<StreamDescriptor, Self::Error>> + Send;

    /// Fetch an upstream resource through the same-origin proxy.
    fn fetch_proxied(
        &self,
        url: &str,
        headers: &StreamHeaders,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}

/// Destination for watch-history writes.
pub trait HistorySink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn record(
        &self,
        event: &WatchHistoryEvent,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

// ── Catalog entries ──────────────────────────────────────────────

/// Kind of media, as understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    #[serde(rename = "tv", alias = "series")]
    Series,
    Anime,
}

impl MediaKind {
    /// Value of the backend's `type` query parameter.
    pub fn as_query_str(self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Series => "tv",
            Self::Anime => "anime",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_query_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "movie" => Ok(Self::Movie),
            "tv" | "series" => Ok(Self::Series),
            "anime" => Ok(Self::Anime),
            other => Err(format!("unknown media kind '{other}'")),
        }
    }
}

/// Both title variants a catalog entry may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeTitle {
    pub primary: Option<String>,
    pub alternate: Option<String>,
}

impl AnimeTitle {
    /// Returns the best available display title.
    pub fn preferred(&self) -> &str {
        self.primary
            .as_deref()
            .or(self.alternate.as_deref())
            .unwrap_or("Unknown")
    }

    /// Non-empty title variants, primary first.
    pub fn variants(&self) -> impl Iterator<Item = &str> {
        [self.primary.as_deref(), self.alternate.as_deref()]
            .into_iter()
            .flatten()
            .filter(|t| !t.trim().is_empty())
    }
}

/// A partially known calendar date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl FuzzyDate {
    /// Year used for entries without any date, so they sort last.
    pub const MISSING_YEAR: i32 = 9999;

    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            day: Some(day),
        }
    }

    pub fn has_date(&self) -> bool {
        self.year.is_some()
    }

    /// Ordering key: missing year sorts last, missing month/day as the 1st.
    pub fn sort_key(&self) -> (i32, u32, u32) {
        (
            self.year.unwrap_or(Self::MISSING_YEAR),
            self.month.unwrap_or(1),
            self.day.unwrap_or(1),
        )
    }

    /// Calendar date, filling unknown month/day with January / the 1st.
    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year?, self.month.unwrap_or(1), self.day.unwrap_or(1))
    }
}

impl From<NaiveDate> for FuzzyDate {
    fn from(date: NaiveDate) -> Self {
        use chrono::Datelike;
        Self::new(date.year(), date.month(), date.day())
    }
}

/// How a related entry relates to the one that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    Prequel,
    Sequel,
    Other(String),
}

impl RelationKind {
    /// Map an AniList `MediaRelation` value.
    pub fn from_anilist(s: &str) -> Self {
        match s {
            "PREQUEL" => Self::Prequel,
            "SEQUEL" => Self::Sequel,
            other => Self::Other(other.to_lowercase()),
        }
    }
}

/// A tagged edge to a related entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub node: AnimeEntry,
}

/// An entry from the secondary anime catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimeEntry {
    pub id: u64,
    pub title: AnimeTitle,
    pub start_date: FuzzyDate,
    pub format: Option<String>,
    pub episodes: Option<u32>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

// ── Servers and streams ──────────────────────────────────────────

/// What to list servers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerQuery {
    pub id: u64,
    pub kind: MediaKind,
    pub season: Option<u32>,
    pub episode: Option<u32>,
}

/// One upstream source offering a playable stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateServer {
    pub name: String,
    pub link: String,
    #[serde(default)]
    pub domain: String,
}

/// Headers the origin host expects when fetching the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeaders {
    #[serde(default, alias = "Referer")]
    pub referer: Option<String>,
    #[serde(default, rename = "userAgent", alias = "User-Agent", alias = "user-agent")]
    pub user_agent: Option<String>,
}

/// A resolved, playable stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub uri: String,
    #[serde(default)]
    pub headers: StreamHeaders,
}

impl StreamDescriptor {
    /// Whether the URI points at an HLS manifest.
    pub fn is_hls(&self) -> bool {
        let path = self.uri.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
        path.to_ascii_lowercase().ends_with(".m3u8")
    }

    /// MIME type a playback surface would be asked about.
    pub fn mime_type(&self) -> &'static str {
        if self.is_hls() {
            "application/vnd.apple.mpegurl"
        } else {
            "video/mp4"
        }
    }
}

// ── Watch history ────────────────────────────────────────────────

/// One watch-history write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchHistoryEvent {
    pub user_id: String,
    pub media_id: u64,
    pub kind: MediaKind,
    pub timestamp: DateTime<Utc>,
}

impl WatchHistoryEvent {
    pub fn now(user_id: impl Into<String>, media_id: u64, kind: MediaKind) -> Self {
        Self {
            user_id: user_id.into(),
            media_id,
            kind,
            timestamp: Utc::now(),
        }
    }
}
