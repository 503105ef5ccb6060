use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use pigo_api::traits::{
    AnimeEntry, AnimeTitle, CandidateServer, FuzzyDate, MediaKind, Relation, RelationKind,
    ServerQuery, StreamDescriptor, StreamHeaders, WatchHistoryEvent,
};

/// One piece of media in the primary catalog.
///
/// Immutable once built; every downstream lookup keys off it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaIdentity {
    pub id: u64,
    pub kind: MediaKind,
    pub title: String,
    pub primary_date: Option<NaiveDate>,
}

impl MediaIdentity {
    pub fn new(id: u64, kind: MediaKind, title: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            title: title.into(),
            primary_date: None,
        }
    }

    /// Attach a release/first-air date in `YYYY-MM-DD` form.
    ///
    /// Unparseable dates are dropped; the catalog often sends empty strings.
    pub fn with_date_str(mut self, date: &str) -> Self {
        self.primary_date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok();
        self
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.primary_date = Some(date);
        self
    }

    /// Server query for this identity (season/episode only for serials).
    pub fn server_query(&self, season: Option<u32>, episode: Option<u32>) -> ServerQuery {
        let serial = self.kind != MediaKind::Movie;
        ServerQuery {
            id: self.id,
            kind: self.kind,
            season: season.filter(|_| serial),
            episode: episode.filter(|_| serial),
        }
    }

    /// Identity of a matched secondary-catalog entry, for the anime path.
    pub fn from_anime(entry: &AnimeEntry) -> Self {
        Self {
            id: entry.id,
            kind: MediaKind::Anime,
            title: entry.title.preferred().to_string(),
            primary_date: entry.start_date.to_naive(),
        }
    }
}
