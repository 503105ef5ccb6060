use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use pigo_api::traits::CatalogSource;
use pigo_api::RetryPolicy;

use crate::error::PigoError;
use crate::models::{AnimeEntry, MediaIdentity};
use crate::relations::{build_chain, Chain};

/// How strongly the anchor's date agreed with the primary catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DateTier {
    /// Year, month and day all equal.
    Exact,
    /// Year and month equal.
    YearMonth,
    /// Closest start date by day difference.
    Nearest { days: i64 },
    /// No usable date on either side; first title match wins.
    Undated,
}

/// A resolved chain plus how its anchor was chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogMatch {
    pub chain: Chain,
    pub tier: DateTier,
}

/// Resolves a primary-catalog identity to a chain in the anime catalog.
pub struct CatalogMatcher<S> {
    source: S,
    retry: RetryPolicy,
}

impl<S: CatalogSource> CatalogMatcher<S> {
    pub fn new(source: S, retry: RetryPolicy) -> Self {
        Self { source, retry }
    }

    /// Search the secondary catalog and build the chain around the best match.
    ///
    /// `Ok(None)` means nothing matched by title. Transport failures are
    /// retried and then returned as errors, never folded into `None`.
    pub async fn resolve(&self, identity: &MediaIdentity) -> Result<Option<CatalogMatch>, PigoError> {
        let candidates = self
            .retry
            .run("CatalogSearch", || self.source.search(&identity.title))
            .await
            .map_err(|e| PigoError::Catalog(e.to_string()))?;

        tracing::debug!(
            title = %identity.title,
            candidates = candidates.len(),
            "catalog search returned"
        );

        let Some((anchor, tier)) = select_anchor(identity, &candidates) else {
            tracing::info!(title = %identity.title, "no catalog entry matched");
            return Ok(None);
        };

        let chain = build_chain(anchor);
        tracing::info!(
            title = %identity.title,
            anchor_id = anchor.id,
            tier = ?tier,
            chain_len = chain.len(),
            "catalog entry matched"
        );
        Ok(Some(CatalogMatch { chain, tier }))
    }
}

/// Symmetric, case-insensitive substring containment.
///
/// Deliberately permissive: short or generic titles can false-positive.
pub fn titles_match(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Whether any title variant of `entry` matches `title`.
pub fn entry_matches_title(title: &str, entry: &AnimeEntry) -> bool {
    entry.title.variants().any(|v| titles_match(title, v))
}

/// Pick the anchor: title match required, then the strongest date tier.
pub fn select_anchor<'a>(
    identity: &MediaIdentity,
    candidates: &'a [AnimeEntry],
) -> Option<(&'a AnimeEntry, DateTier)> {
    let titled: Vec<&AnimeEntry> = candidates
        .iter()
        .filter(|c| entry_matches_title(&identity.title, c))
        .collect();
    let first = *titled.first()?;

    let Some(target) = identity.primary_date else {
        return Some((first, DateTier::Undated));
    };

    if let Some(c) = titled.iter().copied().find(|c| exact_date(target, c)) {
        return Some((c, DateTier::Exact));
    }
    if let Some(c) = titled.iter().copied().find(|c| year_month(target, c)) {
        return Some((c, DateTier::YearMonth));
    }

    titled
        .iter()
        .filter_map(|c| {
            let date = c.start_date.to_naive()?;
            Some((*c, (date - target).num_days().abs()))
        })
        .min_by_key(|(_, days)| *days)
        .map(|(c, days)| (c, DateTier::Nearest { days }))
        .or(Some((first, DateTier::Undated)))
}

fn exact_date(target: NaiveDate, entry: &AnimeEntry) -> bool {
    let d = &entry.start_date;
    d.year == Some(target.year()) && d.month == Some(target.month()) && d.day == Some(target.day())
}

fn year_month(target: NaiveDate, entry: &AnimeEntry) -> bool {
    let d = &entry.start_date;
    d.year == Some(target.year()) && d.month == Some(target.month())
}
