//! Linear prequel → anchor → sequel chains over catalog relation edges.
//!
//! Only one hop of `prequel`/`sequel` edges is consumed, so there is no
//! general graph here: the anchor's edge list is partitioned and sorted.

use serde::Serialize;

use crate::models::{AnimeEntry, RelationKind};

/// Ordered chain of related entries around a matched anchor.
///
/// Only [`build_chain`] constructs one, so `anchor` always indexes `entries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chain {
    entries: Vec<AnimeEntry>,
    /// Position of the matched entry, for default selection.
    anchor: usize,
}

impl Chain {
    pub fn entries(&self) -> &[AnimeEntry] {
        &self.entries
    }

    pub fn anchor(&self) -> usize {
        self.anchor
    }

    pub fn anchor_entry(&self) -> &AnimeEntry {
        &self.entries[self.anchor]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimeEntry> {
        self.entries.iter()
    }
}

/// Build `[...prequels, anchor, ...sequels]` from the anchor's relations.
///
/// Each side is sorted ascending by start date, dateless entries last, with
/// ties kept in source order. Other relation kinds are dropped.
pub fn build_chain(anchor: &AnimeEntry) -> Chain {
    let mut prequels = Vec::new();
    let mut sequels = Vec::new();

    for relation in &anchor.relations {
        match relation.kind {
            RelationKind::Prequel => prequels.push(flatten(&relation.node)),
            RelationKind::Sequel => sequels.push(flatten(&relation.node)),
            RelationKind::Other(_) => {}
        }
    }

    prequels.sort_by_key(|e| e.start_date.sort_key());
    sequels.sort_by_key(|e| e.start_date.sort_key());

    let anchor_index = prequels.len();
    let mut entries = prequels;
    entries.push(flatten(anchor));
    entries.extend(sequels);

    Chain {
        entries,
        anchor: anchor_index,
    }
}

/// Copy of an entry without its edges; chain members are leaves.
fn flatten(entry: &AnimeEntry) -> AnimeEntry {
    AnimeEntry {
        relations: Vec::new(),
        ..entry.clone()
    }
}
