use serde::Deserialize;

use crate::traits::{AnimeEntry, AnimeTitle, FuzzyDate, Relation, RelationKind};

// ── GraphQL response wrappers ────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: T,
}

// ── Search ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PageResponse {
    #[serde(rename = "Page")]
    pub page: PageData,
}

#[derive(Debug, Deserialize)]
pub struct PageData {
    pub media: Vec<AniListMedia>,
}

#[derive(Debug, Deserialize)]
pub struct AniListMedia {
    pub id: u64,
    pub title: Option<AniListTitle>,
    #[serde(rename = "startDate")]
    pub start_date: Option<AniListDate>,
    pub format: Option<String>,
    pub episodes: Option<u32>,
    pub relations: Option<RelationConnection>,
}

#[derive(Debug, Deserialize)]
pub struct AniListTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AniListDate {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RelationConnection {
    pub edges: Vec<RelationEdge>,
}

#[derive(Debug, Deserialize)]
pub struct RelationEdge {
    #[serde(rename = "relationType")]
    pub relation_type: Option<String>,
    pub node: Option<AniListMedia>,
}

// ── Conversions ──────────────────────────────────────────────────

impl From<AniListDate> for FuzzyDate {
    fn from(d: AniListDate) -> Self {
        FuzzyDate {
            year: d.year,
            month: d.month,
            day: d.day,
        }
    }
}

impl AniListMedia {
    pub fn into_entry(self) -> AnimeEntry {
        let title = self
            .title
            .map(|t| AnimeTitle {
                primary: t.romaji,
                alternate: t.english,
            })
            .unwrap_or_default();

        // Edges without a node (deleted media) carry nothing to chain.
        let relations = self
            .relations
            .map(|r| r.edges)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|edge| {
                let node = edge.node?;
                let kind = RelationKind::from_anilist(edge.relation_type.as_deref().unwrap_or(""));
                Some(Relation {
                    kind,
                    node: node.into_entry(),
                })
            })
            .collect();

        AnimeEntry {
            id: self.id,
            title,
            start_date: self.start_date.map(FuzzyDate::from).unwrap_or_default(),
            format: self.format.map(|f| f.to_lowercase()),
            episodes: self.episodes,
            relations,
        }
    }
}
