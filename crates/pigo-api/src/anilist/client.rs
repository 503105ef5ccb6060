use reqwest::Client;

use super::error::AniListError;
use super::types::{AniListMedia, GraphQLResponse, PageResponse};
use crate::traits::{AnimeEntry, CatalogSource};

pub const API_URL: &str = "https://graphql.anilist.co";

const DEFAULT_PER_PAGE: u32 = 10;

const SEARCH_QUERY: &str = r#"
query ($search: String, $perPage: Int) {
    Page(perPage: $perPage) {
        media(search: $search, type: ANIME) {
            id
            title { romaji english }
            startDate { year month day }
            format
            episodes
            relations {
                edges {
                    relationType
                    node {
                        id
                        title { romaji english }
                        startDate { year month day }
                        format
                        episodes
                    }
                }
            }
        }
    }
}
"#;

/// AniList GraphQL API client.
///
/// Search is public, so no access token is needed.
pub struct AniListClient {
    endpoint: String,
    per_page: u32,
    http: Client,
}

impl Default for AniListClient {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

impl AniListClient {
    pub fn new(http: Client) -> Self {
        Self {
            endpoint: API_URL.to_string(),
            per_page: DEFAULT_PER_PAGE,
            http,
        }
    }

    /// Point the client at a different GraphQL endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Number of candidates requested per search.
    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    async fn graphql_request<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, AniListError> {
        tracing::debug!(operation, "AniList GraphQL request");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "query": query,
                "variables": variables,
            }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(operation, status = status_code, "AniList API error");
            return Err(AniListError::Api {
                status: status_code,
                message: body,
            });
        }

        tracing::debug!(operation, status = %status, "AniList response received");
        resp.json::<T>()
            .await
            .map_err(|e| AniListError::Parse(e.to_string()))
    }

    /// Search for anime (raw types).
    async fn search_raw(&self, title: &str) -> Result<Vec<AniListMedia>, AniListError> {
        let resp: GraphQLResponse<PageResponse> = self
            .graphql_request(
                "Search",
                SEARCH_QUERY,
                serde_json::json!({ "search": title, "perPage": self.per_page }),
            )
            .await?;

        Ok(resp.data.page.media)
    }
}

impl CatalogSource for AniListClient {
    type Error = AniListError;

    async fn search(&self, title: &str) -> Result<Vec<AnimeEntry>, AniListError> {
        let media = self.search_raw(title).await?;
        Ok(media.into_iter().map(AniListMedia::into_entry).collect())
    }
}
