use std::time::Duration;

use reqwest::{Client, Response};
use url::Url;

use super::error::BackendError;
use super::proxy::{join_path, ProxyEndpoint};
use super::types::{FetchStreamResponse, WatchHistoryBody};
use crate::traits::{
    CandidateServer, HistorySink, ServerQuery, StreamBackend, StreamDescriptor, StreamHeaders,
    WatchHistoryEvent,
};

const SERVERS_PATH: &str = "stream";
const FETCH_STREAM_PATH: &str = "sources/fetch-stream";
const DEFAULT_HISTORY_PATH: &str = "history";

/// REST client for the stream aggregation backend.
pub struct BackendClient {
    base: Url,
    history_path: String,
    proxy: ProxyEndpoint,
    http: Client,
}

impl BackendClient {
    pub fn new(base: Url, http: Client) -> Result<Self, BackendError> {
        let proxy = ProxyEndpoint::new(&base)?;
        Ok(Self {
            base,
            history_path: DEFAULT_HISTORY_PATH.to_string(),
            proxy,
            http,
        })
    }

    /// Build a client with a request timeout.
    pub fn with_timeout(base: Url, timeout: Duration) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(timeout).build()?;
        Self::new(base, http)
    }

    /// Path of the watch-history endpoint, relative to the base URL.
    pub fn with_history_path(mut self, path: impl Into<String>) -> Self {
        self.history_path = path.into();
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn proxy(&self) -> &ProxyEndpoint {
        &self.proxy
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(join_path(&self.base, path)?)
    }

    async fn get(&self, operation: &str, url: Url) -> Result<Response, BackendError> {
        tracing::debug!(operation, url = %url, "backend request");
        let resp = self.http.get(url).send().await?;
        check_status(operation, resp).await
    }
}

async fn check_status(operation: &str, resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if !status.is_success() {
        let status_code = status.as_u16();
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(operation, status = status_code, "backend error");
        return Err(BackendError::Api {
            status: status_code,
            message: body,
        });
    }
    tracing::debug!(operation, status = %status, "backend response received");
    Ok(resp)
}

impl StreamBackend for BackendClient {
    type Error = BackendError;

    async fn list_servers(
        &self,
        query: &ServerQuery,
    ) -> Result<Vec<CandidateServer>, BackendError> {
        let mut url = self.endpoint(SERVERS_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("id", &query.id.to_string());
            pairs.append_pair("type", query.kind.as_query_str());
            if let Some(season) = query.season {
                pairs.append_pair("season", &season.to_string());
            }
            if let Some(episode) = query.episode {
                pairs.append_pair("episode", &episode.to_string());
            }
        }

        let resp = self.get("ListServers", url).await?;
        resp.json::<Vec<CandidateServer>>()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))
    }

    async fn fetch_stream(
        &self,
        server: &CandidateServer,
    ) -> Result<StreamDescriptor, BackendError> {
        let mut url = self.endpoint(FETCH_STREAM_PATH)?;
        url.query_pairs_mut()
            .append_pair("server_link", &server.link)
            .append_pair("referer", &server.domain);

        let resp = self.get("FetchStream", url).await?;
        let body: FetchStreamResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        Ok(body.into_descriptor())
    }

    async fn fetch_proxied(
        &self,
        url: &str,
        headers: &StreamHeaders,
    ) -> Result<Vec<u8>, BackendError> {
        let proxied = self.proxy.url_for(url, headers);
        let resp = self.get("ProxyStream", proxied).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

impl HistorySink for BackendClient {
    type Error = BackendError;

    async fn record(&self, event: &WatchHistoryEvent) -> Result<(), BackendError> {
        let url = self.endpoint(&self.history_path)?;
        tracing::debug!(operation = "RecordHistory", url = %url, "backend request");
        let resp = self
            .http
            .post(url)
            .json(&WatchHistoryBody::from(event))
            .send()
            .await?;
        check_status("RecordHistory", resp).await?;
        Ok(())
    }
}
