use serde::{Deserialize, Serialize};

use crate::traits::{MediaKind, StreamDescriptor, StreamHeaders, WatchHistoryEvent};

/// Response of `GET /sources/fetch-stream`.
#[derive(Debug, Deserialize)]
pub struct FetchStreamResponse {
    pub stream_link: String,
    #[serde(default)]
    pub stream_headers: Option<StreamHeaders>,
}

impl FetchStreamResponse {
    pub fn into_descriptor(self) -> StreamDescriptor {
        StreamDescriptor {
            uri: self.stream_link,
            headers: self.stream_headers.unwrap_or_default(),
        }
    }
}

/// Body of the watch-history `POST`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryBody<'a> {
    pub user_id: &'a str,
    pub media_id: u64,
    pub media_kind: MediaKind,
}

impl<'a> From<&'a WatchHistoryEvent> for WatchHistoryBody<'a> {
    fn from(e: &'a WatchHistoryEvent) -> Self {
        Self {
            user_id: &e.user_id,
            media_id: e.media_id,
            media_kind: e.kind,
        }
    }
}
