//! Terminal stand-ins for the in-page player: an engine that exports a
//! proxied HLS playlist and a surface that writes its source to disk, so any
//! local player can open the result.

use std::path::PathBuf;

use reqwest::Client;

use pigo_core::loader::{
    EngineFactory, PlaybackSurface, RequestRewriter, StreamEngine, SurfaceSource,
};

#[derive(Debug, thiserror::Error)]
pub enum PlaylistError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("proxy returned status {0}")]
    Status(u16),
    #[error("not an HLS playlist")]
    NotPlaylist,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

const STREAM_INF: &str = "#EXT-X-STREAM-INF";
/// Master-playlist tags whose `URI` attribute names another media playlist.
const RENDITION_TAGS: [&str; 2] = ["#EXT-X-MEDIA:", "#EXT-X-I-FRAME-STREAM-INF:"];

/// Whether `body` lists variant streams rather than segments.
pub fn is_master(body: &str) -> bool {
    body.lines().any(|l| l.trim_start().starts_with(STREAM_INF))
}

/// Rewrite every URI in a media playlist, including `URI="..."` attributes.
pub fn rewrite_playlist(body: &str, rewriter: &RequestRewriter) -> String {
    let mut out = String::with_capacity(body.len());
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push_str(line);
        } else if trimmed.starts_with('#') {
            out.push_str(&map_uri_attr(line, |uri| rewriter.rewrite(uri)));
        } else {
            out.push_str(&rewriter.rewrite(trimmed));
        }
        out.push('\n');
    }
    out
}

/// Point every media-playlist reference in a master playlist at a local
/// file named by `name`. Returns the new master and the upstream URL of each
/// referenced playlist, indexed as passed to `name`.
pub fn localize_master(
    body: &str,
    rewriter: &RequestRewriter,
    name: impl Fn(usize) -> String,
) -> (String, Vec<String>) {
    let mut out = String::with_capacity(body.len());
    let mut playlists = Vec::new();
    let mut after_stream_inf = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push_str(line);
        } else if trimmed.starts_with('#') {
            after_stream_inf = trimmed.starts_with(STREAM_INF);
            if RENDITION_TAGS.iter().any(|tag| trimmed.starts_with(tag)) {
                out.push_str(&map_uri_attr(line, |uri| {
                    playlists.push(rewriter.resolve(uri));
                    name(playlists.len() - 1)
                }));
            } else {
                out.push_str(&map_uri_attr(line, |uri| rewriter.rewrite(uri)));
            }
        } else if after_stream_inf {
            playlists.push(rewriter.resolve(trimmed));
            out.push_str(&name(playlists.len() - 1));
            after_stream_inf = false;
        } else {
            out.push_str(&rewriter.rewrite(trimmed));
        }
        out.push('\n');
    }
    (out, playlists)
}

fn map_uri_attr(line: &str, f: impl FnOnce(&str) -> String) -> String {
    const ATTR: &str = "URI=\"";
    let Some(start) = line.find(ATTR).map(|i| i + ATTR.len()) else {
        return line.to_string();
    };
    let Some(len) = line[start..].find('"') else {
        return line.to_string();
    };
    let end = start + len;
    format!("{}{}{}", &line[..start], f(&line[start..end]), &line[end..])
}

pub struct PlaylistEngine {
    http: Client,
    out: PathBuf,
}

impl PlaylistEngine {
    async fn fetch(&self, url: &str) -> Result<String, PlaylistError> {
        tracing::debug!(%url, "fetching playlist");
        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(PlaylistError::Status(resp.status().as_u16()));
        }
        let body = resp.text().await?;
        if !body.trim_start().starts_with("#EXTM3U") {
            return Err(PlaylistError::NotPlaylist);
        }
        Ok(body)
    }

    /// File name for the `index`th media playlist, written beside the master.
    fn variant_name(&self, index: usize) -> String {
        let stem = self
            .out
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pigo".into());
        format!("{stem}-{index}.m3u8")
    }
}

impl StreamEngine for PlaylistEngine {
    type Error = PlaylistError;

    async fn load(&self, manifest_url: &str, rewriter: RequestRewriter) -> Result<(), PlaylistError> {
        let body = self.fetch(&rewriter.rewrite(manifest_url)).await?;

        let playlist = if is_master(&body) {
            let (master, variants) = localize_master(&body, &rewriter, |i| self.variant_name(i));
            for (index, upstream) in variants.iter().enumerate() {
                let media = self.fetch(&rewriter.rewrite(upstream)).await?;
                let path = self.out.with_file_name(self.variant_name(index));
                tokio::fs::write(&path, rewrite_playlist(&media, &rewriter.with_base(upstream)))
                    .await?;
                tracing::debug!(path = %path.display(), %upstream, "variant playlist written");
            }
            master
        } else {
            rewrite_playlist(&body, &rewriter)
        };

        tokio::fs::write(&self.out, playlist).await?;
        tracing::info!(path = %self.out.display(), "proxied playlist written");
        Ok(())
    }

    fn destroy(&self) {
        tracing::debug!(path = %self.out.display(), "playlist engine released");
    }
}

pub struct PlaylistEngineFactory {
    pub http: Client,
    pub out: PathBuf,
    pub enabled: bool,
}

impl EngineFactory for PlaylistEngineFactory {
    type Engine = PlaylistEngine;

    fn is_supported(&self) -> bool {
        self.enabled
    }

    fn create(&self) -> PlaylistEngine {
        PlaylistEngine {
            http: self.http.clone(),
            out: self.out.clone(),
        }
    }
}

/// Writes whatever source it is given to `path`.
pub struct FileSurface {
    pub path: PathBuf,
    /// Whether to accept HLS manifests directly (the blob fallback path).
    pub native_hls: bool,
}

impl PlaybackSurface for FileSurface {
    fn can_play_native(&self, mime: &str) -> bool {
        match mime {
            "video/mp4" => true,
            "application/vnd.apple.mpegurl" => self.native_hls,
            _ => false,
        }
    }

    fn set_source(&self, source: SurfaceSource) {
        let result = match source {
            SurfaceSource::Url(url) => std::fs::write(&self.path, format!("#EXTM3U\n{url}\n")),
            SurfaceSource::Bytes { data, .. } => std::fs::write(&self.path, data),
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write source");
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "source removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove source")
            }
        }
    }
}
