use url::Url;

use crate::traits::StreamHeaders;

/// Path of the backend's stream proxy, relative to the backend base URL.
pub const PROXY_PATH: &str = "sources/proxy-stream";

/// Builds proxy URLs that carry the true upstream URL and its headers.
///
/// The origin stream host does not grant cross-origin access, so every
/// manifest and segment fetch goes through the backend instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    url: Url,
}

impl ProxyEndpoint {
    /// Proxy endpoint under the given backend base URL.
    pub fn new(base: &Url) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: join_path(base, PROXY_PATH)?,
        })
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    /// Proxy URL for one upstream resource.
    pub fn url_for(&self, upstream: &str, headers: &StreamHeaders) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("url", upstream);
            if let Some(referer) = &headers.referer {
                query.append_pair("referer", referer);
            }
            if let Some(ua) = &headers.user_agent {
                query.append_pair("userAgent", ua);
            }
        }
        url
    }

    /// Whether `candidate` already targets this proxy.
    pub fn is_proxied(&self, candidate: &str) -> bool {
        match Url::parse(candidate) {
            Ok(u) => {
                u.origin() == self.url.origin() && u.path() == self.url.path()
            }
            Err(_) => false,
        }
    }
}

/// Join a relative path onto a base URL, treating the base as a directory.
pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path.trim_start_matches('/'))
}
