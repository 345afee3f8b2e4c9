//! Fetching raw artwork bytes.
//!
//! The image loader does not care where bytes come from, it only needs something implementing
//! [`ByteFetcher`]. [`HttpFetcher`] is the implementation used in production.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::caching::{CacheKey, FetchResult};
use crate::config::Config;

mod http;

pub use self::http::HttpFetcher;

/// HTTP User-Agent string to use.
const USER_AGENT: &str = concat!("marquee/", env!("CARGO_PKG_VERSION"));

/// Fetches the raw bytes of an artwork path.
///
/// Implementations are shared between all concurrent loads and must be thread-safe. Any failure is
/// reported as a [`FetchError`](crate::caching::FetchError).
pub trait ByteFetcher: Send + Sync + 'static {
    fn fetch_bytes<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FetchResult<Bytes>>;
}

/// A shared, type-erased [`ByteFetcher`].
pub type FetcherRef = Arc<dyn ByteFetcher>;

/// Fetches the bytes for `key` in a future that owns everything it needs, so it can be spawned.
pub fn fetch_owned(fetcher: FetcherRef, key: CacheKey) -> BoxFuture<'static, FetchResult<Bytes>> {
    Box::pin(async move {
        tracing::debug!("Starting fetch for `{key}`");
        let result = fetcher.fetch_bytes(key.as_str()).await;

        metric!(
            counter("images.fetch") += 1,
            "status" => match &result {
                Ok(_) => "success",
                Err(e) => e.metrics_tag(),
            },
        );

        result
    })
}

/// Timeouts applied to every artwork download.
#[derive(Copy, Clone, Debug)]
pub struct DownloadTimeouts {
    /// Establishing the connection.
    pub connect: Duration,
    /// Receiving the response headers, measured from the start of the request.
    pub head: Duration,
    /// The whole download, including the response body.
    pub max_download: Duration,
}

impl DownloadTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            head: config.head_timeout,
            max_download: config.max_download_timeout,
        }
    }
}

impl Default for DownloadTimeouts {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
