//! Support to download artwork from HTTP sources.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode, header};
use url::Url;

use crate::caching::{FetchError, FetchResult};
use crate::config::Config;

use super::{ByteFetcher, DownloadTimeouts, USER_AGENT};

/// Fetcher implementation that downloads artwork paths relative to a base URL.
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    base_url: Url,
    timeouts: DownloadTimeouts,
}

impl HttpFetcher {
    pub fn new(client: Client, base_url: Url, timeouts: DownloadTimeouts) -> Self {
        Self {
            client,
            base_url,
            timeouts,
        }
    }

    /// Creates a fetcher for the configured artwork base URL and timeouts.
    pub fn from_config(config: &Config) -> Self {
        let timeouts = DownloadTimeouts::from_config(config);
        let client = create_client(&timeouts);
        Self::new(client, config.artwork.base_url.clone(), timeouts)
    }

    /// Returns the full download URL for an artwork path.
    ///
    /// The path is appended to the base URL with exactly one `/` in between, keeping any path
    /// segments of the base URL, such as an image size.
    pub fn url_for(&self, path: &str) -> FetchResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Url::parse(&format!("{base}/{path}")).map_err(|_| FetchError::NotFound)
    }

    async fn fetch(&self, path: &str) -> FetchResult<Bytes> {
        let url = self.url_for(path)?;

        tracing::debug!("Fetching artwork from `{}`", url);

        let request = self
            .client
            .get(url.clone())
            .header(header::USER_AGENT, USER_AGENT)
            .send();

        let response = tokio::time::timeout(self.timeouts.head, request)
            .await
            .map_err(|_| FetchError::Timeout(self.timeouts.head))?
            .map_err(|e| self.reqwest_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(&url, status));
        }

        let bytes = response.bytes().await.map_err(|e| self.reqwest_error(e))?;
        metric!(histogram("images.fetch.size") = bytes.len() as u64);

        Ok(bytes)
    }

    fn reqwest_error(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.timeouts.max_download)
        } else {
            FetchError::download_error(&error)
        }
    }
}

impl ByteFetcher for HttpFetcher {
    fn fetch_bytes<'a>(&'a self, path: &'a str) -> BoxFuture<'a, FetchResult<Bytes>> {
        Box::pin(self.fetch(path))
    }
}

/// Creates the HTTP client shared by all downloads.
///
/// Idle connections are kept around for a while, as artwork tends to be requested in bursts
/// while scrolling through a list.
fn create_client(timeouts: &DownloadTimeouts) -> Client {
    let builder = Client::builder()
        .gzip(true)
        .hickory_dns(true)
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.max_download)
        .pool_idle_timeout(Duration::from_secs(30));

    builder.build().unwrap_or_else(|e| {
        tracing::error!(
            error = &e as &dyn std::error::Error,
            "Failed to build the HTTP client, falling back to the defaults",
        );
        Client::new()
    })
}

/// Infers the [`FetchError`] from an unsuccessful HTTP status code.
fn error_for_status(url: &Url, status: StatusCode) -> FetchError {
    debug_assert!(!status.is_success());

    if matches!(status, StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED) {
        tracing::debug!("Insufficient permissions to download `{url}`: {status}");
        FetchError::PermissionDenied(status.to_string())
    } else if status.is_client_error() {
        // If it's a client error, chances are it's a 404.
        tracing::debug!("Unexpected client error status code from `{url}`: {status}");
        FetchError::NotFound
    } else {
        tracing::debug!("Unexpected status code from `{url}`: {status}");
        FetchError::DownloadError(status.to_string())
    }
}
