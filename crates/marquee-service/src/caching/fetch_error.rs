use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// An error that happens when fetching artwork bytes from a remote location.
///
/// This is the only kind of failure produced by fetches. It is cloned and handed to every caller
/// that joined the same in-flight fetch, which is why details are carried as strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// There is no artwork at the requested path.
    #[error("artwork not found")]
    NotFound,
    /// The server refused to hand out the artwork, with the given status.
    #[error("access to artwork denied: {0}")]
    PermissionDenied(String),
    /// The server did not respond in time.
    #[error("artwork download timed out after {0:?}")]
    Timeout(Duration),
    /// Any other failure, such as a lost connection, failed name resolution, or a server error.
    ///
    /// Carries the server status or the innermost cause of the failure.
    #[error("artwork download failed: {0}")]
    DownloadError(String),
    /// The fetch was torn down before it could produce a result.
    #[error("artwork fetch was cancelled")]
    InternalError,
}

impl FetchError {
    /// Creates a [`DownloadError`](Self::DownloadError) from the innermost cause of `error`.
    pub fn download_error(error: &dyn Error) -> Self {
        let mut cause = error;
        while let Some(source) = cause.source() {
            cause = source;
        }

        let message = cause.to_string();
        // TLS failures come with long, unhelpful details
        let message = if message.contains("certificate verify failed") {
            "certificate verify failed".to_owned()
        } else if message.contains("SSL routines") {
            "SSL error".to_owned()
        } else {
            message
        };

        Self::DownloadError(message)
    }

    /// A short, stable name used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            FetchError::NotFound => "notfound",
            FetchError::PermissionDenied(_) => "permissiondenied",
            FetchError::Timeout(_) => "timeout",
            FetchError::DownloadError(_) => "downloaderror",
            FetchError::InternalError => "internalerror",
        }
    }
}

/// An error that happens when loading a decoded image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The image bytes could not be fetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The image bytes were fetched, but do not form a valid image.
    #[error("malformed image: {0}")]
    Decode(String),
}

impl From<image::ImageError> for ImageError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// The result of fetching artwork bytes.
pub type FetchResult<T> = Result<T, FetchError>;
