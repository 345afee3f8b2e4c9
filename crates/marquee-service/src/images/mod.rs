//! Loading of poster and backdrop artwork.
//!
//! The [`ImageLoader`] sits between the UI and the network. Concurrent loads of the same path are
//! collapsed into a single fetch by an [`InFlightTracker`], and successfully decoded images are
//! kept in a [`BoundedCache`] so that later loads do not hit the network at all.
//!
//! Image loads are collapsed as a whole: downloading, decoding and storing an image is a single
//! computation, which stays registered until the image is in memory. Decoding happens on the
//! blocking thread pool.
//!
//! Raw byte loads via [`ImageLoader::load_raw`] are only deduplicated while they are running, the
//! bytes themselves are never retained. Only decoded images are cached.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use image::Rgb;
use parking_lot::Mutex;

use crate::caching::{BoundedCache, CacheKey, FetchError, FetchResult, ImageError, InFlightTracker};
use crate::config::InMemoryCacheConfig;
use crate::download::{FetcherRef, fetch_owned};

mod decode;

pub use self::decode::DecodedImage;

type DecodedCache = Arc<Mutex<BoundedCache<Arc<DecodedImage>>>>;

/// Loads artwork bytes and decoded images by path.
///
/// Construct one per process, through [`SharedServices`](crate::services::SharedServices), and
/// share it.
pub struct ImageLoader {
    fetcher: FetcherRef,
    /// Running downloads, shared by raw and image loads.
    fetches: InFlightTracker<Bytes, FetchError>,
    /// Running loads of decoded images, each of which downloads, decodes and stores the image.
    decodes: InFlightTracker<Arc<DecodedImage>, ImageError>,
    decoded: DecodedCache,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("fetches", &self.fetches)
            .field("decodes", &self.decodes)
            .field("decoded", &self.decoded)
            .finish()
    }
}

impl ImageLoader {
    pub fn new(
        fetcher: FetcherRef,
        config: &InMemoryCacheConfig,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            fetcher,
            fetches: InFlightTracker::new("fetch", runtime.clone()),
            decodes: InFlightTracker::new("decode", runtime),
            decoded: Arc::new(Mutex::new(BoundedCache::from_config(config))),
        }
    }

    /// Loads the raw bytes for `path`.
    ///
    /// Returns `Ok(None)` without fetching anything if there is no path. Otherwise joins the fetch
    /// that is currently running for `path`, or starts a new one. The decoded image cache is
    /// neither consulted nor populated.
    pub async fn load_raw(&self, path: Option<&str>) -> FetchResult<Option<Bytes>> {
        let Some(path) = path else {
            return Ok(None);
        };

        let key = CacheKey::from(path);
        self.fetch(&key).await.map(Some)
    }

    /// Loads and decodes the image for `path`.
    ///
    /// Returns `Ok(None)` without fetching anything if there is no path. Images found in memory
    /// are returned right away. Otherwise the caller joins the load that is currently running for
    /// `path`, or starts a new one. All callers joining the same load receive the same image.
    pub async fn load_image(
        &self,
        path: Option<&str>,
    ) -> Result<Option<Arc<DecodedImage>>, ImageError> {
        let Some(path) = path else {
            return Ok(None);
        };

        metric!(counter("images.access") += 1);
        let cached = self.decoded.lock().get(path);
        if let Some(image) = cached {
            metric!(counter("images.memory.hit") += 1);
            return Ok(Some(image));
        }

        let key = CacheKey::from(path);
        self.decodes
            .acquire_or_join(&key, || self.decode_and_store(&key))
            .await
            .map(Some)
    }

    fn fetch(&self, key: &CacheKey) -> BoxFuture<'static, FetchResult<Bytes>> {
        let fetcher = Arc::clone(&self.fetcher);
        self.fetches.acquire_or_join(key, || fetch_owned(fetcher, key.clone()))
    }

    /// Fetches, decodes and stores the image for `key`.
    ///
    /// The image is stored before the load is removed from `decodes`, so a caller either finds
    /// the image in memory, joins the load, or starts one that finds the image in memory.
    fn decode_and_store(
        &self,
        key: &CacheKey,
    ) -> BoxFuture<'static, Result<Arc<DecodedImage>, ImageError>> {
        let fetches = self.fetches.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let decoded = Arc::clone(&self.decoded);
        let key = key.clone();

        Box::pin(async move {
            // The previous load might have completed right before this one was started.
            let cached = decoded.lock().peek(key.as_str());
            if let Some(image) = cached {
                return Ok(image);
            }

            let bytes = fetches
                .acquire_or_join(&key, || fetch_owned(fetcher, key.clone()))
                .await?;

            let decoding = tokio::task::spawn_blocking(move || DecodedImage::decode(&bytes));
            let image = match decoding.await {
                Ok(Ok(image)) => Arc::new(image),
                Ok(Err(err)) => {
                    metric!(counter("images.decode.failed") += 1);
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        path = key.as_str(),
                        "Failed to decode image",
                    );
                    return Err(err);
                }
                Err(err) => {
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        path = key.as_str(),
                        "Image decoding did not complete",
                    );
                    return Err(ImageError::Decode("decoding was aborted".into()));
                }
            };
            metric!(histogram("images.decoded.size") = image.cost());

            decoded.lock().put(key, Arc::clone(&image), image.cost());
            Ok(image)
        })
    }

    /// Returns the decoded image for `path` if it is currently held in memory.
    ///
    /// This never fetches or suspends, and does not count as a use of the image.
    pub fn cached_image(&self, path: Option<&str>) -> Option<Arc<DecodedImage>> {
        self.decoded.lock().peek(path?)
    }

    /// The average color of the image for `path`, if it is held in memory.
    pub fn placeholder_color(&self, path: Option<&str>) -> Option<Rgb<u8>> {
        self.cached_image(path).map(|image| image.average_color())
    }

    /// Drops the decoded image for `path` from memory.
    ///
    /// Returns `true` if an image was removed. A running fetch for `path` is not affected.
    pub fn invalidate(&self, path: &str) -> bool {
        self.decoded.lock().remove(path).is_some()
    }

    /// The number of downloads and image loads currently running.
    pub fn in_flight_count(&self) -> usize {
        self.fetches.in_flight_count() + self.decodes.in_flight_count()
    }

    /// The number of decoded images in memory, and their total cost.
    pub fn memory_usage(&self) -> (usize, u64) {
        let decoded = self.decoded.lock();
        (decoded.len(), decoded.total_cost())
    }
}

#[cfg(test)]
mod tests;
