//! # Marquee Caching infrastructure
//!
//! Artwork is requested constantly while scrolling through lists of movies and shows, very often
//! for the same paths at the same time. This module includes the two layers that keep these
//! requests from turning into redundant downloads and redundant decode work.
//!
//! ## Cache Layers
//!
//! - An in-flight layer ([`InFlightTracker`]) which does request coalescing: concurrent requests
//!   for the same [`CacheKey`] share a single computation. Entries only exist while their
//!   computation is running, and are removed before the result is handed out, on success and
//!   failure alike. Failures are therefore never cached, and the next request will try again.
//!   There is one tracker for downloads, and one for image loads which download, decode and store
//!   an image in one go.
//! - An in-memory layer ([`BoundedCache`]) holding decoded images, bounded both by the number of
//!   images and by the total size of their pixel buffers. When full, the least recently used
//!   images are evicted.
//!
//! Raw bytes only ever pass through the in-flight layer. Only decoded images are retained, see
//! [`ImageLoader`](crate::images::ImageLoader) for how both layers are combined.
//!
//! ### Metrics
//!
//! - `images.access`: All decoded image accesses.
//! - `images.memory.hit`: Accesses served by the in-memory layer.
//! - `images.inflight.hit`: Computations that were joined instead of started, tagged with their
//!   `kind` (`fetch` or `decode`).
//! - `images.inflight.miss`: Computations that were started, tagged with their `kind`.
//! - `images.fetch`: Completed fetches, tagged with their `status`.
//! - `images.fetch.size`: The size of successfully downloaded payloads.
//! - `images.decoded.size`: The cost of successfully decoded images.
//! - `images.decode.failed`: Fetched payloads that were not valid images.
//! - `images.memory.evicted`: Decoded images evicted to make room for others.
//! - `images.memory.refused`: Decoded images too large to be cached at all.
//! - `images.memory.cost`: A gauge of the total cost of all decoded images in memory.
//!
//! ### Configuration
//!
//! The in-flight layer is always active. The limits of the in-memory layer are configured via
//! [`InMemoryCacheConfig`](crate::config::InMemoryCacheConfig), defaulting to 100 images and
//! 50 MiB.
//!
//! ## [`FetchError`] / [`ImageError`]
//!
//! Every failure to fetch bytes is a [`FetchError`]. These are cloned to every caller that joined
//! the failed fetch. [`ImageError`] additionally distinguishes payloads that were fetched fine but
//! could not be decoded.

mod cache_key;
mod fetch_error;
mod inflight;
mod memory;

pub use cache_key::CacheKey;
pub use fetch_error::{FetchError, FetchResult, ImageError};
pub use inflight::InFlightTracker;
pub use memory::BoundedCache;
