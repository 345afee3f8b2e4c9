//! Provides the shared Marquee services and a way to initialize them.
//!
//! [`SharedServices`] initializes the artwork fetcher and the [`ImageLoader`] according to the
//! provided [`Config`]. It is meant to be created once at startup and held for the lifetime of
//! the application, handing out references to whoever needs to load artwork.
//!
//! The services require an asynchronous runtime for the fetches they spawn.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::download::{FetcherRef, HttpFetcher};
use crate::images::ImageLoader;

pub struct SharedServices {
    pub config: Config,
    pub fetcher: FetcherRef,
    pub images: Arc<ImageLoader>,
}

impl SharedServices {
    pub fn new(config: Config, io_pool: tokio::runtime::Handle) -> Result<Self> {
        let fetcher: FetcherRef = Arc::new(HttpFetcher::from_config(&config));

        Self::with_fetcher(config, fetcher, io_pool)
    }

    /// Creates the services around a custom [`ByteFetcher`](crate::download::ByteFetcher).
    pub fn with_fetcher(
        config: Config,
        fetcher: FetcherRef,
        io_pool: tokio::runtime::Handle,
    ) -> Result<Self> {
        let in_memory = &config.caches.in_memory;
        if in_memory.decoded_count_limit == 0 || in_memory.decoded_cost_limit == 0 {
            tracing::warn!("The decoded image cache is disabled by its limits");
        }

        let images = ImageLoader::new(Arc::clone(&fetcher), in_memory, io_pool);

        Ok(Self {
            config,
            fetcher,
            images: Arc::new(images),
        })
    }
}

impl std::fmt::Debug for SharedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedServices")
            .field("config", &self.config)
            .field("images", &self.images)
            .finish()
    }
}

/// Initializes metrics reporting if a statsd server is configured.
pub fn configure_metrics(config: &Config) -> Result<()> {
    let Some(statsd) = config.metrics.statsd.as_deref() else {
        return Ok(());
    };

    let mut tags = config.metrics.custom_tags.clone();
    if let Some(hostname_tag) = config.metrics.hostname_tag.clone() {
        match hostname::get().ok().and_then(|s| s.into_string().ok()) {
            Some(hostname) => {
                tags.insert(hostname_tag, hostname);
            }
            None => tracing::error!("could not read host name"),
        }
    }

    crate::metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
        .context("failed to configure statsd metrics")
}
