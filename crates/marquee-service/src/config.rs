//! Configuration of the artwork loader, read from a YAML file.
//!
//! Every section and every field is optional and falls back to its default. Without a file the
//! defaults are used, an empty or unreadable one is rejected.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use sentry::types::Dsn;
use serde::Deserialize;
use url::Url;

/// The verbosity of the logs written by Marquee itself.
///
/// Logs of dependencies are kept at `INFO` at most, unless overridden via `RUST_LOG`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// How log lines are formatted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `pretty` when attached to a terminal, `simplified` otherwise.
    #[default]
    Auto,
    /// Multi-line, colored output.
    Pretty,
    /// One line per event, without colors.
    Simplified,
    /// One JSON object per line.
    Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Sets `RUST_BACKTRACE=1`, so that panics print a backtrace.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LogLevel::default(),
            format: LogFormat::default(),
            enable_backtraces: true,
        }
    }
}

/// Where and how metrics are reported.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// The `host:port` of a statsd server. Metrics are discarded if this is not set.
    ///
    /// Defaults to the `STATSD_SERVER` environment variable.
    pub statsd: Option<String>,
    /// Prepended to the name of every metric.
    pub prefix: String,
    /// If set, every metric is tagged with the host name under this tag.
    pub hostname_tag: Option<String>,
    /// Additional tags sent with every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: std::env::var("STATSD_SERVER").ok(),
            prefix: "marquee".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where poster and backdrop artwork is downloaded from.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ArtworkConfig {
    /// The URL that artwork paths are appended to.
    ///
    /// Artwork paths are opaque and usually start with a `/`, like
    /// `/kqjL17yufvn9OVLyXYpvtyrFfak.jpg`.
    pub base_url: Url,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://image.tmdb.org/t/p/w500")
                .expect("the default artwork url to be valid"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct InMemoryCacheConfig {
    /// The maximum number of decoded images held in memory.
    ///
    /// Defaults to `100`.
    pub decoded_count_limit: usize,
    /// Capacity (in bytes) for decoded images held in memory.
    ///
    /// The cost of an image is the size of its decoded pixel buffer, not the size of the
    /// downloaded file.
    ///
    /// Defaults to `50 MiB (= 52_428_800)`.
    pub decoded_cost_limit: u64,
}

impl Default for InMemoryCacheConfig {
    fn default() -> Self {
        let meg = 1024 * 1024;
        Self {
            decoded_count_limit: 100,
            decoded_cost_limit: 50 * meg,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfigs {
    /// Limits of the decoded image cache.
    pub in_memory: InMemoryCacheConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,
    pub metrics: Metrics,
    /// Internal errors are reported to Sentry if this is set.
    pub sentry_dsn: Option<Dsn>,
    pub artwork: ArtworkConfig,
    pub caches: CacheConfigs,
    /// The timeout for establishing a connection in a download.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// The timeout for receiving the response headers of a download.
    #[serde(with = "humantime_serde")]
    pub head_timeout: Duration,
    /// The maximum timeout for downloads, including the response body.
    #[serde(with = "humantime_serde")]
    pub max_download_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            artwork: ArtworkConfig::default(),
            caches: CacheConfigs::default(),
            connect_timeout: Duration::from_secs(1),
            head_timeout: Duration::from_secs(5),
            // Posters are a few hundred KiB at most, anything slower than this is not worth
            // waiting for.
            max_download_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Loads the configuration file at `path`, or the defaults if there is none.
    pub fn get(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Config::default());
        };

        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        Self::from_yaml(&yaml)
    }

    fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            bail!("config file empty");
        }

        serde_yaml::from_str(yaml).context("failed to parse config YAML")
    }
}
