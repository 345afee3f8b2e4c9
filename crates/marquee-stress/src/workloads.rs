use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use marquee_service::caching::ImageError;
use marquee_service::images::ImageLoader;

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    pub workloads: Vec<Workload>,
}

impl WorkloadsConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).context("failed to open workloads file")?;
        serde_yaml::from_reader(file).context("failed to parse workloads YAML")
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    pub paths: Vec<String>,
    #[serde(default)]
    pub mode: Mode,
}

/// How the artwork of a workload is loaded.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Raw bytes, which are never retained once their download has finished.
    Raw,
    /// Decoded images, which are served from memory when possible.
    #[default]
    Image,
}

/// A workload cycling through its paths, one path per operation.
#[derive(Debug)]
pub struct ParsedWorkload {
    concurrency: usize,
    mode: Mode,
    paths: Vec<String>,
    next: AtomicUsize,
}

impl ParsedWorkload {
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn next_path(&self) -> &str {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        &self.paths[index % self.paths.len()]
    }
}

pub fn prepare_workload(workload: Workload) -> Result<ParsedWorkload> {
    if workload.concurrency == 0 {
        bail!("workload concurrency must be at least 1");
    }
    if workload.paths.is_empty() {
        bail!("workload has no paths to load");
    }

    Ok(ParsedWorkload {
        concurrency: workload.concurrency,
        mode: workload.mode,
        paths: workload.paths,
        next: AtomicUsize::new(0),
    })
}

pub async fn process_payload(
    images: &ImageLoader,
    workload: &ParsedWorkload,
) -> Result<(), ImageError> {
    let path = workload.next_path();
    match workload.mode {
        Mode::Raw => {
            images.load_raw(Some(path)).await?;
        }
        Mode::Image => {
            images.load_image(Some(path)).await?;
        }
    }

    Ok(())
}
