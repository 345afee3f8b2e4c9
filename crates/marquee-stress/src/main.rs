use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use marquee_service::config::Config as MarqueeConfig;
use marquee_service::logging::ensure_log_error;
use marquee_test::ArtworkServer;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Serve all files of this directory from a local server, instead of the configured base URL.
    #[arg(long, value_name = "DIR")]
    serve: Option<PathBuf>,

    /// Enable backtraces on panics.
    #[arg(long)]
    backtraces: bool,

    /// Report to a local Sentry sink.
    #[arg(long)]
    sentry: bool,

    /// Log JSON into the void, like in production, instead of to the console.
    #[arg(long)]
    tracing: bool,

    /// Send metrics to a local statsd sink.
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads = WorkloadsConfig::from_path(&cli.workloads)?;
    let service_config = MarqueeConfig::get(cli.config.as_deref())?;

    let logging_config = logging::Config {
        backtraces: cli.backtraces,
        sentry: cli.sentry,
        tracing: cli.tracing,
        metrics: cli.metrics,
    };
    // SAFETY: No other threads exist yet.
    let mut guard = unsafe { logging::init(logging_config, &service_config)? };
    let http_sink = guard.http_sink.take();
    let udp_sink = guard.udp_sink.take();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let result = runtime.block_on(async move {
        if let Some(sink) = http_sink {
            tokio::spawn(sink);
        }
        if let Some(sink) = udp_sink {
            tokio::spawn(sink);
        }

        run(cli.serve.as_deref(), service_config, workloads, cli.duration).await
    });

    if let Err(error) = &result {
        ensure_log_error(error);
    }
    result
}

async fn run(
    serve: Option<&Path>,
    mut service_config: MarqueeConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // keep the server alive until the stresstest is done
    let _server = match serve {
        Some(dir) => {
            let server = ArtworkServer::new();
            let count = serve_directory(&server, dir)?;
            println!("Serving {count} files from {}", dir.display());
            service_config.artwork.base_url = server.base_url();
            Some(server)
        }
        None => None,
    };

    perform_stresstest(service_config, workloads, duration).await
}

/// Puts all files below `dir` on the server, at their path relative to `dir`.
fn serve_directory(server: &ArtworkServer, dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut pending = vec![dir.to_owned()];

    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current)
            .with_context(|| format!("failed to read directory {}", current.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }

            let relative = path.strip_prefix(dir)?.to_string_lossy().replace('\\', "/");
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            server.insert(&relative, data);
            count += 1;
        }
    }

    Ok(count)
}
