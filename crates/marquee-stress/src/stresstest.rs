use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use marquee_service::config::Config as MarqueeConfig;
use marquee_service::images::ImageLoader;
use marquee_service::services::SharedServices;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{ParsedWorkload, WorkloadsConfig, prepare_workload, process_payload};

/// What happened while running one workload.
struct WorkloadReport {
    concurrency: usize,
    durations: DDSketch,
    failures: usize,
}

pub async fn perform_stresstest(
    service_config: MarqueeConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    let runtime = tokio::runtime::Handle::current();
    let shared_services = SharedServices::new(service_config, runtime)
        .context("failed to start artwork services")?;
    let images = Arc::clone(&shared_services.images);

    let workloads = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            prepare_workload(workload)
                .map(Arc::new)
                .with_context(|| format!("invalid workload {i}"))
        })
        .collect::<Result<Vec<_>>>()?;

    warmup(&images, &workloads).await;
    println!();

    let deadline = tokio::time::Instant::now() + duration;
    let tasks = workloads.into_iter().map(|workload| {
        let images = Arc::clone(&images);
        tokio::spawn(run_workload(images, workload, deadline))
    });
    let reports = futures::future::join_all(tasks).await;

    for (i, report) in reports.into_iter().enumerate() {
        let report = report.context("workload panicked")?;
        print_report(i, &report, duration);
    }

    let (count, cost) = images.memory_usage();
    println!();
    println!("Decoded images in memory: {count} ({cost} bytes)");

    Ok(())
}

/// Runs every workload once, filling the decoded image cache.
async fn warmup(images: &Arc<ImageLoader>, workloads: &[Arc<ParsedWorkload>]) {
    let start = Instant::now();

    let tasks = workloads.iter().map(|workload| {
        let images = Arc::clone(images);
        let workload = Arc::clone(workload);
        tokio::spawn(async move {
            if let Err(error) = process_payload(&images, &workload).await {
                tracing::warn!(error = &error as &dyn std::error::Error, "Warmup failed");
            }
        })
    });
    futures::future::join_all(tasks).await;

    println!("Warmup: {:?}", start.elapsed());
}

/// Keeps `concurrency` operations of `workload` running until `deadline`.
async fn run_workload(
    images: Arc<ImageLoader>,
    workload: Arc<ParsedWorkload>,
    deadline: tokio::time::Instant,
) -> WorkloadReport {
    let concurrency = workload.concurrency();
    let durations = Arc::new(Mutex::new(DDSketch::default()));
    let failures = Arc::new(AtomicUsize::new(0));
    let semaphore = Arc::new(Semaphore::new(concurrency));

    // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            _ = &mut sleep => break,
            permit = semaphore.clone().acquire_owned() => {
                let Ok(permit) = permit else {
                    break;
                };
                let images = Arc::clone(&images);
                let workload = Arc::clone(&workload);
                let durations = Arc::clone(&durations);
                let failures = Arc::clone(&failures);

                let hub = sentry::Hub::new_from_top(sentry::Hub::current());
                let ctx = sentry::TransactionContext::new("stresstest", "load artwork");
                let transaction = hub.start_transaction(ctx);

                let operation = async move {
                    let start = Instant::now();
                    if process_payload(&images, &workload).await.is_err() {
                        failures.fetch_add(1, Ordering::Relaxed);
                    }
                    transaction.finish();

                    if let Ok(mut durations) = durations.lock() {
                        durations.add(start.elapsed().as_secs_f64());
                    }
                    drop(permit);
                };
                tokio::spawn(operation.bind_hub(hub));
            }
        }
    }

    // All permits being available again means all operations have finished.
    let _permits = semaphore.acquire_many(concurrency as u32).await;

    let durations = match durations.lock() {
        Ok(mut durations) => std::mem::take(&mut *durations),
        Err(_) => DDSketch::default(),
    };

    WorkloadReport {
        concurrency,
        durations,
        failures: failures.load(Ordering::Relaxed),
    }
}

fn print_report(i: usize, report: &WorkloadReport, duration: Duration) {
    let WorkloadReport {
        concurrency,
        durations,
        failures,
    } = report;

    let ops = durations.count();
    let ops_ps = ops as f32 / duration.as_secs_f32();
    println!(
        "Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {failures} failed"
    );
    if ops == 0 {
        return;
    }

    let seconds = |value: Option<f64>| Duration::from_secs_f64(value.unwrap_or_default());
    let avg = seconds(durations.sum().map(|sum| sum / ops as f64));
    let p50 = seconds(durations.quantile(0.5).ok().flatten());
    let p90 = seconds(durations.quantile(0.9).ok().flatten());
    let p99 = seconds(durations.quantile(0.99).ok().flatten());
    println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
}
