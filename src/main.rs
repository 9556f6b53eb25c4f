// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{error, info, warn};
use tokio::time::{Duration, sleep};

use lb_trace_collector::{collector, provider, util};
use lb_trace_collector::config::Config;
use lb_trace_collector::coverage::CoverageTracker;
use lb_trace_collector::metrics::METRICS;
use lb_trace_collector::output::ResultsWriter;
use lb_trace_collector::submit::DashboardSubmitter;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the load-balancer trace collector.
//
// Responsibilities:
// - Initialize logging
// - Load and validate configuration
// - Create the shared output writer and coverage tracker
// - Shard vantage points across credentials and spawn one
//   collection task per shard
// - Wait for all shards, flush the dashboard queue, exit
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .init();

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // NOTE:
    // - The config file contains API credentials.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let cfg: Config = load_config(&path)?;
    cfg.validate()?;
    let cfg = Arc::new(cfg);

    // --------------------------------------------------------
    // Shared run state
    //
    // One output file per run; the coverage tracker is the only
    // mutable state shared across credential shards.
    // --------------------------------------------------------
    let writer = Arc::new(ResultsWriter::create(Path::new(&cfg.results_dir))?);
    info!("Saving results to: {}", writer.path().display());

    let coverage = CoverageTracker::new(cfg.coverage);
    let submitter = cfg
        .dashboard
        .clone()
        .map(|d| Arc::new(DashboardSubmitter::new(d)));

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;

            info!(
                "[METRICS] shards={} created={} failed={} rl_waits={} \
                 balancers={} colos={} rows={} submitted={} probe_idx={}",
                METRICS.shards_active.load(Ordering::Relaxed),
                METRICS.measurements_created.load(Ordering::Relaxed),
                METRICS.measurements_failed.load(Ordering::Relaxed),
                METRICS.rate_limit_waits.load(Ordering::Relaxed),
                METRICS.balancers_discovered.load(Ordering::Relaxed),
                METRICS.colocations_seen.load(Ordering::Relaxed),
                METRICS.rows_written.load(Ordering::Relaxed),
                METRICS.records_submitted.load(Ordering::Relaxed),
                METRICS.current_probe_index.load(Ordering::Relaxed),
            );
        }
    });

    // --------------------------------------------------------
    // Shard assignment
    //
    // Location selectors are split round-robin across credentials.
    // With no selectors (sweep / fullscan over the whole probe
    // directory), every shard gets an interleaved slice of the
    // probe list instead.
    // --------------------------------------------------------
    let shard_count = cfg.api_keys.len();
    let location_shards: Vec<Vec<String>> = if cfg.locations.is_empty() {
        vec![Vec::new(); shard_count]
    } else {
        util::shard_round_robin(&cfg.locations, shard_count)
    };

    // Sharding never produces more buckets than locations; with
    // fewer locations than keys the surplus credentials get no work.
    if location_shards.len() < shard_count {
        warn!(
            "{} API keys but only {} location shards; {} credentials stay idle",
            shard_count,
            location_shards.len(),
            shard_count - location_shards.len()
        );
    }

    let mut handles = Vec::new();
    for (i, (key, locations)) in cfg
        .api_keys
        .iter()
        .zip(location_shards.into_iter())
        .enumerate()
    {
        let api = provider::client_for_key(key);
        let probe_stride = if cfg.locations.is_empty() {
            (i, shard_count)
        } else {
            (0, 1)
        };

        info!(
            "Starting shard {} ({} assigned locations)",
            i,
            locations.len()
        );
        METRICS.shards_active.fetch_add(1, Ordering::Relaxed);

        let cfg = cfg.clone();
        let writer = writer.clone();
        let coverage = coverage.clone();
        let submitter = submitter.clone();

        handles.push(tokio::spawn(async move {
            collector::run_shard(
                api,
                cfg,
                locations,
                probe_stride,
                writer,
                coverage,
                submitter,
            )
            .await
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Shard failed: {}", e),
            Err(e) => error!("Shard panicked: {}", e),
        }
        METRICS.shards_active.fetch_sub(1, Ordering::Relaxed);
    }

    if let Some(submitter) = &submitter {
        submitter.flush().await;
    }

    info!("All measurements completed");
    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
