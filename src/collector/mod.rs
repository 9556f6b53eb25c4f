//! Collection orchestration
//!
//! One shard = one credential plus its assigned vantage points,
//! running as an independent task with its own provider client,
//! driver and rate-limit gate. Shards share only the injected
//! coverage tracker and the output writer.
//!
//! Modes:
//! - `pinned`:   session-pinned loop per named location
//! - `sweep`:    one fresh measurement per probe in the selection
//! - `fullscan`: coverage-driven exhaustive scan over the directory

pub mod pinned;
pub mod sweep;
pub mod fullscan;

use std::sync::Arc;

use log::{error, info};
use tokio::time::Duration;

use crate::config::{Config, Mode};
use crate::coverage::CoverageTracker;
use crate::driver::MeasurementDriver;
use crate::limits::{BackoffPolicy, RateLimitGate};
use crate::output::ResultsWriter;
use crate::provider::api::MeasurementApi;
use crate::schema::TraceResult;
use crate::submit::DashboardSubmitter;
use crate::util::{dedupe_probes, select_probes};

/// Everything a collection loop needs, bundled per shard.
pub struct ShardContext {
    pub driver: MeasurementDriver,
    pub gate: RateLimitGate,
    pub writer: Arc<ResultsWriter>,
    pub coverage: CoverageTracker,
    pub submitter: Option<Arc<DashboardSubmitter>>,

    /// Delay between attempts after transient failures
    pub transient_retry: BackoffPolicy,
}

impl ShardContext {
    pub fn new(
        api: Arc<dyn MeasurementApi>,
        cfg: &Config,
        writer: Arc<ResultsWriter>,
        coverage: CoverageTracker,
        submitter: Option<Arc<DashboardSubmitter>>,
    ) -> Self {
        Self {
            driver: MeasurementDriver::new(api.clone(), cfg.protocol),
            gate: RateLimitGate::new(api),
            writer,
            coverage,
            submitter,
            transient_retry: BackoffPolicy::Fixed(Duration::from_secs(5)),
        }
    }

    /// Persists a batch of records to the CSV stream and queues them
    /// for dashboard submission.
    pub async fn persist(&self, results: &[TraceResult]) -> anyhow::Result<()> {
        self.writer.append_all(results).await?;

        if let Some(submitter) = &self.submitter {
            for r in results {
                submitter.push(r).await;
            }
        }
        Ok(())
    }
}

/// Keeps every `count`-th probe starting at `index`.
///
/// Used when no location selectors are given: each credential shard
/// takes an interleaved slice of the full probe directory so shards
/// never probe the same vantage point.
fn stride_subset(
    probes: Vec<crate::schema::Probe>,
    (index, count): (usize, usize),
) -> Vec<crate::schema::Probe> {
    if count <= 1 {
        return probes;
    }
    probes
        .into_iter()
        .enumerate()
        .filter(|(i, _)| i % count == index)
        .map(|(_, p)| p)
        .collect()
}

/// Runs one credential shard to completion.
///
/// Iteration order is outer over hosts, inner over the shard's
/// vantage points. A failing location is logged with its host and
/// skipped; it never aborts the shard.
pub async fn run_shard(
    api: Arc<dyn MeasurementApi>,
    cfg: Arc<Config>,
    assigned_locations: Vec<String>,
    probe_stride: (usize, usize),
    writer: Arc<ResultsWriter>,
    coverage: CoverageTracker,
    submitter: Option<Arc<DashboardSubmitter>>,
) -> anyhow::Result<()> {
    let ctx = ShardContext::new(
        api.clone(),
        &cfg,
        writer,
        coverage,
        submitter,
    );

    match cfg.mode {
        Mode::Pinned => {
            for host in &cfg.hosts {
                for location in &assigned_locations {
                    if let Err(e) = pinned::collect_from_location(
                        &ctx,
                        host,
                        location,
                        cfg.runs_per_location,
                    )
                    .await
                    {
                        error!(
                            "Failed to collect from location {} for host {}: {}",
                            location, host, e
                        );
                    }
                }
            }
        }

        Mode::Sweep => {
            let probes = api.list_probes().await?;

            for host in &cfg.hosts {
                if assigned_locations.is_empty() {
                    // No selectors: the full provider-supplied list,
                    // interleaved across credential shards
                    let subset =
                        stride_subset(probes.clone(), probe_stride);
                    sweep::sweep_probes(&ctx, host, &subset).await?;
                } else {
                    for location in &assigned_locations {
                        let subset =
                            select_probes(&probes, Some(location.as_str()));
                        info!(
                            "Selector '{}' matched {} probes",
                            location,
                            subset.len()
                        );
                        if let Err(e) =
                            sweep::sweep_probes(&ctx, host, &subset).await
                        {
                            error!(
                                "Failed to collect from location {} for host {}: {}",
                                location, host, e
                            );
                        }
                    }
                }
            }
        }

        Mode::Fullscan => {
            let directory = api.list_probes().await?;
            let probes: Vec<_> = if assigned_locations.is_empty() {
                directory
            } else {
                assigned_locations
                    .iter()
                    .flat_map(|l| select_probes(&directory, Some(l.as_str())))
                    .collect()
            };
            // One probe per (city, network) pair; duplicates reach
            // the same edge entry points.
            let probes = stride_subset(dedupe_probes(probes), probe_stride);

            for host in &cfg.hosts {
                fullscan::full_scan(&ctx, host, &probes, cfg.fanout).await?;
            }
        }
    }

    Ok(())
}
