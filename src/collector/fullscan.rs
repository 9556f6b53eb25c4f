use std::collections::HashSet;
use std::sync::atomic::Ordering;

use futures_util::future::join_all;
use log::{info, warn};
use tokio::time::{Duration, sleep};

use crate::driver::MeasurementOutcome;
use crate::metrics::METRICS;
use crate::schema::Probe;

use super::ShardContext;

/// Courtesy pause across the whole scan, so a long run does not
/// hammer the provider at full quota speed indefinitely.
const BACK_OFF_EVERY_N_REQUESTS: u64 = 5_000;
const BACK_OFF_TIME: Duration = Duration::from_secs(60);

/// Failures in a row before a probe is abandoned. Keeps an offline
/// or deactivated probe from stalling the scan indefinitely.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Per-probe scan state.
///
/// `advance` moves the cursor and resets everything probe-local:
/// the request count, the failure streak, and the set of
/// colocations this vantage point has seen.
struct ProbeCursor {
    index: usize,
    current_requests_done: u64,
    consecutive_failures: u32,
    seen_colocations: HashSet<String>,
}

impl ProbeCursor {
    fn new() -> Self {
        Self {
            index: 0,
            current_requests_done: 0,
            consecutive_failures: 0,
            seen_colocations: HashSet::new(),
        }
    }

    fn advance(&mut self) {
        self.index += 1;
        self.current_requests_done = 0;
        self.consecutive_failures = 0;
        self.seen_colocations.clear();
        METRICS.current_probe_index.store(self.index, Ordering::Relaxed);
        METRICS.probes_exhausted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Coverage-driven exhaustive scan over the probe list.
///
/// Per probe, fresh measurements are issued until either the
/// coverage rule says every colocation this vantage point has seen
/// is saturated, or the failure streak forces advancement. The
/// discovery statistics live in the shared tracker, so colocations
/// confirmed by earlier probes still count, but each probe must
/// locally confirm the colocations it reaches before being
/// abandoned.
///
/// `fanout > 1` issues that many concurrent creations per iteration
/// and folds the successes into coverage afterwards, trading
/// per-request adaptivity for throughput.
pub async fn full_scan(
    ctx: &ShardContext,
    host: &str,
    probes: &[Probe],
    fanout: usize,
) -> anyhow::Result<()> {
    info!(
        "Starting full scan for {} (Target: {} probes)",
        host,
        probes.len()
    );

    let min_threshold = ctx.coverage.config().min_requests_threshold;
    let mut total_requests_done: u64 = 0;
    let mut cursor = ProbeCursor::new();

    while cursor.index < probes.len() {
        let mut local_remaining = ctx.gate.admit().await;

        while local_remaining > 0 && cursor.index < probes.len() {
            let location = probes[cursor.index].location.clone();
            let batch = fanout.clamp(1, local_remaining as usize);

            let outcomes = if batch == 1 {
                vec![ctx.driver.create_fresh(host, location.clone()).await]
            } else {
                join_all(
                    (0..batch)
                        .map(|_| ctx.driver.create_fresh(host, location.clone())),
                )
                .await
            };

            let mut batch_had_success = false;

            for outcome in outcomes {
                match outcome {
                    MeasurementOutcome::Complete { results, .. } => {
                        local_remaining = local_remaining.saturating_sub(1);
                        total_requests_done += 1;
                        cursor.current_requests_done += 1;
                        cursor.consecutive_failures = 0;
                        batch_had_success = true;

                        ctx.persist(&results).await?;

                        for r in &results {
                            let (Some(colo), Some(id)) = (
                                r.balancer_colocation_center.as_deref(),
                                r.balancer_id.as_deref(),
                            ) else {
                                continue;
                            };
                            cursor.seen_colocations.insert(colo.to_string());
                            ctx.coverage.record(colo, id);
                        }
                    }

                    MeasurementOutcome::RateLimited => {
                        // Nothing was consumed; re-gate before
                        // continuing with this probe.
                        info!(
                            "Rate limit exceeded during scan. Refreshing \
                             limits..."
                        );
                        local_remaining = 0;
                    }

                    MeasurementOutcome::SessionInvalid
                    | MeasurementOutcome::Failed(_) => {
                        // Wasted attempt against this probe.
                        local_remaining = local_remaining.saturating_sub(1);
                        total_requests_done += 1;
                        cursor.current_requests_done += 1;
                        cursor.consecutive_failures += 1;
                    }
                }

                if total_requests_done > 0
                    && total_requests_done % BACK_OFF_EVERY_N_REQUESTS == 0
                {
                    info!(
                        "Backing off after {} requests...",
                        total_requests_done
                    );
                    sleep(BACK_OFF_TIME).await;
                }
            }

            if cursor.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                info!(
                    "Max consecutive failures for probe reached, moving to \
                     next probe {} of {}",
                    cursor.index + 1,
                    probes.len()
                );
                cursor.advance();
                continue;
            }

            if !batch_had_success && cursor.consecutive_failures > 0 {
                warn!(
                    "Failed to create measurement for {} ({}), retrying...",
                    probes[cursor.index].location.label(),
                    host
                );
                sleep(ctx.transient_retry.delay(0, None)).await;
                continue;
            }

            if cursor.current_requests_done > min_threshold
                && !ctx.coverage.should_continue(&cursor.seen_colocations)
            {
                info!(
                    "No new IDs found, moving to next probe {} of {}",
                    cursor.index + 1,
                    probes.len()
                );
                cursor.advance();
            }
        }
    }

    info!(
        "Full scan for {} complete ({} requests)",
        host, total_requests_done
    );
    Ok(())
}
