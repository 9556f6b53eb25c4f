use std::sync::atomic::Ordering;

use log::{info, warn};
use tokio::time::sleep;

use crate::driver::MeasurementOutcome;
use crate::metrics::METRICS;
use crate::schema::Probe;

use super::ShardContext;

/// Attempts per probe before it is skipped. Transient failures are
/// retried on the same vantage point; a probe missing from the
/// directory is skipped immediately.
const MAX_PROBE_ATTEMPTS: u32 = 3;

/// One fresh measurement per probe, in directory order.
///
/// Every request fully specifies its vantage point (country + city
/// + network), bypassing the session mechanism; sweeps want breadth,
/// not repeated samples through one entry point.
///
/// The cursor over the probe list is published through
/// `METRICS.current_probe_index` so a restarted run can resume
/// near where it stopped (best-effort, not transactional).
///
/// A probe that keeps failing is logged and skipped; it never
/// aborts the sweep.
pub async fn sweep_probes(
    ctx: &ShardContext,
    host: &str,
    probes: &[Probe],
) -> anyhow::Result<()> {
    info!(
        "Starting collection for {} ({} probes)",
        host,
        probes.len()
    );

    let total = probes.len();
    let mut measured: usize = 0;
    let mut index: usize = 0;
    let mut attempts: u32 = 0;

    while index < total {
        let mut local_remaining = ctx.gate.admit().await;

        // Inner loop consumes the admitted quota batch.
        while local_remaining > 0 && index < total {
            let location = &probes[index].location;
            info!("Creating measurement for {}...", location.label());

            match ctx.driver.create_fresh(host, location.clone()).await {
                MeasurementOutcome::Complete { results, .. } => {
                    local_remaining -= 1;
                    ctx.persist(&results).await?;

                    measured += 1;
                    attempts = 0;
                    index += 1;
                    METRICS.current_probe_index.store(index, Ordering::Relaxed);

                    if measured % 10 == 0 || index == total {
                        info!(
                            "Progress for {}: {}/{}",
                            host, index, total
                        );
                    }
                }

                MeasurementOutcome::RateLimited => {
                    // Shadow counter was stale; re-gate before
                    // retrying the same probe.
                    info!("Rate limit exceeded during sweep. Refreshing limits...");
                    local_remaining = 0;
                }

                MeasurementOutcome::SessionInvalid => {
                    // The probe vanished from the directory since
                    // listing; skip it.
                    warn!(
                        "No matching probe for {} ({}), skipping",
                        location.label(),
                        host
                    );
                    local_remaining -= 1;
                    attempts = 0;
                    index += 1;
                    METRICS.current_probe_index.store(index, Ordering::Relaxed);
                }

                MeasurementOutcome::Failed(msg) => {
                    local_remaining = local_remaining.saturating_sub(1);
                    attempts += 1;

                    if attempts >= MAX_PROBE_ATTEMPTS {
                        warn!(
                            "Measurement failed for {} via {}: {}; skipping \
                             probe after {} attempts",
                            host,
                            location.label(),
                            msg,
                            attempts
                        );
                        attempts = 0;
                        index += 1;
                        METRICS.current_probe_index.store(index, Ordering::Relaxed);
                    } else {
                        warn!(
                            "Measurement failed for {} via {}: {}; retrying",
                            host,
                            location.label(),
                            msg
                        );
                        sleep(ctx.transient_retry.delay(0, None)).await;
                    }
                }
            }
        }
    }

    info!(
        "Sweep for {} complete ({}/{} probes measured)",
        host, measured, total
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::coverage::CoverageTracker;
    use crate::driver::MeasurementDriver;
    use crate::limits::BackoffPolicy;
    use crate::output::ResultsWriter;
    use crate::provider::api::MeasurementApi;
    use crate::provider::types::{
        CreateError, CreateRequest, HttpResult, Measurement,
        MeasurementEntry, RateLimitState,
    };
    use crate::schema::ProbeLocation;
    use std::sync::{Arc, Mutex};
    use tokio::time::Duration;

    /// Scripted create results (front-to-back, default Ok once the
    /// script runs out) plus a creation counter.
    struct ScriptedApi {
        create: Mutex<Vec<Result<String, CreateError>>>,
        creations: Mutex<usize>,
    }

    impl ScriptedApi {
        fn new(mut script: Vec<Result<String, CreateError>>) -> Self {
            script.reverse();
            Self {
                create: Mutex::new(script),
                creations: Mutex::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl MeasurementApi for ScriptedApi {
        async fn create_measurement(
            &self,
            _req: &CreateRequest,
        ) -> Result<String, CreateError> {
            *self.creations.lock().unwrap() += 1;
            self.create
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok("m-ok".into()))
        }

        async fn await_measurement(
            &self,
            _id: &str,
        ) -> anyhow::Result<Measurement> {
            Ok(Measurement {
                status: "finished".into(),
                results: vec![MeasurementEntry {
                    probe: ProbeLocation::default(),
                    result: HttpResult {
                        status: Some(200),
                        raw_body: Some("fl=b0\ncolo=FRA".into()),
                        timings: None,
                    },
                }],
            })
        }

        async fn get_limits(&self) -> anyhow::Result<RateLimitState> {
            Ok(RateLimitState { remaining: 1000, reset_secs: 0 })
        }

        async fn list_probes(&self) -> anyhow::Result<Vec<Probe>> {
            Ok(vec![])
        }
    }

    fn probe(city: &str) -> Probe {
        Probe {
            location: ProbeLocation {
                city: Some(city.into()),
                network: Some("net".into()),
                country: Some("DE".into()),
                ..Default::default()
            },
        }
    }

    fn sweep_ctx(
        api: Arc<ScriptedApi>,
    ) -> (ShardContext, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "hosts": ["https://example.com"],
            "api_keys": ["k"],
            "mode": "sweep"
        }))
        .unwrap();

        let mut ctx = ShardContext::new(
            api.clone() as Arc<dyn MeasurementApi>,
            &cfg,
            Arc::new(ResultsWriter::create(dir.path()).unwrap()),
            CoverageTracker::new(cfg.coverage),
            None,
        );
        ctx.transient_retry = BackoffPolicy::Fixed(Duration::ZERO);
        ctx.driver = MeasurementDriver::new(
            api as Arc<dyn MeasurementApi>,
            cfg.protocol,
        )
        .with_error_backoff(BackoffPolicy::Fixed(Duration::ZERO));
        (ctx, dir)
    }

    fn rows_in(writer_path: &std::path::Path) -> usize {
        std::fs::read_to_string(writer_path)
            .unwrap()
            .lines()
            .count()
            - 1 // header
    }

    #[tokio::test]
    async fn vanished_probe_is_skipped_and_the_sweep_continues() {
        let _cursor = crate::metrics::cursor_guard();

        let api = Arc::new(ScriptedApi::new(vec![
            Err(CreateError::NoMatchingProbes),
            Ok("m-1".into()),
        ]));
        let (ctx, _dir) = sweep_ctx(api.clone());

        sweep_probes(&ctx, "https://example.com", &[probe("A"), probe("B")])
            .await
            .unwrap();

        assert_eq!(*api.creations.lock().unwrap(), 2);
        assert_eq!(rows_in(ctx.writer.path()), 1);
        assert_eq!(
            METRICS.current_probe_index.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_on_the_same_probe() {
        let _cursor = crate::metrics::cursor_guard();

        // Two failures stay under the budget; the third attempt
        // measures the probe.
        let api = Arc::new(ScriptedApi::new(vec![
            Err(CreateError::Other("boom".into())),
            Err(CreateError::Other("boom".into())),
            Ok("m-1".into()),
            Ok("m-2".into()),
        ]));
        let (ctx, _dir) = sweep_ctx(api.clone());

        sweep_probes(&ctx, "https://example.com", &[probe("A"), probe("B")])
            .await
            .unwrap();

        assert_eq!(*api.creations.lock().unwrap(), 4);
        assert_eq!(rows_in(ctx.writer.path()), 2);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_skips_the_probe() {
        let _cursor = crate::metrics::cursor_guard();

        let api = Arc::new(ScriptedApi::new(vec![
            Err(CreateError::Other("boom".into())),
            Err(CreateError::Other("boom".into())),
            Err(CreateError::Other("boom".into())),
            Ok("m-1".into()),
        ]));
        let (ctx, _dir) = sweep_ctx(api.clone());

        sweep_probes(&ctx, "https://example.com", &[probe("A"), probe("B")])
            .await
            .unwrap();

        // Probe A burns its three attempts and is skipped; probe B
        // is still measured and the cursor covers the full list.
        assert_eq!(*api.creations.lock().unwrap(), 4);
        assert_eq!(rows_in(ctx.writer.path()), 1);
        assert_eq!(
            METRICS.current_probe_index.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn quota_rejection_regates_without_advancing_the_cursor() {
        let _cursor = crate::metrics::cursor_guard();

        let api = Arc::new(ScriptedApi::new(vec![
            Err(CreateError::RateLimited),
            Ok("m-1".into()),
        ]));
        let (ctx, _dir) = sweep_ctx(api.clone());

        sweep_probes(&ctx, "https://example.com", &[probe("A")])
            .await
            .unwrap();

        // The rejected attempt is retried on the same probe after a
        // fresh gate; the probe is measured exactly once.
        assert_eq!(*api.creations.lock().unwrap(), 2);
        assert_eq!(rows_in(ctx.writer.path()), 1);
        assert_eq!(
            METRICS.current_probe_index.load(Ordering::Relaxed),
            1
        );
    }
}
