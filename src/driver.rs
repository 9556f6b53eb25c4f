use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::warn;
use tokio::time::{Duration, sleep};

use crate::config::Protocol;
use crate::limits::BackoffPolicy;
use crate::metrics::METRICS;
use crate::provider::api::MeasurementApi;
use crate::provider::types::{
    CreateError, CreateRequest, LocationSpec, MeasurementEntry,
};
use crate::schema::TraceResult;
use crate::trace::{TRACE_PATH, parse_trace};

/// Outcome of one create-and-await cycle.
///
/// The loops branch on these outcomes:
/// - `Complete`: persisted and counted; `id` doubles as the session
///   handle for pinned-mode reuse.
/// - `RateLimited`: quota rejected the creation; the caller zeroes
///   its shadow counter and re-gates.
/// - `SessionInvalid`: no probe matched (422-equivalent); in pinned
///   mode the root must be re-created, in fresh mode the vantage
///   point failed this attempt.
/// - `Failed`: per-measurement fatal. The attempt is not retried on
///   the same handle; the caller decides whether the vantage point
///   survives.
#[derive(Debug)]
pub enum MeasurementOutcome {
    Complete { id: String, results: Vec<TraceResult> },
    RateLimited,
    SessionInvalid,
    Failed(String),
}

/// Drives single measurements against the provider.
///
/// Two creation modes feed the same await/parse/enrich pipeline:
/// - Pinned-session: a root measurement selects the entry point
///   once; follow-ups reuse its id to route through the same path.
/// - Fresh: every request fully specifies the vantage point,
///   bypassing the session mechanism.
pub struct MeasurementDriver {
    api: Arc<dyn MeasurementApi>,
    protocol: Protocol,
    error_backoff: BackoffPolicy,
}

impl MeasurementDriver {
    pub fn new(api: Arc<dyn MeasurementApi>, protocol: Protocol) -> Self {
        Self {
            api,
            protocol,
            error_backoff: BackoffPolicy::Fixed(Duration::from_secs(1)),
        }
    }

    /// Replaces the creation-error backoff. Used by simulated-time
    /// tests.
    pub fn with_error_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.error_backoff = policy;
        self
    }

    /// Creates the root of a pinned session: one probe picked by a
    /// free-text selector. The returned id is the session handle.
    pub async fn create_pinned_root(
        &self,
        host: &str,
        selector: &str,
    ) -> MeasurementOutcome {
        self.create_and_await(host, LocationSpec::Magic {
            selector: selector.to_string(),
        })
        .await
    }

    /// Creates a follow-up measurement through an existing session.
    pub async fn create_from_session(
        &self,
        host: &str,
        session_id: &str,
    ) -> MeasurementOutcome {
        self.create_and_await(host, LocationSpec::Session(
            session_id.to_string(),
        ))
        .await
    }

    /// Creates an independent measurement at a fully-specified
    /// vantage point.
    pub async fn create_fresh(
        &self,
        host: &str,
        location: crate::schema::ProbeLocation,
    ) -> MeasurementOutcome {
        self.create_and_await(host, LocationSpec::Probe(location)).await
    }

    /// The shared create + await + parse + enrich cycle.
    async fn create_and_await(
        &self,
        host: &str,
        location: LocationSpec,
    ) -> MeasurementOutcome {
        let req = CreateRequest {
            target: host.to_string(),
            path: TRACE_PATH.to_string(),
            protocol: self.protocol.as_provider_str().to_string(),
            location,
        };

        let id = match self.api.create_measurement(&req).await {
            Ok(id) => id,
            Err(CreateError::RateLimited) => {
                return MeasurementOutcome::RateLimited;
            }
            Err(CreateError::NoMatchingProbes) => {
                return MeasurementOutcome::SessionInvalid;
            }
            Err(CreateError::Other(msg)) => {
                // Unclassified creation failures still consume one
                // quota unit as a wasted attempt; back off briefly
                // before handing the decision back to the loop.
                warn!("Failed to create measurement for {}: {}", host, msg);
                METRICS.measurements_failed.fetch_add(1, Ordering::Relaxed);
                sleep(self.error_backoff.delay(0, None)).await;
                return MeasurementOutcome::Failed(msg);
            }
        };

        let measurement = match self.api.await_measurement(&id).await {
            Ok(m) => m,
            Err(e) => {
                METRICS.measurements_failed.fetch_add(1, Ordering::Relaxed);
                return MeasurementOutcome::Failed(format!(
                    "awaiting measurement {}: {}",
                    id, e
                ));
            }
        };

        if measurement.status != "finished" {
            METRICS.measurements_failed.fetch_add(1, Ordering::Relaxed);
            return MeasurementOutcome::Failed(format!(
                "measurement {} ended as '{}'",
                id, measurement.status
            ));
        }

        let results: Vec<TraceResult> = measurement
            .results
            .iter()
            .filter_map(enrich_entry)
            .collect();

        if results.is_empty() {
            METRICS.measurements_failed.fetch_add(1, Ordering::Relaxed);
            return MeasurementOutcome::Failed(format!(
                "measurement {} returned no usable body",
                id
            ));
        }

        METRICS.measurements_created.fetch_add(1, Ordering::Relaxed);
        MeasurementOutcome::Complete { id, results }
    }
}

/// Decodes one probe's entry into a record.
///
/// The trace body supplies the backend-side fields; the probe
/// metadata and the provider's timing breakdown fill the client-side
/// fields directly, bypassing the text parser.
fn enrich_entry(entry: &MeasurementEntry) -> Option<TraceResult> {
    let body = entry.result.raw_body.as_deref()?;
    if body.is_empty() {
        return None;
    }

    let mut record = parse_trace(body);

    record.client_country = entry.probe.country.clone();
    record.client_city = entry.probe.city.clone();
    record.client_asn = entry.probe.asn;
    record.client_network = entry.probe.network.clone();

    if let Some(t) = entry.result.timings {
        record.latency_total = t.total;
        record.latency_dns = t.dns;
        record.latency_tcp = t.tcp;
        record.latency_tls = t.tls;
        record.latency_first_byte = t.first_byte;
        record.latency_download = t.download;
    }

    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{HttpResult, Measurement, RateLimitState, Timings};
    use crate::schema::{Probe, ProbeLocation};
    use std::sync::Mutex;

    /// Mock provider with a scripted create result and a fixed
    /// measurement snapshot.
    struct MockApi {
        create: Mutex<Vec<Result<String, CreateError>>>,
        measurement: Measurement,
    }

    #[async_trait::async_trait]
    impl MeasurementApi for MockApi {
        async fn create_measurement(
            &self,
            _req: &CreateRequest,
        ) -> Result<String, CreateError> {
            self.create
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok("m-default".into()))
        }

        async fn await_measurement(
            &self,
            _id: &str,
        ) -> anyhow::Result<Measurement> {
            Ok(self.measurement.clone())
        }

        async fn get_limits(&self) -> anyhow::Result<RateLimitState> {
            Ok(RateLimitState { remaining: 100, reset_secs: 0 })
        }

        async fn list_probes(&self) -> anyhow::Result<Vec<Probe>> {
            Ok(vec![])
        }
    }

    fn berlin() -> ProbeLocation {
        ProbeLocation {
            country: Some("DE".into()),
            city: Some("Berlin".into()),
            asn: Some(3320),
            network: Some("DTAG".into()),
            ..Default::default()
        }
    }

    fn finished(body: Option<&str>) -> Measurement {
        Measurement {
            status: "finished".into(),
            results: vec![MeasurementEntry {
                probe: berlin(),
                result: HttpResult {
                    status: Some(200),
                    raw_body: body.map(str::to_string),
                    timings: Some(Timings {
                        total: Some(123.0),
                        dns: Some(4.0),
                        first_byte: Some(80.0),
                        ..Default::default()
                    }),
                },
            }],
        }
    }

    fn driver(api: MockApi) -> MeasurementDriver {
        MeasurementDriver::new(Arc::new(api), Protocol::Http2)
            .with_error_backoff(BackoffPolicy::Fixed(Duration::ZERO))
    }

    #[tokio::test]
    async fn complete_outcome_is_parsed_and_enriched() {
        let api = MockApi {
            create: Mutex::new(vec![Ok("m-1".into())]),
            measurement: finished(Some("fl=abc\ncolo=FRA\nloc=DE")),
        };

        match driver(api).create_pinned_root("https://example.com", "Berlin").await {
            MeasurementOutcome::Complete { id, results } => {
                assert_eq!(id, "m-1");
                assert_eq!(results.len(), 1);
                let r = &results[0];
                assert_eq!(r.balancer_id.as_deref(), Some("abc"));
                assert_eq!(r.client_city.as_deref(), Some("Berlin"));
                assert_eq!(r.client_asn, Some(3320));
                assert_eq!(r.latency_total, Some(123.0));
                assert_eq!(r.latency_first_byte, Some(80.0));
            }
            other => panic!("expected Complete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn quota_rejection_maps_to_rate_limited() {
        let api = MockApi {
            create: Mutex::new(vec![Err(CreateError::RateLimited)]),
            measurement: finished(Some("fl=abc")),
        };
        assert!(matches!(
            driver(api).create_from_session("https://example.com", "m-0").await,
            MeasurementOutcome::RateLimited
        ));
    }

    #[tokio::test]
    async fn unmatched_target_maps_to_session_invalid() {
        let api = MockApi {
            create: Mutex::new(vec![Err(CreateError::NoMatchingProbes)]),
            measurement: finished(Some("fl=abc")),
        };
        assert!(matches!(
            driver(api).create_from_session("https://example.com", "m-0").await,
            MeasurementOutcome::SessionInvalid
        ));
    }

    #[tokio::test]
    async fn non_finished_terminal_status_is_failed() {
        let api = MockApi {
            create: Mutex::new(vec![Ok("m-2".into())]),
            measurement: Measurement {
                status: "failed".into(),
                results: vec![],
            },
        };
        assert!(matches!(
            driver(api).create_fresh("https://example.com", berlin()).await,
            MeasurementOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn empty_body_is_failed() {
        let api = MockApi {
            create: Mutex::new(vec![Ok("m-3".into())]),
            measurement: finished(Some("")),
        };
        assert!(matches!(
            driver(api).create_fresh("https://example.com", berlin()).await,
            MeasurementOutcome::Failed(_)
        ));
    }
}
