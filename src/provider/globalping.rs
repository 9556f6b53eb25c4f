use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};

use crate::schema::Probe;

use super::api::MeasurementApi;
use super::types::{
    CreateError, CreateRequest, LocationSpec, Measurement, RateLimitState,
};

const API_BASE: &str = "https://api.globalping.io/v1";

/// Poll interval while a measurement is still in progress.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Globalping REST adapter
///
/// API reference:
/// https://globalping.io/docs/api.globalping.io
///
/// One client per credential; the bearer token decides which quota
/// the created measurements consume.
pub struct GlobalpingClient {
    http: reqwest::Client,
    token: String,
    base: String,
}

impl GlobalpingClient {
    pub fn new(token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            base: API_BASE.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Maps a `LocationSpec` onto the wire format.
    ///
    /// - Magic selector and fully-specified probes become a
    ///   single-element location array with `limit: 1`.
    /// - A session handle is passed as a bare measurement id string,
    ///   which routes through the same probe as that measurement.
    fn locations_value(location: &LocationSpec) -> Value {
        match location {
            LocationSpec::Magic { selector } => json!([{
                "magic": selector,
                "limit": 1,
            }]),
            LocationSpec::Probe(loc) => json!([{
                "country": loc.country,
                "city": loc.city,
                "network": loc.network,
                "limit": 1,
            }]),
            LocationSpec::Session(id) => json!(id),
        }
    }
}

/// Error body shape returned by the API on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct CreatedMeasurement {
    id: String,
}

// Wire shape of GET /v1/limits
#[derive(Debug, Deserialize)]
struct LimitsBody {
    #[serde(rename = "rateLimit")]
    rate_limit: LimitsRateLimit,
}

#[derive(Debug, Deserialize)]
struct LimitsRateLimit {
    measurements: LimitsMeasurements,
}

#[derive(Debug, Deserialize)]
struct LimitsMeasurements {
    create: LimitsCreate,
}

#[derive(Debug, Deserialize)]
struct LimitsCreate {
    remaining: u64,
    reset: u64,
}

#[async_trait::async_trait]
impl MeasurementApi for GlobalpingClient {
    async fn create_measurement(
        &self,
        req: &CreateRequest,
    ) -> Result<String, CreateError> {
        let body = json!({
            "type": "http",
            "target": req.target,
            "measurementOptions": {
                "request": { "path": req.path, "method": "GET" },
                "protocol": req.protocol,
            },
            "locations": Self::locations_value(&req.location),
        });

        let response = self
            .http
            .post(self.url("/measurements"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CreateError::Other(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let created: CreatedMeasurement = response
                .json()
                .await
                .map_err(|e| CreateError::Other(e.to_string()))?;
            return Ok(created.id);
        }

        // Classify the failure; the loops react differently to
        // quota exhaustion and missing probes.
        if status.as_u16() == 422 {
            return Err(CreateError::NoMatchingProbes);
        }

        match response.json::<ApiErrorBody>().await {
            Ok(body) if body.error.kind == "rate_limit_exceeded" => {
                Err(CreateError::RateLimited)
            }
            Ok(body) => Err(CreateError::Other(format!(
                "{}: {}",
                body.error.kind, body.error.message
            ))),
            Err(_) => Err(CreateError::Other(format!("HTTP {}", status))),
        }
    }

    async fn await_measurement(&self, id: &str) -> anyhow::Result<Measurement> {
        // The provider enforces its own measurement timeout, so an
        // in-progress measurement always reaches a terminal state.
        loop {
            let measurement: Measurement = self
                .http
                .get(self.url(&format!("/measurements/{}", id)))
                .bearer_auth(&self.token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if measurement.status != "in-progress" {
                return Ok(measurement);
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn get_limits(&self) -> anyhow::Result<RateLimitState> {
        let body: LimitsBody = self
            .http
            .get(self.url("/limits"))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(RateLimitState {
            remaining: body.rate_limit.measurements.create.remaining,
            reset_secs: body.rate_limit.measurements.create.reset,
        })
    }

    async fn list_probes(&self) -> anyhow::Result<Vec<Probe>> {
        let probes: Vec<Probe> = self
            .http
            .get(self.url("/probes"))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(probes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProbeLocation;

    #[test]
    fn session_location_is_a_bare_id() {
        let v = GlobalpingClient::locations_value(&LocationSpec::Session(
            "abc123".into(),
        ));
        assert_eq!(v, json!("abc123"));
    }

    #[test]
    fn probe_location_is_fully_specified_with_limit_one() {
        let loc = ProbeLocation {
            country: Some("DE".into()),
            city: Some("Berlin".into()),
            network: Some("Deutsche Telekom".into()),
            ..Default::default()
        };
        let v = GlobalpingClient::locations_value(&LocationSpec::Probe(loc));
        assert_eq!(v[0]["city"], "Berlin");
        assert_eq!(v[0]["limit"], 1);
    }

    #[test]
    fn limits_body_deserializes() {
        let raw = r#"{"rateLimit":{"measurements":{"create":
            {"type":"ip","limit":500,"remaining":42,"reset":120}}}}"#;
        let body: LimitsBody = serde_json::from_str(raw).unwrap();
        assert_eq!(body.rate_limit.measurements.create.remaining, 42);
        assert_eq!(body.rate_limit.measurements.create.reset, 120);
    }
}
