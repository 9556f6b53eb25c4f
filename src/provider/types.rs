use serde::Deserialize;

use crate::schema::ProbeLocation;

// ------------------------------------------------------------
// Measurement creation
// ------------------------------------------------------------

/// Where a measurement should run.
///
/// The three variants correspond to the three creation paths the
/// collector uses:
/// - `Magic`: free-text selector, provider picks one matching probe.
///   Used to establish a pinned session root.
/// - `Probe`: fully specified vantage point, bypassing the session
///   mechanism. Used for exhaustive sweeps.
/// - `Session`: reuse of a previous measurement id, routing through
///   the same previously-selected entry point.
#[derive(Debug, Clone)]
pub enum LocationSpec {
    Magic { selector: String },
    Probe(ProbeLocation),
    Session(String),
}

/// Parameters of one measurement creation call.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Target host, e.g. "https://example.com"
    pub target: String,

    /// Request path on the target ("/cdn-cgi/trace")
    pub path: String,

    /// Provider-side protocol string ("HTTP" | "HTTPS" | "HTTP2")
    pub protocol: String,

    pub location: LocationSpec,
}

/// Creation failure classes that drive control flow.
///
/// - `RateLimited`: quota exhausted, caller must re-gate.
/// - `NoMatchingProbes`: 422-equivalent; in pinned mode this
///   invalidates the session.
/// - `Other`: anything else (transport faults included); retried
///   after a short backoff at the caller's discretion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateError {
    RateLimited,
    NoMatchingProbes,
    Other(String),
}

impl std::fmt::Display for CreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateError::RateLimited => write!(f, "rate limit exceeded"),
            CreateError::NoMatchingProbes => write!(f, "no matching probes"),
            CreateError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

// ------------------------------------------------------------
// Measurement results
// ------------------------------------------------------------

/// Terminal snapshot of a measurement, as reported by the provider.
#[derive(Debug, Deserialize, Clone)]
pub struct Measurement {
    /// Terminal status: "finished" on success
    pub status: String,

    #[serde(default)]
    pub results: Vec<MeasurementEntry>,
}

/// One probe's contribution to a measurement.
#[derive(Debug, Deserialize, Clone)]
pub struct MeasurementEntry {
    pub probe: ProbeLocation,
    pub result: HttpResult,
}

/// The HTTP-level outcome observed by a single probe.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct HttpResult {
    #[serde(default)]
    pub status: Option<i64>,

    /// Response body as returned by the target
    #[serde(rename = "rawBody", default)]
    pub raw_body: Option<String>,

    #[serde(default)]
    pub timings: Option<Timings>,
}

/// Timing breakdown in milliseconds.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct Timings {
    #[serde(default)]
    pub total: Option<f64>,

    #[serde(default)]
    pub dns: Option<f64>,

    #[serde(default)]
    pub tcp: Option<f64>,

    #[serde(default)]
    pub tls: Option<f64>,

    #[serde(rename = "firstByte", default)]
    pub first_byte: Option<f64>,

    #[serde(default)]
    pub download: Option<f64>,
}

// ------------------------------------------------------------
// Rate limits
// ------------------------------------------------------------

/// Snapshot of the provider's measurement-creation quota.
///
/// Ephemeral: fetched fresh before each batch and approximated by
/// a local shadow counter in between. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Creations left in the current window
    pub remaining: u64,

    /// Seconds until the window replenishes
    pub reset_secs: u64,
}
