use serde::Deserialize;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Target hosts and provider credentials
// - Vantage-point selectors and per-location request counts
// - Collection mode and protocol
// - Output and optional dashboard settings
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Target hosts behind the load-balancing edge,
    /// e.g. "https://example.com"
    pub hosts: Vec<String>,

    /// Provider API credentials.
    ///
    /// NOTE:
    /// - Keys are security-sensitive and must never be committed.
    /// - More than one key shards the vantage points across
    ///   independent concurrent tasks, one quota per key.
    pub api_keys: Vec<String>,

    /// Free-text vantage-point selectors.
    ///
    /// A selector matches a probe's city, country, region, continent
    /// or ASN. Empty means "all probes" in sweep and fullscan modes;
    /// pinned mode requires at least one.
    #[serde(default)]
    pub locations: Vec<String>,

    /// Measurements per vantage point (pinned mode)
    #[serde(default = "default_runs")]
    pub runs_per_location: u64,

    /// Protocol used for the trace request
    #[serde(default)]
    pub protocol: Protocol,

    /// Collection mode
    #[serde(default)]
    pub mode: Mode,

    /// Directory for the append-only CSV output
    #[serde(default = "default_results_dir")]
    pub results_dir: String,

    /// Concurrent creations per iteration in fullscan mode.
    ///
    /// 1 keeps the loop fully adaptive; larger values trade
    /// per-request adaptivity for throughput.
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Coverage stopping-rule parameters
    #[serde(default)]
    pub coverage: CoverageConfig,

    /// Optional dashboard submission endpoint
    #[serde(default)]
    pub dashboard: Option<DashboardConfig>,
}

fn default_runs() -> u64 { 1 }
fn default_results_dir() -> String { "results".to_string() }
fn default_fanout() -> usize { 1 }

// ------------------------------------------------------------
// Collection mode
// ------------------------------------------------------------
//
// - Pinned:   session-pinned loop per named location, many samples
//             through the same entry point
// - Sweep:    one fresh measurement per probe in the selected list
// - Fullscan: coverage-driven exhaustive scan over the whole
//             probe directory
//
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Pinned,
    Sweep,
    Fullscan,
}

/// Protocol choice for the trace request.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP/1.1 plaintext
    Http,
    /// HTTP/1.1 over TLS
    Https,
    /// HTTP/2 over TLS
    #[default]
    Http2,
}

impl Protocol {
    /// Wire value expected by the provider API.
    pub fn as_provider_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Http2 => "HTTP2",
        }
    }
}

// ------------------------------------------------------------
// Coverage stopping rule
// ------------------------------------------------------------
//
// A colocation counts as covered once the number of requests since
// the last previously-unseen balancer exceeds
//
//     max(min_requests_threshold, per_balancer_factor * unique)
//
// The threshold grows with discovery richness: clusters that already
// produced many distinct balancers need more confirmation before
// being declared exhausted.
//
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CoverageConfig {
    #[serde(default = "default_min_requests")]
    pub min_requests_threshold: u64,

    #[serde(default = "default_factor")]
    pub per_balancer_factor: u64,
}

fn default_min_requests() -> u64 { 300 }
fn default_factor() -> u64 { 1 }

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            min_requests_threshold: default_min_requests(),
            per_balancer_factor: default_factor(),
        }
    }
}

// ------------------------------------------------------------
// Dashboard submission
// ------------------------------------------------------------
//
// Optional endpoint that upserts discovered balancers by id.
// Independently run collectors merge into the shared dataset
// through the same endpoint.
//
#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    /// Submission URL (POST, JSON array body)
    pub url: String,

    /// Records per submission batch
    #[serde(default = "default_batch")]
    pub batch_size: usize,
}

fn default_batch() -> usize { 50 }

impl Config {
    /// Validates run-fatal preconditions.
    ///
    /// Missing hosts, credentials, or (in pinned mode) locations are
    /// reported immediately, before any collection begins.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hosts.is_empty() {
            anyhow::bail!("No hosts provided");
        }
        if self.api_keys.is_empty() {
            anyhow::bail!("No API keys provided");
        }
        if self.mode == Mode::Pinned && self.locations.is_empty() {
            anyhow::bail!("No locations provided");
        }
        if self.fanout == 0 {
            anyhow::bail!("fanout must be at least 1");
        }
        Ok(())
    }
}
