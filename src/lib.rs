// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:    Configuration structs loaded from JSON
// - schema:    Result record and vantage-point definitions
// - trace:     /cdn-cgi/trace body parser
// - util:      Probe filtering, grouping and sharding helpers
// - provider:  Measurement provider trait + Globalping client
// - limits:    Rate-limit gate and backoff policies
// - coverage:  Per-colocation discovery statistics
// - driver:    Measurement creation + await + enrichment
// - collector: Collection loops (pinned / sweep / fullscan)
// - output:    Append-only CSV result stream
// - submit:    Optional dashboard batch submission
// - metrics:   Global runtime metrics
//
pub mod config;
pub mod schema;
pub mod trace;
pub mod util;
pub mod provider;
pub mod limits;
pub mod coverage;
pub mod driver;
pub mod collector;
pub mod output;
pub mod submit;
pub mod metrics;
