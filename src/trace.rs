use crate::schema::TraceResult;

/// Path on the target host that returns the trace blob.
pub const TRACE_PATH: &str = "/cdn-cgi/trace";

/// Decodes a `/cdn-cgi/trace` body into a `TraceResult`.
///
/// The body is newline-delimited `key=value` text, e.g.
///
/// ```text
/// fl=463f131
/// h=example.com
/// ip=203.0.113.9
/// ts=1709216789.123
/// visit_scheme=https
/// colo=FRA
/// http=http/2
/// loc=DE
/// tls=TLSv1.3
/// ```
///
/// CONTRACT:
/// - Known keys map onto fixed `TraceResult` fields.
/// - Unknown keys are ignored.
/// - Malformed lines (no `=`) are skipped, never an error.
/// - Empty input yields an all-null result; deciding whether an
///   empty body is usable belongs to the caller, not the parser.
/// - Pure and deterministic, no side effects.
///
pub fn parse_trace(raw: &str) -> TraceResult {
    let mut result = TraceResult::default();

    for line in raw.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "fl" => result.balancer_id = Some(value.to_string()),
            "h" => result.target_domain = Some(value.to_string()),
            "ip" => result.balancer_ip = Some(value.to_string()),
            "ts" => result.timestamp = Some(value.to_string()),
            "visit_scheme" => result.scheme = Some(value.to_string()),
            "colo" => result.balancer_colocation_center = Some(value.to_string()),
            "http" => result.http_version = Some(value.to_string()),
            "loc" => result.balancer_country = Some(value.to_string()),
            "tls" => result.tls_version = Some(value.to_string()),
            _ => {}
        }
    }

    result
}
