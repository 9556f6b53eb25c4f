use serde::{Serialize, Deserialize};

/// Central result record produced by every collection mode.
///
/// One `TraceResult` represents a single probe-to-backend interaction:
/// the decoded `/cdn-cgi/trace` body of one measurement, enriched with
/// the identity of the vantage point that issued it and the provider's
/// timing breakdown.
///
/// DESIGN NOTES:
/// - Every field is optional; a field stays `None` until the parser or
///   the driver fills it.
/// - The record is constructed once, immediately after a measurement
///   completes, and is immutable afterwards. It is written exactly once
///   to the output stream and never updated or deleted by the collector.
///   Deduplication and merging are downstream concerns.
/// - The serialization column order is fixed (see `CSV_HEADER`) so that
///   rows appended by different process runs stay schema-compatible.
///
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct TraceResult {
    /// Timestamp reported by the edge (`ts` trace key)
    pub timestamp: Option<String>,

    /// Backend instance identifier (`fl` trace key)
    pub balancer_id: Option<String>,

    /// Backend-facing IP address (`ip` trace key)
    pub balancer_ip: Option<String>,

    /// Country reported by the edge (`loc` trace key)
    pub balancer_country: Option<String>,

    /// Physical cluster of the backend (`colo` trace key)
    pub balancer_colocation_center: Option<String>,

    /// Host the trace was issued against (`h` trace key)
    pub target_domain: Option<String>,

    /// Request scheme (`visit_scheme` trace key)
    pub scheme: Option<String>,

    /// HTTP protocol version (`http` trace key)
    pub http_version: Option<String>,

    /// TLS version (`tls` trace key)
    pub tls_version: Option<String>,

    // ------------------------------------------------------------
    // Vantage-point identity (filled from probe metadata, not the
    // trace body)
    // ------------------------------------------------------------
    pub client_country: Option<String>,
    pub client_city: Option<String>,
    pub client_asn: Option<i64>,
    pub client_network: Option<String>,

    // ------------------------------------------------------------
    // Timing breakdown (milliseconds, from the provider's structured
    // response)
    // ------------------------------------------------------------
    pub latency_total: Option<f64>,
    pub latency_dns: Option<f64>,
    pub latency_tcp: Option<f64>,
    pub latency_tls: Option<f64>,
    pub latency_first_byte: Option<f64>,
    pub latency_download: Option<f64>,
}

/// Fixed CSV column order. Must match `TraceResult::csv_row` exactly.
pub const CSV_HEADER: &str = "timestamp,balancer_id,balancer_ip,balancer_country,\
balancer_colocation_center,target_domain,scheme,http_version,tls_version,\
client_country,client_city,client_asn,client_network,latency_total,\
latency_dns,latency_tcp,latency_tls,latency_first_byte,latency_download";

/// Sentinel written for absent fields.
pub const NULL_MARKER: &str = "null";

fn cell<T: ToString>(v: &Option<T>) -> String {
    let Some(raw) = v.as_ref().map(|x| x.to_string()) else {
        return NULL_MARKER.to_string();
    };
    // A comma, quote, or newline inside a value (network names like
    // "Company, Inc.") would shift the columns; quote such cells
    // with doubled inner quotes.
    if raw.contains([',', '"', '\n']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

impl TraceResult {
    /// Renders one CSV row in the fixed `CSV_HEADER` order.
    ///
    /// Missing fields serialize as the literal `null` marker so that
    /// every row carries the full column set. Cells containing a
    /// comma, quote, or newline are quoted.
    pub fn csv_row(&self) -> String {
        [
            cell(&self.timestamp),
            cell(&self.balancer_id),
            cell(&self.balancer_ip),
            cell(&self.balancer_country),
            cell(&self.balancer_colocation_center),
            cell(&self.target_domain),
            cell(&self.scheme),
            cell(&self.http_version),
            cell(&self.tls_version),
            cell(&self.client_country),
            cell(&self.client_city),
            cell(&self.client_asn),
            cell(&self.client_network),
            cell(&self.latency_total),
            cell(&self.latency_dns),
            cell(&self.latency_tcp),
            cell(&self.latency_tls),
            cell(&self.latency_first_byte),
            cell(&self.latency_download),
        ]
        .join(",")
    }
}

// ------------------------------------------------------------
// Vantage points
// ------------------------------------------------------------
//
// The provider's probe directory entry. The collector treats the
// probe set as read-only: it may filter or group it, but never
// mutates individual entries.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Probe {
    pub location: ProbeLocation,
}

/// Network location of a single vantage point.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ProbeLocation {
    #[serde(default)]
    pub continent: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub asn: Option<i64>,

    #[serde(default)]
    pub network: Option<String>,
}

impl ProbeLocation {
    /// Human-readable label used in log lines.
    pub fn label(&self) -> String {
        format!(
            "{} - {}",
            self.city.as_deref().unwrap_or("?"),
            self.network.as_deref().unwrap_or("?"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_row_serializes_missing_fields_as_null() {
        let r = TraceResult {
            balancer_id: Some("8f1a2".into()),
            balancer_colocation_center: Some("FRA".into()),
            client_asn: Some(3320),
            ..Default::default()
        };

        let row = r.csv_row();
        let cells: Vec<&str> = row.split(',').collect();

        assert_eq!(cells.len(), CSV_HEADER.split(',').count());
        assert_eq!(cells[0], "null"); // timestamp
        assert_eq!(cells[1], "8f1a2");
        assert_eq!(cells[4], "FRA");
        assert_eq!(cells[11], "3320");
        assert_eq!(cells[18], "null"); // latency_download
    }

    /// Quote-aware cell splitter for the assertions below.
    fn split_row(row: &str) -> Vec<String> {
        let mut cells = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        for c in row.chars() {
            match c {
                '"' => quoted = !quoted,
                ',' if !quoted => cells.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        cells.push(current);
        cells
    }

    #[test]
    fn cells_containing_commas_are_quoted() {
        let r = TraceResult {
            balancer_id: Some("8f1a2".into()),
            client_network: Some("Company, Inc.".into()),
            ..Default::default()
        };

        let row = r.csv_row();
        assert!(row.contains("\"Company, Inc.\""));

        let cells = split_row(&row);
        assert_eq!(cells.len(), CSV_HEADER.split(',').count());
        assert_eq!(cells[12], "Company, Inc."); // client_network
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let r = TraceResult {
            client_network: Some("a \"b\" c".into()),
            ..Default::default()
        };
        assert!(r.csv_row().contains("\"a \"\"b\"\" c\""));
    }

    #[test]
    fn header_and_row_have_same_arity() {
        let row = TraceResult::default().csv_row();
        assert_eq!(
            row.split(',').count(),
            CSV_HEADER.split(',').count()
        );
    }
}
