//! Utility helpers used by all collection modes.
//!
//! This module contains:
//! - Vantage-point filtering and grouping
//! - Credential sharding
//!
//! IMPORTANT:
//! - No provider-specific business logic should live here.
//! - This module must remain lightweight and deterministic.

use std::collections::HashSet;

use crate::schema::Probe;

/// Filters the probe directory by a free-text selector.
///
/// A selector matches a probe when it equals the probe's ASN
/// (as a decimal string), city, country, region, or continent.
/// `None` keeps the full directory.
///
/// The input set is treated as read-only; the result preserves the
/// provider's ordering.
pub fn select_probes(probes: &[Probe], selector: Option<&str>) -> Vec<Probe> {
    let Some(selector) = selector else {
        return probes.to_vec();
    };

    probes
        .iter()
        .filter(|p| {
            let loc = &p.location;
            loc.asn.map(|a| a.to_string()).as_deref() == Some(selector)
                || loc.city.as_deref() == Some(selector)
                || loc.country.as_deref() == Some(selector)
                || loc.region.as_deref() == Some(selector)
                || loc.continent.as_deref() == Some(selector)
        })
        .cloned()
        .collect()
}

/// Groups probes down to one per distinct (city, network) pair.
///
/// Multiple probes in the same city on the same network reach the
/// same edge entry points; probing them all wastes quota. The first
/// probe of each pair (in directory order) wins.
pub fn dedupe_probes(probes: Vec<Probe>) -> Vec<Probe> {
    let mut seen: HashSet<(String, String)> = HashSet::new();

    probes
        .into_iter()
        .filter(|p| {
            let key = (
                p.location.city.clone().unwrap_or_default(),
                p.location.network.clone().unwrap_or_default(),
            );
            seen.insert(key)
        })
        .collect()
}

/// Splits work items round-robin across `shards` buckets.
///
/// Used to assign vantage points to credentials: shard i holds the
/// items at indices i, i+shards, i+2*shards, ...
///
/// CONTRACT:
/// - Never returns more buckets than items.
/// - Every item lands in exactly one bucket.
pub fn shard_round_robin<T: Clone>(items: &[T], shards: usize) -> Vec<Vec<T>> {
    let shards = shards.max(1).min(items.len().max(1));
    let mut buckets: Vec<Vec<T>> = vec![Vec::new(); shards];

    for (i, item) in items.iter().enumerate() {
        buckets[i % shards].push(item.clone());
    }

    buckets.retain(|b| !b.is_empty());
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProbeLocation;

    fn probe(city: &str, country: &str, network: &str, asn: i64) -> Probe {
        Probe {
            location: ProbeLocation {
                continent: Some("EU".into()),
                region: Some("Western Europe".into()),
                country: Some(country.into()),
                city: Some(city.into()),
                asn: Some(asn),
                network: Some(network.into()),
            },
        }
    }

    #[test]
    fn selector_matches_any_location_facet() {
        let probes = vec![
            probe("Berlin", "DE", "DTAG", 3320),
            probe("Paris", "FR", "Orange", 3215),
        ];

        assert_eq!(select_probes(&probes, Some("Berlin")).len(), 1);
        assert_eq!(select_probes(&probes, Some("FR")).len(), 1);
        assert_eq!(select_probes(&probes, Some("3320")).len(), 1);
        assert_eq!(select_probes(&probes, Some("EU")).len(), 2);
        assert_eq!(select_probes(&probes, Some("Tokyo")).len(), 0);
        assert_eq!(select_probes(&probes, None).len(), 2);
    }

    #[test]
    fn dedupe_keeps_one_probe_per_city_network_pair() {
        let probes = vec![
            probe("Berlin", "DE", "DTAG", 3320),
            probe("Berlin", "DE", "DTAG", 3320),
            probe("Berlin", "DE", "Vodafone", 3209),
        ];

        let unique = dedupe_probes(probes);
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn round_robin_sharding_covers_every_item() {
        let items: Vec<u32> = (0..7).collect();
        let buckets = shard_round_robin(&items, 3);

        assert_eq!(buckets.len(), 3);
        let mut all: Vec<u32> = buckets.concat();
        all.sort();
        assert_eq!(all, items);

        // More shards than items collapses to one bucket per item
        assert_eq!(shard_round_robin(&items[..2], 5).len(), 2);
    }
}
