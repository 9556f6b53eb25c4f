use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::config::CoverageConfig;
use crate::metrics::METRICS;

// ------------------------------------------------------------
// Per-colocation discovery state
// ------------------------------------------------------------
//
// Created lazily on the first observation of a colocation, mutated
// on every subsequent observation from any vantage point, and kept
// for the process lifetime.
//
#[derive(Debug, Default)]
pub struct ColocationStats {
    /// Distinct backend identifiers seen in this colocation
    pub unique_balancers: HashSet<String>,

    /// Requests since the last previously-unseen identifier
    pub requests_since_last_new: u64,
}

impl ColocationStats {
    /// A colocation is covered once enough requests passed without a
    /// new balancer, against both the static floor and the dynamic
    /// threshold scaled by how many balancers were already found.
    pub fn is_covered(&self, cfg: &CoverageConfig) -> bool {
        let dynamic =
            cfg.per_balancer_factor * self.unique_balancers.len() as u64;
        self.requests_since_last_new > cfg.min_requests_threshold.max(dynamic)
    }
}

// ------------------------------------------------------------
// Coverage tracker
// ------------------------------------------------------------

/// Shared discovery statistics, keyed by colocation.
///
/// The map is process-wide state shared across all vantage-point
/// loops (a colocation is visible from many probes), but it is an
/// explicitly injected handle, never a hidden singleton: every
/// collection task and every test instantiates or receives its own
/// tracker.
///
/// CONCURRENCY:
/// - Credential shards call `record` concurrently; the mutex makes
///   each read-modify-write per colocation key atomic.
#[derive(Clone)]
pub struct CoverageTracker {
    stats: Arc<Mutex<HashMap<String, ColocationStats>>>,
    cfg: CoverageConfig,
}

impl CoverageTracker {
    pub fn new(cfg: CoverageConfig) -> Self {
        Self {
            stats: Arc::new(Mutex::new(HashMap::new())),
            cfg,
        }
    }

    /// Records one observation.
    ///
    /// A previously-unseen balancer resets the colocation's counter
    /// to zero; a repeat increments it. Returns whether the balancer
    /// was newly seen.
    pub fn record(&self, colocation: &str, balancer_id: &str) -> bool {
        let mut stats = self.stats.lock().expect("coverage map poisoned");

        if !stats.contains_key(colocation) {
            METRICS.colocations_seen.fetch_add(1, Ordering::Relaxed);
        }
        let entry = stats.entry(colocation.to_string()).or_default();

        if entry.unique_balancers.contains(balancer_id) {
            entry.requests_since_last_new += 1;
            false
        } else {
            entry.unique_balancers.insert(balancer_id.to_string());
            entry.requests_since_last_new = 0;
            METRICS.balancers_discovered.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    /// Stopping decision for one vantage point.
    ///
    /// Continued probing is warranted while any colocation *seen by
    /// the current vantage point* is not yet covered. The decision is
    /// deliberately vantage-point-local even though the statistics
    /// are shared: a colocation exhausted through one probe may still
    /// expose different balancers to a new probe, so each vantage
    /// point confirms coverage on its own observations before being
    /// abandoned.
    pub fn should_continue(&self, seen_by_vp: &HashSet<String>) -> bool {
        let stats = self.stats.lock().expect("coverage map poisoned");

        seen_by_vp.iter().any(|colo| {
            stats
                .get(colo)
                .map(|s| !s.is_covered(&self.cfg))
                // A seen colocation without stats has had no recorded
                // observation yet; keep probing it.
                .unwrap_or(true)
        })
    }

    /// The configured stopping-rule parameters.
    pub fn config(&self) -> CoverageConfig {
        self.cfg
    }

    /// Number of distinct balancers in one colocation. Test hook.
    pub fn unique_count(&self, colocation: &str) -> usize {
        self.stats
            .lock()
            .expect("coverage map poisoned")
            .get(colocation)
            .map(|s| s.unique_balancers.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u64, factor: u64) -> CoverageConfig {
        CoverageConfig {
            min_requests_threshold: threshold,
            per_balancer_factor: factor,
        }
    }

    #[test]
    fn covered_iff_counter_exceeds_max_of_floor_and_dynamic() {
        let mut s = ColocationStats::default();
        for i in 0..5 {
            s.unique_balancers.insert(format!("b{}", i));
        }

        // floor 3, dynamic 5 -> threshold is 5
        s.requests_since_last_new = 5;
        assert!(!s.is_covered(&cfg(3, 1)));
        s.requests_since_last_new = 6;
        assert!(s.is_covered(&cfg(3, 1)));

        // floor 10 dominates the dynamic part
        assert!(!s.is_covered(&cfg(10, 1)));
        s.requests_since_last_new = 11;
        assert!(s.is_covered(&cfg(10, 1)));

        // factor 3 -> dynamic 15
        assert!(!s.is_covered(&cfg(3, 3)));
        s.requests_since_last_new = 16;
        assert!(s.is_covered(&cfg(3, 3)));
    }

    #[test]
    fn new_balancer_resets_counter_and_grows_set() {
        let tracker = CoverageTracker::new(cfg(2, 1));

        assert!(tracker.record("FRA", "a"));
        assert!(!tracker.record("FRA", "a"));
        assert!(!tracker.record("FRA", "a"));
        assert_eq!(tracker.unique_count("FRA"), 1);

        // unseen id resets the streak
        assert!(tracker.record("FRA", "b"));
        assert_eq!(tracker.unique_count("FRA"), 2);

        let seen: HashSet<String> = ["FRA".to_string()].into();
        assert!(tracker.should_continue(&seen));
    }

    #[test]
    fn stops_once_every_locally_seen_colocation_is_covered() {
        let tracker = CoverageTracker::new(cfg(1, 1));

        tracker.record("FRA", "a");
        tracker.record("FRA", "a"); // streak 1
        tracker.record("FRA", "a"); // streak 2 > max(1, 1)

        let seen: HashSet<String> = ["FRA".to_string()].into();
        assert!(!tracker.should_continue(&seen));

        // A colocation covered through another vantage point still
        // needs confirmation from a probe that newly sees it.
        let other_vp_seen: HashSet<String> =
            ["FRA".to_string(), "AMS".to_string()].into();
        tracker.record("AMS", "x");
        assert!(tracker.should_continue(&other_vp_seen));
    }

    #[test]
    fn trackers_are_isolated_instances() {
        let a = CoverageTracker::new(cfg(1, 1));
        let b = CoverageTracker::new(cfg(1, 1));
        a.record("FRA", "a");
        assert_eq!(b.unique_count("FRA"), 0);
    }
}
