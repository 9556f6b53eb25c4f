use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the collector.
///
/// Purpose:
/// - Track active credential shards
/// - Track measurement throughput and failures
/// - Track discovery progress (balancers, colocations)
/// - Expose the sweep cursor for best-effort resumability
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // High-level
    pub shards_active: AtomicUsize,

    // Measurement level
    pub measurements_created: AtomicUsize,
    pub measurements_failed: AtomicUsize,
    pub rate_limit_waits: AtomicUsize,

    // Discovery
    pub balancers_discovered: AtomicUsize,
    pub colocations_seen: AtomicUsize,

    // Output
    pub rows_written: AtomicUsize,
    pub records_submitted: AtomicUsize,

    // Sweep progress (current index into the ordered probe list;
    // externally observable so an operator can resume a restarted
    // run near where it stopped)
    pub current_probe_index: AtomicUsize,
    pub probes_exhausted: AtomicUsize,
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// `current_probe_index` is one process-wide atomic; tests that
/// write or assert it serialize through this lock.
#[cfg(test)]
pub fn cursor_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
