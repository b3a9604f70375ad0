//! Atomic counters for allocator observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide allocator counters.
pub struct AllocatorMetrics {
    /// Page requests handed to a backend.
    pub page_allocs: AtomicU64,
    /// Pages returned to a backend.
    pub page_frees: AtomicU64,
    /// Backend attempts that failed and were retried.
    pub page_retries: AtomicU64,
    /// Page requests that surfaced a failure to the caller.
    pub page_failures: AtomicU64,
    /// Attempts refused by the reserve gate.
    pub reserve_denials: AtomicU64,
    /// Object allocations served from a per-CPU cache.
    pub cpu_hits: AtomicU64,
    /// Per-CPU refills served by a node pool.
    pub node_refills: AtomicU64,
    /// Cache growths (one new slab each).
    pub grows: AtomicU64,
    /// Slabs returned to the page layer.
    pub slab_releases: AtomicU64,
    /// Per-CPU flushes of a full batch.
    pub cpu_flushes: AtomicU64,
    /// Objects freed straight into a remote node.
    pub alien_frees: AtomicU64,
    /// Rejected double frees.
    pub double_frees: AtomicU64,
    /// Rejected frees of addresses a cache does not own.
    pub foreign_frees: AtomicU64,
    /// Invalid zone-modifier combinations seen by the resolver.
    pub invalid_zone_flags: AtomicU64,
    /// Requests carrying both mobility bits.
    pub mixed_mobility_flags: AtomicU64,
}

impl AllocatorMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            page_allocs: AtomicU64::new(0),
            page_frees: AtomicU64::new(0),
            page_retries: AtomicU64::new(0),
            page_failures: AtomicU64::new(0),
            reserve_denials: AtomicU64::new(0),
            cpu_hits: AtomicU64::new(0),
            node_refills: AtomicU64::new(0),
            grows: AtomicU64::new(0),
            slab_releases: AtomicU64::new(0),
            cpu_flushes: AtomicU64::new(0),
            alien_frees: AtomicU64::new(0),
            double_frees: AtomicU64::new(0),
            foreign_frees: AtomicU64::new(0),
            invalid_zone_flags: AtomicU64::new(0),
            mixed_mobility_flags: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            page_allocs: Self::get(&self.page_allocs),
            page_frees: Self::get(&self.page_frees),
            page_retries: Self::get(&self.page_retries),
            page_failures: Self::get(&self.page_failures),
            reserve_denials: Self::get(&self.reserve_denials),
            cpu_hits: Self::get(&self.cpu_hits),
            node_refills: Self::get(&self.node_refills),
            grows: Self::get(&self.grows),
            slab_releases: Self::get(&self.slab_releases),
            cpu_flushes: Self::get(&self.cpu_flushes),
            alien_frees: Self::get(&self.alien_frees),
            double_frees: Self::get(&self.double_frees),
            foreign_frees: Self::get(&self.foreign_frees),
            invalid_zone_flags: Self::get(&self.invalid_zone_flags),
            mixed_mobility_flags: Self::get(&self.mixed_mobility_flags),
        }
    }
}

impl Default for AllocatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of all allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub page_allocs: u64,
    pub page_frees: u64,
    pub page_retries: u64,
    pub page_failures: u64,
    pub reserve_denials: u64,
    pub cpu_hits: u64,
    pub node_refills: u64,
    pub grows: u64,
    pub slab_releases: u64,
    pub cpu_flushes: u64,
    pub alien_frees: u64,
    pub double_frees: u64,
    pub foreign_frees: u64,
    pub invalid_zone_flags: u64,
    pub mixed_mobility_flags: u64,
}

impl MetricsSnapshot {
    /// Fraction of object allocations served without touching a node lock, in permille.
    #[must_use]
    pub fn cpu_hit_rate_permille(&self) -> u16 {
        let total = self.cpu_hits + self.node_refills + self.grows;
        if total == 0 {
            return 0;
        }
        ((self.cpu_hits.saturating_mul(1000)) / total) as u16
    }
}

static GLOBAL_METRICS: AllocatorMetrics = AllocatorMetrics::new();

/// Access the global metrics singleton.
#[must_use]
pub fn global_metrics() -> &'static AllocatorMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = AllocatorMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increment_works() {
        let m = AllocatorMetrics::new();
        AllocatorMetrics::inc(&m.cpu_hits);
        AllocatorMetrics::inc(&m.cpu_hits);
        AllocatorMetrics::inc(&m.double_frees);
        let snap = m.snapshot();
        assert_eq!(snap.cpu_hits, 2);
        assert_eq!(snap.double_frees, 1);
    }

    #[test]
    fn hit_rate() {
        let snap = MetricsSnapshot {
            cpu_hits: 3,
            node_refills: 1,
            ..MetricsSnapshot::default()
        };
        assert_eq!(snap.cpu_hit_rate_permille(), 750);
        assert_eq!(MetricsSnapshot::default().cpu_hit_rate_permille(), 0);
    }
}
