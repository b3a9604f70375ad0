//! Reference page backend for hosted runs.
//!
//! Each `(node, zone)` pair owns a bump arena of page frame numbers. Freed
//! blocks go onto per-order recycle lists; a request that finds its own list
//! empty splits a larger recycled block before bumping the arena. There is no
//! coalescing: this is a stand-in for the real page allocator, not a buddy
//! system. Failure injection and reserve-gate denial make retry and priority
//! paths testable.

use crate::backend::{MAX_ORDER, Page, PageBackend, PageRequest};
use crate::error::BackendError;
use crate::flags::AllocFlags;
use crate::priority::watermark_floor;
use crate::topology::{NodeId, Topology};
use crate::zone::{ZONE_COUNT, Zone};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Sizing of the simulated machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Pages in every configured zone.
    pub pages_per_zone: u64,
    /// Minimum watermark of every zone, in pages.
    pub min_watermark: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            pages_per_zone: 1 << 16,
            min_watermark: 0,
        }
    }
}

struct ZoneArena {
    next: u64,
    limit: u64,
    free_pages: u64,
    recycled: Vec<Vec<u64>>,
}

impl ZoneArena {
    fn new(base: u64, pages: u64) -> Self {
        Self {
            next: base,
            limit: base + pages,
            free_pages: pages,
            recycled: vec![Vec::new(); MAX_ORDER as usize + 1],
        }
    }

    fn take(&mut self, order: u32) -> Option<u64> {
        let block = 1u64 << order;
        if let Some(pfn) = self.take_recycled(order) {
            self.free_pages -= block;
            return Some(pfn);
        }
        let start = self.next.next_multiple_of(block);
        if start + block > self.limit {
            return None;
        }
        // Alignment padding is lost to the arena.
        self.free_pages -= (start - self.next) + block;
        self.next = start + block;
        Some(start)
    }

    fn take_recycled(&mut self, order: u32) -> Option<u64> {
        let source = (order..=MAX_ORDER).find(|&o| !self.recycled[o as usize].is_empty())?;
        let pfn = self.recycled[source as usize].pop()?;
        for split in (order..source).rev() {
            self.recycled[split as usize].push(pfn + (1u64 << split));
        }
        Some(pfn)
    }

    fn give(&mut self, pfn: u64, order: u32) {
        self.recycled[order as usize].push(pfn);
        self.free_pages += 1u64 << order;
    }
}

/// Counters kept by [`SimulatedBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulatedStats {
    pub allocs: u64,
    pub frees: u64,
    pub failures: u64,
    pub injected_failures: u64,
    pub reserve_checks: u64,
    pub reserve_denials: u64,
    pub wakeups: u64,
    pub reclaim_calls: u64,
    pub compact_calls: u64,
    pub outstanding_pages: u64,
}

/// Bump-arena page backend.
pub struct SimulatedBackend {
    arenas: Vec<Mutex<ZoneArena>>,
    min_watermark: u64,
    fail_next: AtomicU32,
    deny_reserves: AtomicBool,
    allocs: AtomicU64,
    frees: AtomicU64,
    failures: AtomicU64,
    injected_failures: AtomicU64,
    reserve_checks: AtomicU64,
    reserve_denials: AtomicU64,
    wakeups: AtomicU64,
    reclaim_calls: AtomicU64,
    compact_calls: AtomicU64,
    outstanding_pages: AtomicU64,
}

impl SimulatedBackend {
    #[must_use]
    pub fn new(topology: &Topology, config: SimulatedConfig) -> Self {
        let span = config
            .pages_per_zone
            .max(1 << MAX_ORDER)
            .next_power_of_two();
        let zones = topology.zone_config();
        let arenas = (0..topology.node_count() * ZONE_COUNT)
            .map(|slot| {
                let zone = Zone::ALL[slot % ZONE_COUNT];
                let pages = if zones.has(zone) {
                    config.pages_per_zone
                } else {
                    0
                };
                // Frame 0 is never handed out.
                Mutex::new(ZoneArena::new((slot as u64 + 1) * span, pages))
            })
            .collect();
        Self {
            arenas,
            min_watermark: config.min_watermark,
            fail_next: AtomicU32::new(0),
            deny_reserves: AtomicBool::new(false),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            injected_failures: AtomicU64::new(0),
            reserve_checks: AtomicU64::new(0),
            reserve_denials: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            reclaim_calls: AtomicU64::new(0),
            compact_calls: AtomicU64::new(0),
            outstanding_pages: AtomicU64::new(0),
        }
    }

    fn arena(&self, node: NodeId, zone: Zone) -> Option<&Mutex<ZoneArena>> {
        self.arenas.get(node as usize * ZONE_COUNT + zone.index())
    }

    /// Make the next `n` allocation attempts fail.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::Release);
    }

    /// Refuse (or re-allow) every reserve-gate check.
    pub fn deny_reserves(&self, deny: bool) {
        self.deny_reserves.store(deny, Ordering::Release);
    }

    /// Free pages currently left in one zone.
    #[must_use]
    pub fn free_pages_in(&self, node: NodeId, zone: Zone) -> u64 {
        self.arena(node, zone).map_or(0, |a| a.lock().free_pages)
    }

    #[must_use]
    pub fn outstanding_pages(&self) -> u64 {
        self.outstanding_pages.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> SimulatedStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SimulatedStats {
            allocs: get(&self.allocs),
            frees: get(&self.frees),
            failures: get(&self.failures),
            injected_failures: get(&self.injected_failures),
            reserve_checks: get(&self.reserve_checks),
            reserve_denials: get(&self.reserve_denials),
            wakeups: get(&self.wakeups),
            reclaim_calls: get(&self.reclaim_calls),
            compact_calls: get(&self.compact_calls),
            outstanding_pages: get(&self.outstanding_pages),
        }
    }
}

impl PageBackend for SimulatedBackend {
    fn alloc_pages(&self, req: &PageRequest<'_>) -> Result<Page, BackendError> {
        if self
            .fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(BackendError::Exhausted);
        }
        if req.order <= MAX_ORDER {
            let floor = watermark_floor(req.flags, self.min_watermark);
            for candidate in req.zonelist.eligible(req.high_zone) {
                let Some(arena) = self.arena(candidate.node, candidate.zone) else {
                    continue;
                };
                let mut arena = arena.lock();
                if arena.free_pages < req.pages() + floor {
                    continue;
                }
                if let Some(pfn) = arena.take(req.order) {
                    self.allocs.fetch_add(1, Ordering::Relaxed);
                    self.outstanding_pages
                        .fetch_add(req.pages(), Ordering::Relaxed);
                    return Ok(Page {
                        pfn,
                        order: req.order,
                        node: candidate.node,
                        zone: candidate.zone,
                        migrate: req.migrate,
                    });
                }
            }
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        Err(BackendError::Exhausted)
    }

    fn free_pages(&self, page: Page, order: u32) {
        if let Some(arena) = self.arena(page.node, page.zone) {
            arena.lock().give(page.pfn, order);
            self.frees.fetch_add(1, Ordering::Relaxed);
            self.outstanding_pages
                .fetch_sub(1u64 << order, Ordering::Relaxed);
        }
    }

    fn reserve_gate_allows(&self, _flags: AllocFlags) -> bool {
        self.reserve_checks.fetch_add(1, Ordering::Relaxed);
        let allowed = !self.deny_reserves.load(Ordering::Acquire);
        if !allowed {
            self.reserve_denials.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    fn wake_background_reclaim(&self, _req: &PageRequest<'_>) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    fn direct_reclaim(&self, _req: &PageRequest<'_>) -> usize {
        self.reclaim_calls.fetch_add(1, Ordering::Relaxed);
        0
    }

    fn compact(&self, _req: &PageRequest<'_>) -> bool {
        self.compact_calls.fetch_add(1, Ordering::Relaxed);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobility::MigrateType;
    use crate::zone::ZoneConfig;

    fn request<'a>(topo: &'a Topology, flags: AllocFlags, order: u32, high: Zone) -> PageRequest<'a> {
        PageRequest {
            flags,
            order,
            high_zone: high,
            zonelist: topo.select_fallback_list(0, flags).unwrap(),
            migrate: MigrateType::Unmovable,
            preferred_node: 0,
        }
    }

    #[test]
    fn blocks_are_aligned_and_distinct() {
        let topo = Topology::single_node(1, ZoneConfig::default()).unwrap();
        let backend = SimulatedBackend::new(&topo, SimulatedConfig::default());
        let a = backend
            .alloc_pages(&request(&topo, AllocFlags::KERNEL, 0, Zone::Normal))
            .unwrap();
        let b = backend
            .alloc_pages(&request(&topo, AllocFlags::KERNEL, 3, Zone::Normal))
            .unwrap();
        assert_eq!(a.zone, Zone::Normal);
        assert_eq!(b.pfn % 8, 0);
        assert_ne!(a.pfn, b.pfn);
        assert!(a.pfn > 0);
        assert_eq!(backend.outstanding_pages(), 9);
    }

    #[test]
    fn high_zone_limits_placement() {
        let topo = Topology::single_node(1, ZoneConfig::full()).unwrap();
        let backend = SimulatedBackend::new(&topo, SimulatedConfig::default());
        let page = backend
            .alloc_pages(&request(&topo, AllocFlags::DMA, 0, Zone::Dma))
            .unwrap();
        assert_eq!(page.zone, Zone::Dma);
        let page = backend
            .alloc_pages(&request(&topo, AllocFlags::HIGHUSER_MOVABLE, 0, Zone::Movable))
            .unwrap();
        assert_eq!(page.zone, Zone::Movable);
    }

    #[test]
    fn exhaustion_falls_back_then_fails() {
        let topo = Topology::single_node(1, ZoneConfig::default()).unwrap();
        let backend = SimulatedBackend::new(
            &topo,
            SimulatedConfig {
                pages_per_zone: 2,
                min_watermark: 0,
            },
        );
        let zones: Vec<Zone> = (0..6)
            .map(|_| {
                backend
                    .alloc_pages(&request(&topo, AllocFlags::KERNEL, 0, Zone::Normal))
                    .unwrap()
                    .zone
            })
            .collect();
        assert_eq!(
            zones,
            vec![Zone::Normal, Zone::Normal, Zone::Dma32, Zone::Dma32, Zone::Dma, Zone::Dma]
        );
        assert_eq!(
            backend.alloc_pages(&request(&topo, AllocFlags::KERNEL, 0, Zone::Normal)),
            Err(BackendError::Exhausted)
        );
    }

    #[test]
    fn freed_blocks_are_recycled_and_split() {
        let topo = Topology::single_node(1, ZoneConfig::minimal()).unwrap();
        let backend = SimulatedBackend::new(&topo, SimulatedConfig::default());
        let big = backend
            .alloc_pages(&request(&topo, AllocFlags::KERNEL, 2, Zone::Normal))
            .unwrap();
        backend.free_pages(big, 2);
        let small = backend
            .alloc_pages(&request(&topo, AllocFlags::KERNEL, 0, Zone::Normal))
            .unwrap();
        assert_eq!(small.pfn, big.pfn);
        let next = backend
            .alloc_pages(&request(&topo, AllocFlags::KERNEL, 1, Zone::Normal))
            .unwrap();
        assert_eq!(next.pfn, big.pfn + 2);
        assert_eq!(backend.outstanding_pages(), 3);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let topo = Topology::single_node(1, ZoneConfig::default()).unwrap();
        let backend = SimulatedBackend::new(&topo, SimulatedConfig::default());
        backend.fail_next(2);
        let req = request(&topo, AllocFlags::KERNEL, 0, Zone::Normal);
        assert!(backend.alloc_pages(&req).is_err());
        assert!(backend.alloc_pages(&req).is_err());
        assert!(backend.alloc_pages(&req).is_ok());
        assert_eq!(backend.stats().injected_failures, 2);
    }

    #[test]
    fn watermark_reserves_pages_for_priority() {
        let topo = Topology::single_node(1, ZoneConfig::minimal()).unwrap();
        let backend = SimulatedBackend::new(
            &topo,
            SimulatedConfig {
                pages_per_zone: 8,
                min_watermark: 8,
            },
        );
        assert!(
            backend
                .alloc_pages(&request(&topo, AllocFlags::KERNEL, 0, Zone::Normal))
                .is_err()
        );
        assert!(
            backend
                .alloc_pages(&request(&topo, AllocFlags::ATOMIC_CTX, 0, Zone::Normal))
                .is_ok()
        );
        let emergency = AllocFlags::KERNEL | AllocFlags::MEMALLOC;
        assert!(
            backend
                .alloc_pages(&request(&topo, emergency, 0, Zone::Normal))
                .is_ok()
        );
    }
}
