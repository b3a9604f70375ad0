//! Multi-threaded cache traffic over the simulated backend.
//!
//! Each worker binds to one execution unit and runs a deterministic
//! alloc/free sequence against a set of caches, checking exclusivity and slot
//! state as it goes. At the end every object is returned, caches are shrunk,
//! and the backend must have no pages outstanding.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use serde::{Deserialize, Serialize};
use zonecache_core::metrics::global_metrics;
use zonecache_core::percpu::bind_current_thread;
use zonecache_core::{
    AllocFlags, CacheSpec, CacheStats, MetricsSnapshot, ObjectCache, Runtime, RuntimeConfig,
    SlotState,
};

use crate::HarnessError;

/// Shape of one stress run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub threads: usize,
    pub ops_per_thread: usize,
    pub seed: u64,
    /// Object sizes; one cache per size.
    pub sizes: Vec<usize>,
    /// Per-thread cap on objects held at once.
    pub max_live: usize,
    pub runtime: RuntimeConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 10_000,
            seed: 0x5EED_CAFE,
            sizes: vec![32, 192, 1000],
            max_live: 512,
            runtime: RuntimeConfig {
                nodes: 2,
                cpus_per_node: 2,
                retry_backoff_us: 0,
                kmalloc: false,
                ..RuntimeConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub cpu: usize,
    pub allocs: u64,
    pub frees: u64,
    pub peak_live: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub threads: usize,
    pub ops_per_thread: usize,
    pub seed: u64,
    pub workers: Vec<WorkerReport>,
    pub caches: Vec<CacheStats>,
    pub slabs_released: usize,
    pub pages_outstanding: u64,
    pub metrics: MetricsSnapshot,
}

impl StressReport {
    /// True iff every page came back after the final shrink.
    #[must_use]
    pub fn leak_free(&self) -> bool {
        self.pages_outstanding == 0
    }
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn worker(
    cpu: usize,
    caches: &[Arc<ObjectCache>],
    cfg: &StressConfig,
) -> Result<(WorkerReport, Vec<(usize, usize)>), HarnessError> {
    bind_current_thread(cpu);
    let mut rng = XorShift64::new(cfg.seed ^ (cpu as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let mut live: Vec<(usize, usize)> = Vec::new();
    let mut report = WorkerReport {
        cpu,
        ..WorkerReport::default()
    };
    for _ in 0..cfg.ops_per_thread {
        let grow = live.is_empty() || (live.len() < cfg.max_live && rng.next_u64() % 3 != 0);
        if grow {
            let which = rng.gen_range(0, caches.len() - 1);
            let addr = caches[which].alloc(AllocFlags::KERNEL)?;
            if caches[which].slot_state(addr) != Some(SlotState::Allocated) {
                return Err(HarnessError::Invariant(format!(
                    "{addr:#x} handed out in state {:?}",
                    caches[which].slot_state(addr)
                )));
            }
            live.push((which, addr));
            report.allocs += 1;
            report.peak_live = report.peak_live.max(live.len());
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let (which, addr) = live.swap_remove(idx);
            caches[which].free(addr)?;
            report.frees += 1;
        }
    }
    Ok((report, live))
}

/// Run one stress pass.
pub fn run_stress(cfg: &StressConfig) -> Result<StressReport, HarnessError> {
    if cfg.threads == 0 || cfg.sizes.is_empty() {
        return Err(HarnessError::InvalidConfig(
            "need at least one thread and one size".into(),
        ));
    }
    let (runtime, backend) = Runtime::simulated(cfg.runtime.clone())?;
    runtime.mark_up();
    let caches = cfg
        .sizes
        .iter()
        .map(|&size| runtime.cache_create(CacheSpec::new(format!("stress-{size}"), size)))
        .collect::<Result<Vec<_>, _>>()?;
    let cpus = runtime.topology().cpu_count();
    let barrier = Barrier::new(cfg.threads);

    let results = thread::scope(|scope| {
        let handles: Vec<_> = (0..cfg.threads)
            .map(|t| {
                let caches = &caches;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    worker(t % cpus, caches, cfg)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(HarnessError::Invariant("worker panicked".into())))
            })
            .collect::<Vec<_>>()
    });

    let mut workers = Vec::with_capacity(results.len());
    let mut outstanding = HashSet::new();
    let mut leftovers = Vec::new();
    for result in results {
        let (report, live) = result?;
        workers.push(report);
        for (which, addr) in live {
            if !outstanding.insert(addr) {
                return Err(HarnessError::Invariant(format!(
                    "{addr:#x} held by two workers"
                )));
            }
            leftovers.push((which, addr));
        }
    }
    let live_total: usize = caches.iter().map(|c| c.live_objects()).sum();
    if live_total != leftovers.len() {
        return Err(HarnessError::Invariant(format!(
            "caches report {live_total} live objects, workers hold {}",
            leftovers.len()
        )));
    }
    for (which, addr) in leftovers {
        caches[which].free(addr)?;
    }

    let slabs_released = runtime.registry().shrink_all();
    Ok(StressReport {
        threads: cfg.threads,
        ops_per_thread: cfg.ops_per_thread,
        seed: cfg.seed,
        workers,
        caches: runtime.registry().stats(),
        slabs_released,
        pages_outstanding: backend.outstanding_pages(),
        metrics: global_metrics().snapshot(),
    })
}
