use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use zonecache_core::percpu::bind_current_thread;
use zonecache_core::{
    AllocError, AllocFlags, CacheSpec, RuntimeConfig, Runtime, SimulatedBackend, SlotState,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

fn runtime(nodes: u16, cpus_per_node: usize) -> (Runtime, Arc<SimulatedBackend>) {
    let cfg = RuntimeConfig {
        nodes,
        cpus_per_node,
        retry_backoff_us: 0,
        kmalloc: false,
        ..RuntimeConfig::default()
    };
    let (rt, backend) = Runtime::simulated(cfg).unwrap();
    rt.mark_up();
    (rt, backend)
}

#[test]
fn size_64_interleaved_single_cpu() {
    bind_current_thread(0);
    let (rt, backend) = runtime(1, 1);
    let cache = rt
        .cache_create(CacheSpec::new("size-64", 64).tunables(120, 60))
        .unwrap();
    let per_slab = cache.geometry().num as usize;
    assert_eq!(per_slab, 64);

    let mut rng = XorShift64::new(0x64);
    let mut live: Vec<usize> = Vec::new();
    let mut freed: HashSet<usize> = HashSet::new();
    let mut reused = 0usize;
    let mut peak = 0usize;
    for _ in 0..200 {
        if live.is_empty() || rng.gen_bool() {
            let addr = cache.alloc(AllocFlags::KERNEL).unwrap();
            assert!(!live.contains(&addr));
            if freed.remove(&addr) {
                reused += 1;
            }
            live.push(addr);
            peak = peak.max(live.len());
        } else {
            let idx = rng.gen_range(0, live.len() - 1);
            let addr = live.swap_remove(idx);
            cache.free(addr).unwrap();
            freed.insert(addr);
        }
        let slabs = cache.slab_bases().len();
        assert!(slabs <= peak.div_ceil(per_slab));
        assert!(cache.cpu_cache_len(0) <= 120);
    }
    assert!(reused > 0);

    // Every freed address comes back before the cache grows again.
    let grows_before = cache.stats().grows;
    let mut again = HashSet::new();
    while cache.stats().grows == grows_before {
        again.insert(cache.alloc(AllocFlags::KERNEL).unwrap());
    }
    assert!(freed.is_subset(&again));

    for addr in live.into_iter().chain(again) {
        cache.free(addr).unwrap();
    }
    cache.shrink();
    assert_eq!(backend.outstanding_pages(), 0);
}

#[test]
fn index_round_trip_for_many_sizes() {
    bind_current_thread(0);
    let (rt, _) = runtime(1, 1);
    for size in [8, 24, 40, 72, 136, 264, 520, 1000, 2056, 4000, 12000] {
        let cache = rt
            .cache_create(CacheSpec::new(format!("rt-{size}"), size))
            .unwrap();
        let obj = cache.alloc(AllocFlags::KERNEL).unwrap();
        let base = cache.slab_bases()[0];
        for idx in 0..cache.geometry().num {
            let addr = cache.address_of(base, idx).unwrap();
            assert_eq!(cache.index_of(addr), Some(idx), "size {size} idx {idx}");
        }
        cache.free(obj).unwrap();
    }
}

#[test]
fn colour_staggers_successive_slabs() {
    bind_current_thread(0);
    let (rt, _) = runtime(1, 1);
    let cache = rt
        .cache_create(CacheSpec::new("coloured", 320).tunables(1, 1))
        .unwrap();
    let g = *cache.geometry();
    assert!(g.colour > 1);
    let objs: Vec<usize> = (0..g.num as usize * 3)
        .map(|_| cache.alloc(AllocFlags::KERNEL).unwrap())
        .collect();
    let firsts: Vec<usize> = cache
        .slab_bases()
        .iter()
        .map(|&base| cache.address_of(base, 0).unwrap() - base)
        .collect();
    assert_eq!(firsts, vec![0, g.colour_off, 2 * g.colour_off]);
    for obj in objs {
        cache.free(obj).unwrap();
    }
}

#[test]
fn concurrent_allocations_are_exclusive() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;
    let (rt, backend) = runtime(2, 4);
    let rt = Arc::new(rt);
    let cache = rt
        .cache_create(CacheSpec::new("shared-objs", 48).tunables(16, 8))
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                bind_current_thread(t);
                let mut rng = XorShift64::new(0xC0FFEE + t as u64);
                let mut mine: Vec<usize> = Vec::new();
                barrier.wait();
                for _ in 0..ROUNDS {
                    if mine.len() < 4 || rng.gen_bool() {
                        let addr = cache.alloc(AllocFlags::KERNEL).unwrap();
                        assert_eq!(cache.slot_state(addr), Some(SlotState::Allocated));
                        mine.push(addr);
                    } else {
                        let idx = rng.gen_range(0, mine.len() - 1);
                        cache.free(mine.swap_remove(idx)).unwrap();
                    }
                    assert!(cache.cpu_cache_len(t) <= 16);
                }
                mine
            })
        })
        .collect();

    let mut outstanding = HashSet::new();
    for handle in handles {
        for addr in handle.join().unwrap() {
            assert!(outstanding.insert(addr), "address {addr:#x} handed out twice");
        }
    }
    assert_eq!(cache.live_objects(), outstanding.len());
    for addr in outstanding {
        cache.free(addr).unwrap();
    }
    rt.registry().shrink_all();
    assert_eq!(backend.outstanding_pages(), 0);
    assert_eq!(cache.stats().double_frees, 0);
}

#[test]
fn cross_node_frees_do_not_leak() {
    let (rt, backend) = runtime(2, 1);
    let rt = Arc::new(rt);
    let cache = rt.cache_create(CacheSpec::new("numa", 256)).unwrap();
    let producer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            bind_current_thread(0);
            (0..200)
                .map(|_| cache.alloc(AllocFlags::KERNEL).unwrap())
                .collect::<Vec<_>>()
        })
    };
    let objs = producer.join().unwrap();
    let consumer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            bind_current_thread(1);
            for addr in objs {
                cache.free(addr).unwrap();
            }
            cache.cpu_cache_len(1)
        })
    };
    assert_eq!(consumer.join().unwrap(), 0);
    assert_eq!(cache.stats().alien_frees, 200);
    cache.shrink();
    assert_eq!(backend.outstanding_pages(), 0);
}

#[test]
fn contract_violations_are_reported() {
    bind_current_thread(0);
    let (rt, _) = runtime(1, 1);
    let a = rt.cache_create(CacheSpec::new("a", 64)).unwrap();
    let b = rt.cache_create(CacheSpec::new("b", 64)).unwrap();
    let obj = a.alloc(AllocFlags::KERNEL).unwrap();
    assert!(matches!(b.free(obj), Err(AllocError::ForeignObject { .. })));
    a.free(obj).unwrap();
    let err = a.free(obj).unwrap_err();
    assert!(err.is_contract_violation());
    assert_eq!(
        err,
        AllocError::DoubleFree {
            cache: "a".into(),
            addr: obj
        }
    );
}

#[test]
fn never_fail_movable_survives_backend_failures() {
    bind_current_thread(0);
    let (rt, backend) = runtime(1, 1);
    let cache = rt.cache_create(CacheSpec::new("nofail", 128)).unwrap();
    backend.fail_next(5);
    let addr = cache
        .alloc(AllocFlags::MOVABLE | AllocFlags::NOFAIL)
        .unwrap();
    assert!(cache.owns(addr));
    assert_eq!(backend.stats().injected_failures, 5);
}
