//! Object caches.
//!
//! An [`ObjectCache`] hands out fixed-size objects carved from slabs. The
//! hot path never takes a lock: each CPU owns an [`ArrayCache`] behind an
//! [`IrqGuard`](crate::percpu::IrqGuard). Misses refill a batch from the
//! CPU's node (shared array first, then partial and free slabs), and only an
//! empty node grows a new slab from the page layer.
//!
//! Frees go back to the CPU array; a full array flushes its oldest batch to
//! the shared array or to the slabs. Objects from a slab on another node go
//! straight back to that node, so a node's arrays only ever hold its own
//! objects.
//!
//! Every slot carries a state tag (`free`, `cached`, `allocated`). Freeing
//! anything that is not `allocated` is reported as a double free; addresses
//! outside the cache's slabs, or not on a slot boundary, are foreign.
//!
//! Dropping a cache shrinks it, so every slab without live objects goes back
//! to the page layer even without an explicit destroy.
//!
//! Lock order: CPU guard, then node pool, then the address index.

mod node;
mod slab;

pub use slab::{SlabMeta, SlotState};

use crate::array_cache::ArrayCache;
use crate::error::AllocError;
use crate::events::{self, EventFields, EventLevel};
use crate::flags::AllocFlags;
use crate::geometry::{ColourSpec, Geometry, MIN_ALIGN, Tunables};
use crate::metrics::{AllocatorMetrics, global_metrics};
use crate::page_alloc::PageAllocator;
use crate::percpu::{PerCpu, current_cpu};
use crate::topology::NodeId;
use node::NodeCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Runs once per object when a slab is grown.
pub type Ctor = Arc<dyn Fn(usize) + Send + Sync>;

/// Parameters of a new cache.
#[derive(Clone)]
pub struct CacheSpec {
    pub(crate) name: String,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) colour: ColourSpec,
    pub(crate) forced: AllocFlags,
    pub(crate) ctor: Option<Ctor>,
    pub(crate) tunables: Option<(u32, u32)>,
    pub(crate) shared: Option<u32>,
}

impl CacheSpec {
    /// Creates parameters for objects of `size` bytes with default alignment,
    /// automatic colouring and size-derived tunables.
    #[must_use]
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            align: MIN_ALIGN,
            colour: ColourSpec::Auto,
            forced: AllocFlags::empty(),
            ctor: None,
            tunables: None,
            shared: None,
        }
    }

    /// Sets the object alignment; rounded up to the minimum.
    #[must_use]
    pub fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Sets how successive slabs offset their first object.
    #[must_use]
    pub fn colour(mut self, colour: ColourSpec) -> Self {
        self.colour = colour;
        self
    }

    /// Flags OR-ed into every slab growth, e.g. a zone modifier.
    #[must_use]
    pub fn forced_flags(mut self, flags: AllocFlags) -> Self {
        self.forced = flags;
        self
    }

    /// Sets a constructor run on every object of a newly grown slab.
    #[must_use]
    pub fn ctor(mut self, ctor: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.ctor = Some(Arc::new(ctor));
        self
    }

    /// Per-CPU array capacity and batch size.
    #[must_use]
    pub fn tunables(mut self, limit: u32, batchcount: u32) -> Self {
        self.tunables = Some((limit, batchcount));
        self
    }

    /// Shared array capacity in batches; zero disables it.
    #[must_use]
    pub fn shared(mut self, batches: u32) -> Self {
        self.shared = Some(batches);
        self
    }

    /// Returns the cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the requested object size, before alignment.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl fmt::Debug for CacheSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSpec")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("colour", &self.colour)
            .field("forced", &self.forced)
            .field("ctor", &self.ctor.is_some())
            .field("tunables", &self.tunables)
            .field("shared", &self.shared)
            .finish()
    }
}

#[derive(Default)]
struct CacheCounters {
    allocs: AtomicU64,
    frees: AtomicU64,
    cpu_hits: AtomicU64,
    node_refills: AtomicU64,
    grows: AtomicU64,
    releases: AtomicU64,
    flushes: AtomicU64,
    alien_frees: AtomicU64,
    double_frees: AtomicU64,
    foreign_frees: AtomicU64,
}

/// Point-in-time view of a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub name: String,
    pub object_size: usize,
    pub align: usize,
    pub objects_per_slab: u32,
    pub order: u32,
    pub colour: u32,
    pub colour_off: usize,
    pub tunables: Tunables,
    pub live_objects: usize,
    pub slabs: usize,
    pub full_slabs: usize,
    pub partial_slabs: usize,
    pub free_slabs: usize,
    /// Free slots on slab free lists.
    pub slab_free_objects: usize,
    /// Objects sitting in per-CPU arrays.
    pub cpu_cached: usize,
    /// Objects sitting in shared arrays.
    pub shared_cached: usize,
    pub allocs: u64,
    pub frees: u64,
    pub cpu_hits: u64,
    pub node_refills: u64,
    pub grows: u64,
    pub releases: u64,
    pub flushes: u64,
    pub alien_frees: u64,
    pub double_frees: u64,
    pub foreign_frees: u64,
}

/// A pool of equally sized objects.
pub struct ObjectCache {
    name: String,
    geometry: Geometry,
    tunables: Tunables,
    forced: AllocFlags,
    ctor: Option<Ctor>,
    pages: Arc<PageAllocator>,
    cpus: PerCpu<ArrayCache>,
    nodes: Box<[Mutex<NodeCache>]>,
    /// Every slab of the cache, keyed by base address.
    index: RwLock<BTreeMap<usize, Arc<SlabMeta>>>,
    live: AtomicUsize,
    counters: CacheCounters,
}

impl fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectCache")
            .field("name", &self.name)
            .field("geometry", &self.geometry)
            .field("tunables", &self.tunables)
            .finish_non_exhaustive()
    }
}

impl ObjectCache {
    /// Build a cache on top of `pages`. Fails on an invalid layout, invalid
    /// tunables, or forced flags naming an invalid zone combination.
    pub fn new(spec: CacheSpec, pages: Arc<PageAllocator>) -> Result<Self, AllocError> {
        let geometry = Geometry::new(spec.size, spec.align, spec.colour)?;
        let topology = Arc::clone(pages.topology());
        topology.zone_table().try_decode_zone(spec.forced)?;

        let mut tunables = Tunables::for_size(geometry.size, topology.cpu_count());
        if let Some((limit, batch)) = spec.tunables {
            tunables = tunables.with_override(limit, batch)?;
        }
        if let Some(shared) = spec.shared {
            tunables = tunables.with_shared(shared);
        }

        let limit = tunables.limit as usize;
        let batch = tunables.batchcount as usize;
        let cpus = PerCpu::new(topology.cpu_count(), |_| ArrayCache::new(limit, batch));
        let nodes = topology
            .nodes()
            .iter()
            .map(|node| {
                let shared = (tunables.shared > 0)
                    .then(|| ArrayCache::new(tunables.shared as usize * batch, batch));
                let free_limit = tunables.free_limit(topology.cpus_on_node(node.id()), geometry.num);
                Mutex::new(NodeCache::new(shared, free_limit))
            })
            .collect();

        events::emit(
            EventLevel::Info,
            "cache_create",
            "ok",
            EventFields::cache(&spec.name).order(geometry.order).details(format!(
                "size {} num {} colour {}x{} limit {} batch {} shared {}",
                geometry.size,
                geometry.num,
                geometry.colour,
                geometry.colour_off,
                tunables.limit,
                tunables.batchcount,
                tunables.shared
            )),
        );

        Ok(Self {
            name: spec.name,
            geometry,
            tunables,
            forced: spec.forced,
            ctor: spec.ctor,
            pages,
            cpus,
            nodes,
            index: RwLock::new(BTreeMap::new()),
            live: AtomicUsize::new(0),
            counters: CacheCounters::default(),
        })
    }

    /// Returns the cache name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the slab layout fixed at creation.
    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Returns the per-CPU and shared array sizing.
    #[must_use]
    pub fn tunables(&self) -> Tunables {
        self.tunables
    }

    /// Returns the aligned object size.
    #[must_use]
    pub fn object_size(&self) -> usize {
        self.geometry.size
    }

    /// Returns the flags OR-ed into every slab growth.
    #[must_use]
    pub fn forced_flags(&self) -> AllocFlags {
        self.forced
    }

    /// Objects handed out and not yet freed.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn cpu_index(&self) -> usize {
        current_cpu() % self.cpus.len()
    }

    fn home_node(&self, cpu: usize) -> NodeId {
        self.pages.topology().cpu_to_node(cpu)
    }

    fn batch(&self) -> usize {
        self.tunables.batchcount as usize
    }

    /// Allocate one object. Invalid zone modifiers are rejected even when
    /// the object would come from a cache.
    pub fn alloc(&self, flags: AllocFlags) -> Result<usize, AllocError> {
        let flags = self.pages.allowed_mask().apply(flags);
        self.pages.check_zone(self.forced | flags)?;
        let cpu = self.cpu_index();
        let node = self.home_node(cpu);
        loop {
            if let Some(addr) = self.alloc_cached(cpu, node) {
                return Ok(addr);
            }

            let meta = self.grow(flags, node)?;
            let home = meta.node();
            if home != node {
                // Remote slab: keep our arrays node-local and take one
                // object directly.
                let taken = {
                    let mut pool = self.nodes[home as usize].lock();
                    pool.add_slab(meta);
                    pool.take_one(&self.geometry)
                };
                if let Some(addr) = taken {
                    self.live.fetch_add(1, Ordering::Relaxed);
                    AllocatorMetrics::inc(&self.counters.allocs);
                    return Ok(addr);
                }
                continue;
            }

            let mut ac = self.cpus.disable_irq(cpu);
            {
                let mut pool = self.nodes[node as usize].lock();
                pool.add_slab(meta);
                pool.fill_from_slabs(&mut ac, self.batch(), &self.geometry);
            }
            let popped = ac.pop();
            drop(ac);
            if let Some(addr) = popped {
                return Ok(self.hand_out(addr));
            }
        }
    }

    /// Allocate from the CPU array, refilling it from the node if needed.
    fn alloc_cached(&self, cpu: usize, node: NodeId) -> Option<usize> {
        let mut ac = self.cpus.disable_irq(cpu);
        if let Some(addr) = ac.pop() {
            drop(ac);
            AllocatorMetrics::inc(&self.counters.cpu_hits);
            AllocatorMetrics::inc(&global_metrics().cpu_hits);
            return Some(self.hand_out(addr));
        }
        {
            let mut pool = self.nodes[node as usize].lock();
            self.refill(&mut pool, &mut ac);
        }
        let addr = ac.pop()?;
        drop(ac);
        AllocatorMetrics::inc(&self.counters.node_refills);
        AllocatorMetrics::inc(&global_metrics().node_refills);
        Some(self.hand_out(addr))
    }

    fn refill(&self, pool: &mut NodeCache, ac: &mut ArrayCache) -> usize {
        let want = self.batch().min(ac.room());
        if let Some(shared) = pool.shared.as_mut() {
            let moved = shared.transfer_to(ac, want);
            if moved > 0 {
                return moved;
            }
        }
        pool.fill_from_slabs(ac, want, &self.geometry)
    }

    /// Tag a popped object as allocated.
    fn hand_out(&self, addr: usize) -> usize {
        match self.locate(addr) {
            Ok((meta, idx)) => meta.set(idx, SlotState::Allocated),
            Err(_) => debug_assert!(false, "cached object {addr:#x} has no slab"),
        }
        self.live.fetch_add(1, Ordering::Relaxed);
        AllocatorMetrics::inc(&self.counters.allocs);
        addr
    }

    /// Grow one slab, preferring `node`. No cache lock is held while the
    /// page layer runs or while constructors execute.
    fn grow(&self, flags: AllocFlags, node: NodeId) -> Result<Arc<SlabMeta>, AllocError> {
        let flags = self.pages.allowed_mask().apply(self.forced | flags);
        let page = self
            .pages
            .allocate_masked(flags, self.geometry.order, node)
            .inspect_err(|err| {
                events::emit(
                    EventLevel::Debug,
                    "cache_grow",
                    "failed",
                    EventFields::cache(&self.name)
                        .order(self.geometry.order)
                        .details(err.to_string()),
                );
            })?;

        let colour_idx = self.nodes[page.node as usize]
            .lock()
            .next_colour(self.geometry.colour);
        let s_mem = page.addr() + self.geometry.colour_offset(colour_idx);
        if let Some(ctor) = &self.ctor {
            for idx in 0..self.geometry.num {
                ctor(s_mem + self.geometry.offset_of(idx));
            }
        }

        let meta = Arc::new(SlabMeta::new(page, s_mem, colour_idx, self.geometry.num));
        self.index.write().insert(page.addr(), Arc::clone(&meta));
        AllocatorMetrics::inc(&self.counters.grows);
        AllocatorMetrics::inc(&global_metrics().grows);
        events::emit(
            EventLevel::Debug,
            "cache_grow",
            "ok",
            EventFields::cache(&self.name)
                .addr(page.addr())
                .order(page.order)
                .details(format!("node {} zone {} colour {colour_idx}", page.node, page.zone)),
        );
        Ok(meta)
    }

    /// Return an object to the cache.
    pub fn free(&self, addr: usize) -> Result<(), AllocError> {
        let (meta, idx) = self.locate(addr).inspect_err(|_| {
            AllocatorMetrics::inc(&self.counters.foreign_frees);
            AllocatorMetrics::inc(&global_metrics().foreign_frees);
            events::emit(
                EventLevel::Error,
                "foreign_free",
                "rejected",
                EventFields::cache(&self.name).addr(addr),
            );
        })?;
        if let Err(found) = meta.transition(idx, SlotState::Allocated, SlotState::Cached) {
            AllocatorMetrics::inc(&self.counters.double_frees);
            AllocatorMetrics::inc(&global_metrics().double_frees);
            events::emit(
                EventLevel::Error,
                "double_free",
                "rejected",
                EventFields::cache(&self.name)
                    .addr(addr)
                    .details(format!("slot {idx} is {found:?}")),
            );
            return Err(AllocError::DoubleFree {
                cache: self.name.clone(),
                addr,
            });
        }
        self.live.fetch_sub(1, Ordering::Relaxed);
        AllocatorMetrics::inc(&self.counters.frees);

        let cpu = self.cpu_index();
        let node = self.home_node(cpu);
        let home = meta.node();
        let doomed = if home != node {
            AllocatorMetrics::inc(&self.counters.alien_frees);
            AllocatorMetrics::inc(&global_metrics().alien_frees);
            self.nodes[home as usize]
                .lock()
                .free_block(&[addr], &self.geometry)
        } else {
            let mut ac = self.cpus.disable_irq(cpu);
            let doomed = if ac.is_full() {
                let mut pool = self.nodes[node as usize].lock();
                self.flush(&mut pool, &mut ac)
            } else {
                Vec::new()
            };
            let pushed = ac.push(addr);
            debug_assert!(pushed, "array still full after flush");
            doomed
        };
        self.release(doomed);
        Ok(())
    }

    /// Move the oldest batch out of a full CPU array.
    fn flush(&self, pool: &mut NodeCache, ac: &mut ArrayCache) -> Vec<Arc<SlabMeta>> {
        AllocatorMetrics::inc(&self.counters.flushes);
        AllocatorMetrics::inc(&global_metrics().cpu_flushes);
        if let Some(shared) = pool.shared.as_mut() {
            if shared.room() > 0 {
                ac.transfer_oldest_to(shared, self.batch());
                return Vec::new();
            }
        }
        let objs = ac.take_oldest(self.batch());
        pool.free_block(&objs, &self.geometry)
    }

    /// Hand slabs removed from a node back to the page layer.
    fn release(&self, doomed: Vec<Arc<SlabMeta>>) {
        for meta in doomed {
            let page = meta.page();
            self.index.write().remove(&page.addr());
            if let Err(err) = self.pages.free_pages(page, page.order) {
                events::emit(
                    EventLevel::Error,
                    "slab_release",
                    "failed",
                    EventFields::cache(&self.name)
                        .addr(page.addr())
                        .details(err.to_string()),
                );
                continue;
            }
            AllocatorMetrics::inc(&self.counters.releases);
            AllocatorMetrics::inc(&global_metrics().slab_releases);
            events::emit(
                EventLevel::Debug,
                "slab_release",
                "ok",
                EventFields::cache(&self.name)
                    .addr(page.addr())
                    .order(page.order),
            );
        }
    }

    /// Slab and slot index of an object address.
    fn locate(&self, addr: usize) -> Result<(Arc<SlabMeta>, u32), AllocError> {
        let foreign = || AllocError::ForeignObject {
            cache: self.name.clone(),
            addr,
        };
        let index = self.index.read();
        let (_, meta) = index.range(..=addr).next_back().ok_or_else(foreign)?;
        if addr < meta.s_mem() {
            return Err(foreign());
        }
        let offset = addr - meta.s_mem();
        match self.geometry.slot_of(offset) {
            Some(idx) if idx < meta.num() && self.geometry.offset_of(idx) == offset => {
                Ok((Arc::clone(meta), idx))
            }
            _ => Err(foreign()),
        }
    }

    /// Slot index of an object within its slab.
    #[must_use]
    pub fn index_of(&self, addr: usize) -> Option<u32> {
        self.locate(addr).ok().map(|(_, idx)| idx)
    }

    /// Address of slot `idx` of the slab based at `slab_base`.
    #[must_use]
    pub fn address_of(&self, slab_base: usize, idx: u32) -> Option<usize> {
        let index = self.index.read();
        let meta = index.get(&slab_base)?;
        (idx < meta.num()).then(|| meta.s_mem() + self.geometry.offset_of(idx))
    }

    /// True if `addr` is the start of a slot of this cache.
    #[must_use]
    pub fn owns(&self, addr: usize) -> bool {
        self.locate(addr).is_ok()
    }

    /// Start of the slot containing `addr`, if `addr` is inside one.
    #[must_use]
    pub fn nearest_object(&self, addr: usize) -> Option<usize> {
        let index = self.index.read();
        let (_, meta) = index.range(..=addr).next_back()?;
        if addr < meta.s_mem() {
            return None;
        }
        let idx = self.geometry.slot_of(addr - meta.s_mem())?;
        (idx < meta.num()).then(|| meta.s_mem() + self.geometry.offset_of(idx))
    }

    /// Tag of the slot at `addr`.
    #[must_use]
    pub fn slot_state(&self, addr: usize) -> Option<SlotState> {
        self.locate(addr).ok().map(|(meta, idx)| meta.state(idx))
    }

    /// Base addresses of every slab, ascending.
    #[must_use]
    pub fn slab_bases(&self) -> Vec<usize> {
        self.index.read().keys().copied().collect()
    }

    /// Objects currently in `cpu`'s array.
    #[must_use]
    pub fn cpu_cache_len(&self, cpu: usize) -> usize {
        self.cpus.disable_irq(cpu).avail()
    }

    /// Drain every array and release every fully free slab. Returns the
    /// number of slabs released.
    pub fn shrink(&self) -> usize {
        let mut doomed = Vec::new();
        for cpu in 0..self.cpus.len() {
            let mut ac = self.cpus.disable_irq(cpu);
            if ac.is_empty() {
                continue;
            }
            let objs = ac.drain();
            let mut pool = self.nodes[self.home_node(cpu) as usize].lock();
            doomed.extend(pool.free_block(&objs, &self.geometry));
        }
        for pool in &self.nodes {
            let mut pool = pool.lock();
            let objs = pool.shared.as_mut().map(ArrayCache::drain).unwrap_or_default();
            doomed.extend(pool.free_block(&objs, &self.geometry));
            doomed.extend(pool.drain_free_slabs(usize::MAX));
        }
        let released = doomed.len();
        self.release(doomed);
        events::emit(
            EventLevel::Debug,
            "cache_shrink",
            "ok",
            EventFields::cache(&self.name).details(format!("released {released} slabs")),
        );
        released
    }

    /// Periodic trim. Arrays untouched since the last pass give back about a
    /// fifth of their objects; touched ones are only marked. Each node then
    /// releases a slice of its free slabs. Returns slabs released.
    pub fn reap(&self) -> usize {
        let mut doomed = Vec::new();
        for cpu in 0..self.cpus.len() {
            let mut ac = self.cpus.disable_irq(cpu);
            let Some(objs) = Self::drain_idle(&mut ac) else {
                continue;
            };
            let mut pool = self.nodes[self.home_node(cpu) as usize].lock();
            doomed.extend(pool.free_block(&objs, &self.geometry));
        }
        let num = self.geometry.num as usize;
        for pool in &self.nodes {
            let mut pool = pool.lock();
            let objs = pool.shared.as_mut().and_then(Self::drain_idle);
            if let Some(objs) = objs {
                doomed.extend(pool.free_block(&objs, &self.geometry));
            }
            let slice = (pool.free_limit() + 5 * num - 1) / (5 * num);
            doomed.extend(pool.drain_free_slabs(slice));
        }
        let released = doomed.len();
        self.release(doomed);
        released
    }

    fn drain_idle(ac: &mut ArrayCache) -> Option<Vec<usize>> {
        if ac.is_empty() || ac.clear_touched() {
            return None;
        }
        Some(ac.take_oldest(ac.avail().div_ceil(5)))
    }

    /// Returns a snapshot of layout, occupancy and counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let cpu_cached = (0..self.cpus.len())
            .map(|cpu| self.cpus.disable_irq(cpu).avail())
            .sum();
        let mut stats = CacheStats {
            name: self.name.clone(),
            object_size: self.geometry.size,
            align: self.geometry.align,
            objects_per_slab: self.geometry.num,
            order: self.geometry.order,
            colour: self.geometry.colour,
            colour_off: self.geometry.colour_off,
            tunables: self.tunables,
            live_objects: self.live_objects(),
            slabs: 0,
            full_slabs: 0,
            partial_slabs: 0,
            free_slabs: 0,
            slab_free_objects: 0,
            cpu_cached,
            shared_cached: 0,
            allocs: AllocatorMetrics::get(&self.counters.allocs),
            frees: AllocatorMetrics::get(&self.counters.frees),
            cpu_hits: AllocatorMetrics::get(&self.counters.cpu_hits),
            node_refills: AllocatorMetrics::get(&self.counters.node_refills),
            grows: AllocatorMetrics::get(&self.counters.grows),
            releases: AllocatorMetrics::get(&self.counters.releases),
            flushes: AllocatorMetrics::get(&self.counters.flushes),
            alien_frees: AllocatorMetrics::get(&self.counters.alien_frees),
            double_frees: AllocatorMetrics::get(&self.counters.double_frees),
            foreign_frees: AllocatorMetrics::get(&self.counters.foreign_frees),
        };
        for pool in &self.nodes {
            let counts = pool.lock().counts();
            stats.slabs += counts.slabs;
            stats.full_slabs += counts.full;
            stats.partial_slabs += counts.partial;
            stats.free_slabs += counts.free;
            stats.slab_free_objects += counts.free_objects;
            stats.shared_cached += counts.shared_avail;
        }
        stats
    }
}

impl Drop for ObjectCache {
    fn drop(&mut self) {
        if self.index.get_mut().is_empty() {
            return;
        }
        let live = self.live_objects();
        if live > 0 {
            events::emit(
                EventLevel::Warn,
                "cache_drop",
                "live_objects",
                EventFields::cache(&self.name).details(format!("{live} objects still allocated")),
            );
        }
        self.shrink();
    }
}
