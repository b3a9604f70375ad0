//! General-purpose sized allocation.
//!
//! Small requests are routed to a per-class object cache (`kmalloc-<size>`,
//! or `dma-kmalloc-<size>` for DMA requests when a DMA zone exists). Larger
//! requests take a block of pages directly and are tracked by address so
//! `kfree` and `ksize` can find them.

use crate::backend::Page;
use crate::cache::{CacheSpec, ObjectCache};
use crate::error::AllocError;
use crate::flags::AllocFlags;
use crate::page_alloc::PageAllocator;
use crate::percpu::current_cpu;
use crate::registry::CacheRegistry;
use crate::size_class::{self, NUM_SIZE_CLASSES};
use crate::zone::Zone;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Address returned for zero-sized requests. Never backed by memory and
/// accepted by `kfree`.
pub const ZERO_SIZE_ADDR: usize = 16;

pub struct Kmalloc {
    normal: Vec<Arc<ObjectCache>>,
    dma: Option<Vec<Arc<ObjectCache>>>,
    pages: Arc<PageAllocator>,
    large: Mutex<HashMap<usize, Page>>,
}

impl Kmalloc {
    /// Create the class caches in `registry`.
    pub fn new(registry: &CacheRegistry) -> Result<Self, AllocError> {
        let normal = Self::create_classes(registry, "kmalloc", AllocFlags::empty())?;
        let has_dma = registry.pages().topology().zone_config().has(Zone::Dma);
        let dma = if has_dma {
            Some(Self::create_classes(registry, "dma-kmalloc", AllocFlags::DMA)?)
        } else {
            None
        };
        Ok(Self {
            normal,
            dma,
            pages: Arc::clone(registry.pages()),
            large: Mutex::new(HashMap::new()),
        })
    }

    fn create_classes(
        registry: &CacheRegistry,
        prefix: &str,
        forced: AllocFlags,
    ) -> Result<Vec<Arc<ObjectCache>>, AllocError> {
        (0..NUM_SIZE_CLASSES)
            .map(|idx| {
                registry.create(
                    CacheSpec::new(size_class::class_name(prefix, idx), size_class::bin_size(idx))
                        .align(size_class::class_align(idx))
                        .forced_flags(forced),
                )
            })
            .collect()
    }

    /// Class cache serving `size` bytes with `flags`.
    #[must_use]
    pub fn cache_for(&self, size: usize, flags: AllocFlags) -> Option<&Arc<ObjectCache>> {
        let idx = size_class::bin_index(size);
        let table = match &self.dma {
            Some(dma) if flags.contains(AllocFlags::DMA) => dma,
            _ => &self.normal,
        };
        table.get(idx)
    }

    /// Allocate at least `size` bytes.
    pub fn kmalloc(&self, size: usize, flags: AllocFlags) -> Result<usize, AllocError> {
        if size == 0 {
            return Ok(ZERO_SIZE_ADDR);
        }
        if let Some(cache) = self.cache_for(size, flags) {
            return cache.alloc(flags);
        }
        let pages = &self.pages;
        let order = size_class::pages_order(size);
        let node = pages.topology().cpu_to_node(current_cpu());
        let page = pages.allocate_pages(flags | AllocFlags::COMP, order, node)?;
        self.large.lock().insert(page.addr(), page);
        Ok(page.addr())
    }

    /// Free memory returned by [`Kmalloc::kmalloc`].
    pub fn kfree(&self, addr: usize) -> Result<(), AllocError> {
        if addr == 0 || addr == ZERO_SIZE_ADDR {
            return Ok(());
        }
        let large = self.large.lock().remove(&addr);
        if let Some(page) = large {
            return self.pages.free_pages(page, page.order);
        }
        match self.owner(addr) {
            Some(cache) => cache.free(addr),
            None => Err(AllocError::ForeignObject {
                cache: "kmalloc".into(),
                addr,
            }),
        }
    }

    /// Usable size of an allocation.
    #[must_use]
    pub fn ksize(&self, addr: usize) -> Option<usize> {
        if addr == ZERO_SIZE_ADDR {
            return Some(0);
        }
        if let Some(page) = self.large.lock().get(&addr) {
            return Some(page.size());
        }
        self.owner(addr).map(|cache| cache.object_size())
    }

    fn owner(&self, addr: usize) -> Option<&Arc<ObjectCache>> {
        self.normal
            .iter()
            .chain(self.dma.iter().flatten())
            .find(|cache| cache.owns(addr))
    }

    /// Large allocations currently outstanding.
    #[must_use]
    pub fn large_outstanding(&self) -> usize {
        self.large.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowed::AllowedMask;
    use crate::page_alloc::RetryConfig;
    use crate::percpu::bind_current_thread;
    use crate::simulated::{SimulatedBackend, SimulatedConfig};
    use crate::topology::Topology;
    use crate::zone::ZoneConfig;

    fn setup(zones: ZoneConfig) -> (CacheRegistry, Kmalloc, Arc<SimulatedBackend>) {
        let topo = Arc::new(Topology::single_node(1, zones).unwrap());
        let backend = Arc::new(SimulatedBackend::new(&topo, SimulatedConfig::default()));
        let mask = Arc::new(AllowedMask::new());
        mask.widen();
        let pages = PageAllocator::new(topo, backend.clone(), mask, RetryConfig::default(), true);
        let registry = CacheRegistry::new(Arc::new(pages));
        let km = Kmalloc::new(&registry).unwrap();
        (registry, km, backend)
    }

    #[test]
    fn creates_class_caches() {
        let (registry, km, _) = setup(ZoneConfig::default());
        assert_eq!(registry.len(), 2 * NUM_SIZE_CLASSES);
        assert!(registry.get("kmalloc-192").is_ok());
        assert!(registry.get("dma-kmalloc-8k").is_ok());
        assert_eq!(km.cache_for(100, AllocFlags::KERNEL).unwrap().name(), "kmalloc-128");
        assert_eq!(
            km.cache_for(100, AllocFlags::KERNEL | AllocFlags::DMA).unwrap().name(),
            "dma-kmalloc-128"
        );
        assert!(km.cache_for(9000, AllocFlags::KERNEL).is_none());

        let (registry, km, _) = setup(ZoneConfig::minimal());
        assert_eq!(registry.len(), NUM_SIZE_CLASSES);
        assert_eq!(
            km.cache_for(100, AllocFlags::DMA).unwrap().name(),
            "kmalloc-128"
        );
    }

    #[test]
    fn routes_small_and_large() {
        bind_current_thread(0);
        let (_, km, backend) = setup(ZoneConfig::default());
        let small = km.kmalloc(40, AllocFlags::KERNEL).unwrap();
        assert_eq!(small % 64, 0);
        assert_eq!(km.ksize(small), Some(64));

        let large = km.kmalloc(3 * 4096, AllocFlags::KERNEL).unwrap();
        assert_eq!(km.ksize(large), Some(4 * 4096));
        assert_eq!(km.large_outstanding(), 1);
        let before = backend.outstanding_pages();
        km.kfree(large).unwrap();
        assert_eq!(backend.outstanding_pages(), before - 4);

        km.kfree(small).unwrap();
        assert!(matches!(km.kfree(small), Err(AllocError::DoubleFree { .. })));
        assert!(matches!(km.kfree(0x42), Err(AllocError::ForeignObject { .. })));
    }

    #[test]
    fn zero_size() {
        let (_, km, _) = setup(ZoneConfig::default());
        let addr = km.kmalloc(0, AllocFlags::KERNEL).unwrap();
        assert_eq!(addr, ZERO_SIZE_ADDR);
        assert_eq!(km.ksize(addr), Some(0));
        assert!(km.kfree(addr).is_ok());
        assert!(km.kfree(0).is_ok());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let (_, km, _) = setup(ZoneConfig::default());
        assert!(matches!(
            km.kmalloc(8 << 20, AllocFlags::KERNEL),
            Err(AllocError::InvalidOrder { .. })
        ));
    }
}
