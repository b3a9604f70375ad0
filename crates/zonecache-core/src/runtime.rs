//! Wiring of the whole allocator.
//!
//! A [`Runtime`] owns the topology, the permitted mask, the page layer, the
//! cache registry and (optionally) the size-class router. It starts in the
//! booting state; [`Runtime::mark_up`] widens the mask once the embedding
//! system is ready for blocking allocations.
//!
//! One runtime can be installed per process with [`install`]; the free
//! functions of this module then operate on it and return
//! [`AllocError::NotInitialized`] before that.

use crate::allowed::{AllowedMask, SuspendGuard};
use crate::backend::{Page, PageBackend};
use crate::cache::{CacheSpec, CacheStats, ObjectCache};
use crate::config::{RuntimeConfig, runtime_config};
use crate::error::AllocError;
use crate::events::{self, EventFields, EventLevel};
use crate::flags::AllocFlags;
use crate::kmalloc::Kmalloc;
use crate::metrics::{MetricsSnapshot, global_metrics};
use crate::page_alloc::PageAllocator;
use crate::registry::{CacheRegistry, LifecycleState};
use crate::simulated::SimulatedBackend;
use crate::topology::{NodeId, Topology};
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// Serializable summary of a runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeReport {
    pub state: LifecycleState,
    pub allowed_mask: u32,
    pub nodes: usize,
    pub cpus: usize,
    pub metrics: MetricsSnapshot,
    pub caches: Vec<CacheStats>,
}

pub struct Runtime {
    config: RuntimeConfig,
    pages: Arc<PageAllocator>,
    registry: CacheRegistry,
    kmalloc: Option<Kmalloc>,
}

impl Runtime {
    /// Boot a runtime over an arbitrary backend.
    pub fn new(
        config: RuntimeConfig,
        topology: Arc<Topology>,
        backend: Arc<dyn PageBackend>,
    ) -> Result<Self, AllocError> {
        let mask = Arc::new(AllowedMask::new());
        let pages = Arc::new(PageAllocator::new(
            topology,
            backend,
            mask,
            config.retry(),
            config.grouping,
        ));
        let registry = CacheRegistry::new(Arc::clone(&pages));
        let kmalloc = if config.kmalloc {
            Some(Kmalloc::new(&registry)?)
        } else {
            None
        };
        events::emit(
            EventLevel::Info,
            "runtime",
            "booting",
            EventFields::default().details(format!(
                "nodes {} cpus {} caches {}",
                pages.topology().node_count(),
                pages.topology().cpu_count(),
                registry.len()
            )),
        );
        Ok(Self {
            config,
            pages,
            registry,
            kmalloc,
        })
    }

    /// Boot a runtime over the simulated backend described by `config`.
    pub fn simulated(config: RuntimeConfig) -> Result<(Self, Arc<SimulatedBackend>), AllocError> {
        let topology = Arc::new(config.topology()?);
        let backend = Arc::new(SimulatedBackend::new(&topology, config.simulated));
        let runtime = Self::new(config, topology, backend.clone())?;
        Ok((runtime, backend))
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn topology(&self) -> &Arc<Topology> {
        self.pages.topology()
    }

    #[must_use]
    pub fn pages(&self) -> &Arc<PageAllocator> {
        &self.pages
    }

    #[must_use]
    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    #[must_use]
    pub fn allowed_mask(&self) -> &Arc<AllowedMask> {
        self.pages.allowed_mask()
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.registry.state()
    }

    /// Leave boot. Returns the mask in force before.
    pub fn mark_up(&self) -> AllocFlags {
        self.registry.mark_up()
    }

    pub fn allocate_pages(
        &self,
        flags: AllocFlags,
        order: u32,
        preferred_node: NodeId,
    ) -> Result<Page, AllocError> {
        self.pages.allocate_pages(flags, order, preferred_node)
    }

    pub fn free_pages(&self, page: Page, order: u32) -> Result<(), AllocError> {
        self.pages.free_pages(page, order)
    }

    pub fn cache_create(&self, spec: CacheSpec) -> Result<Arc<ObjectCache>, AllocError> {
        self.registry.create(spec)
    }

    pub fn cache(&self, name: &str) -> Result<Arc<ObjectCache>, AllocError> {
        self.registry.get(name)
    }

    pub fn cache_alloc(&self, cache: &ObjectCache, flags: AllocFlags) -> Result<usize, AllocError> {
        cache.alloc(flags)
    }

    pub fn cache_free(&self, cache: &ObjectCache, addr: usize) -> Result<(), AllocError> {
        cache.free(addr)
    }

    pub fn cache_destroy(&self, name: &str) -> Result<(), AllocError> {
        self.registry.destroy(name)
    }

    fn kmalloc_router(&self) -> Result<&Kmalloc, AllocError> {
        self.kmalloc.as_ref().ok_or(AllocError::NotInitialized)
    }

    pub fn kmalloc(&self, size: usize, flags: AllocFlags) -> Result<usize, AllocError> {
        self.kmalloc_router()?.kmalloc(size, flags)
    }

    pub fn kfree(&self, addr: usize) -> Result<(), AllocError> {
        self.kmalloc_router()?.kfree(addr)
    }

    #[must_use]
    pub fn ksize(&self, addr: usize) -> Option<usize> {
        self.kmalloc.as_ref()?.ksize(addr)
    }

    /// Drop I/O and filesystem permission; returns the prior mask.
    pub fn restrict_allowed(&self) -> AllocFlags {
        self.allowed_mask().restrict()
    }

    pub fn restore_allowed(&self, prior: AllocFlags) {
        self.allowed_mask().restore(prior);
    }

    /// Restrict for the lifetime of the guard.
    #[must_use]
    pub fn suspend(&self) -> SuspendGuard<'_> {
        self.allowed_mask().suspend()
    }

    #[must_use]
    pub fn report(&self) -> RuntimeReport {
        RuntimeReport {
            state: self.state(),
            allowed_mask: self.allowed_mask().current().bits(),
            nodes: self.topology().node_count(),
            cpus: self.topology().cpu_count(),
            metrics: global_metrics().snapshot(),
            caches: self.registry.stats(),
        }
    }
}

static GLOBAL_RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Install the process-wide runtime. Only the first call succeeds.
pub fn install(runtime: Runtime) -> Result<&'static Runtime, AllocError> {
    GLOBAL_RUNTIME
        .set(runtime)
        .map_err(|_| AllocError::AlreadyInitialized)?;
    global()
}

/// Boot a simulated runtime from the environment, install it and mark it up.
pub fn init_from_env() -> Result<&'static Runtime, AllocError> {
    let (runtime, _) = Runtime::simulated(runtime_config().clone())?;
    let runtime = install(runtime)?;
    runtime.mark_up();
    Ok(runtime)
}

pub fn global() -> Result<&'static Runtime, AllocError> {
    GLOBAL_RUNTIME.get().ok_or(AllocError::NotInitialized)
}

pub fn allocate_pages(flags: AllocFlags, order: u32, preferred_node: NodeId) -> Result<Page, AllocError> {
    global()?.allocate_pages(flags, order, preferred_node)
}

pub fn free_pages(page: Page, order: u32) -> Result<(), AllocError> {
    global()?.free_pages(page, order)
}

pub fn cache_create(spec: CacheSpec) -> Result<Arc<ObjectCache>, AllocError> {
    global()?.cache_create(spec)
}

pub fn cache_destroy(name: &str) -> Result<(), AllocError> {
    global()?.cache_destroy(name)
}

pub fn kmalloc(size: usize, flags: AllocFlags) -> Result<usize, AllocError> {
    global()?.kmalloc(size, flags)
}

pub fn kfree(addr: usize) -> Result<(), AllocError> {
    global()?.kfree(addr)
}

pub fn restrict_allowed() -> Result<AllocFlags, AllocError> {
    Ok(global()?.restrict_allowed())
}

pub fn restore_allowed(prior: AllocFlags) -> Result<(), AllocError> {
    global()?.restore_allowed(prior);
    Ok(())
}
