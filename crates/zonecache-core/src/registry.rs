//! Named cache registry and allocator lifecycle.
//!
//! The registry owns every live [`ObjectCache`] by name. It also tracks the
//! coarse lifecycle of the allocator: `Booting` until [`CacheRegistry::mark_up`]
//! widens the permitted mask, `Up` afterwards.

use crate::cache::{CacheSpec, CacheStats, ObjectCache};
use crate::error::AllocError;
use crate::events::{self, EventFields, EventLevel};
use crate::flags::AllocFlags;
use crate::page_alloc::PageAllocator;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Allocator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Early boot: blocking, IO and FS bits are masked off.
    Booting,
    /// Fully up.
    Up,
}

pub struct CacheRegistry {
    pages: Arc<PageAllocator>,
    caches: RwLock<BTreeMap<String, Arc<ObjectCache>>>,
    state: AtomicU8,
}

impl CacheRegistry {
    /// Creates an empty registry over `pages`. Starts `Up` if the mask has
    /// already been widened, `Booting` otherwise.
    #[must_use]
    pub fn new(pages: Arc<PageAllocator>) -> Self {
        let state = if pages.allowed_mask().is_widened() {
            LifecycleState::Up
        } else {
            LifecycleState::Booting
        };
        Self {
            pages,
            caches: RwLock::new(BTreeMap::new()),
            state: AtomicU8::new(state as u8),
        }
    }

    /// Returns the page layer caches grow from.
    #[must_use]
    pub fn pages(&self) -> &Arc<PageAllocator> {
        &self.pages
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        if self.state.load(Ordering::Acquire) == LifecycleState::Up as u8 {
            LifecycleState::Up
        } else {
            LifecycleState::Booting
        }
    }

    /// Leave boot: widen the permitted mask. Returns the mask before the
    /// call. Calling it again is a no-op.
    pub fn mark_up(&self) -> AllocFlags {
        let prior = self.pages.allowed_mask().widen();
        let was = self.state.swap(LifecycleState::Up as u8, Ordering::AcqRel);
        if was != LifecycleState::Up as u8 {
            events::emit(
                EventLevel::Info,
                "lifecycle",
                "up",
                EventFields::default().details(format!("mask {:#x}", self.pages.allowed_mask().current().bits())),
            );
        }
        prior
    }

    /// Create and register a cache.
    pub fn create(&self, spec: CacheSpec) -> Result<Arc<ObjectCache>, AllocError> {
        let mut caches = self.caches.write();
        if caches.contains_key(spec.name()) {
            return Err(AllocError::DuplicateCache(spec.name().to_owned()));
        }
        let cache = Arc::new(ObjectCache::new(spec, Arc::clone(&self.pages))?);
        caches.insert(cache.name().to_owned(), Arc::clone(&cache));
        Ok(cache)
    }

    /// Looks up a registered cache by name.
    pub fn get(&self, name: &str) -> Result<Arc<ObjectCache>, AllocError> {
        self.caches
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| AllocError::UnknownCache(name.to_owned()))
    }

    /// Shrink and unregister a cache. Refused while objects are live.
    pub fn destroy(&self, name: &str) -> Result<(), AllocError> {
        let mut caches = self.caches.write();
        let cache = caches
            .get(name)
            .ok_or_else(|| AllocError::UnknownCache(name.to_owned()))?;
        cache.shrink();
        let active = cache.live_objects();
        if active > 0 {
            events::emit(
                EventLevel::Warn,
                "cache_destroy",
                "busy",
                EventFields::cache(name).details(format!("{active} live objects")),
            );
            return Err(AllocError::CacheBusy {
                cache: name.to_owned(),
                active,
            });
        }
        caches.remove(name);
        events::emit(EventLevel::Info, "cache_destroy", "ok", EventFields::cache(name));
        Ok(())
    }

    /// Returns the names of every registered cache, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    /// Returns the number of registered caches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    /// Returns true if no cache is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }

    fn all(&self) -> Vec<Arc<ObjectCache>> {
        self.caches.read().values().cloned().collect()
    }

    /// Shrink every cache; returns slabs released.
    pub fn shrink_all(&self) -> usize {
        self.all().iter().map(|c| c.shrink()).sum()
    }

    /// Reap every cache; returns slabs released.
    pub fn reap_all(&self) -> usize {
        self.all().iter().map(|c| c.reap()).sum()
    }

    /// Returns a snapshot of every registered cache.
    #[must_use]
    pub fn stats(&self) -> Vec<CacheStats> {
        self.all().iter().map(|c| c.stats()).collect()
    }
}
