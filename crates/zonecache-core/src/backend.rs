//! Contract with the page allocator that owns physical free-page bookkeeping.
//!
//! The object caches and [`PageAllocator`](crate::page_alloc::PageAllocator)
//! only ever build correct requests for this trait and keep correct books on
//! what they received. Free lists, watermarks, reclaim and compaction all live
//! behind it.

use crate::error::BackendError;
use crate::flags::AllocFlags;
use crate::mobility::MigrateType;
use crate::priority::PriorityClass;
use crate::topology::{NodeId, Zonelist};
use crate::zone::Zone;
use serde::Serialize;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Largest order a backend is asked for.
pub const MAX_ORDER: u32 = 10;

/// A naturally aligned block of `1 << order` pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Page {
    pub pfn: u64,
    pub order: u32,
    pub node: NodeId,
    pub zone: Zone,
    pub migrate: MigrateType,
}

impl Page {
    /// Logical base address.
    #[must_use]
    pub const fn addr(&self) -> usize {
        (self.pfn as usize) << PAGE_SHIFT
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        PAGE_SIZE << self.order
    }

    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.addr() && addr < self.addr() + self.size()
    }
}

/// Everything a backend needs to place one block.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    /// Caller flags after masking; priority bits are untouched.
    pub flags: AllocFlags,
    pub order: u32,
    /// Highest zone the request may be served from.
    pub high_zone: Zone,
    /// Search path, preferred node first.
    pub zonelist: &'a Zonelist,
    pub migrate: MigrateType,
    pub preferred_node: NodeId,
}

impl PageRequest<'_> {
    #[must_use]
    pub fn priority(&self) -> PriorityClass {
        PriorityClass::of(self.flags)
    }

    /// Pages in the requested block.
    #[must_use]
    pub fn pages(&self) -> u64 {
        1 << self.order
    }
}

/// Page allocator collaborator.
pub trait PageBackend: Send + Sync {
    /// One attempt to obtain a block. No retrying; the caller owns the policy.
    fn alloc_pages(&self, req: &PageRequest<'_>) -> Result<Page, BackendError>;

    /// Return a block obtained from `alloc_pages`.
    fn free_pages(&self, page: Page, order: u32);

    /// Whether compaction may run for a request with these flags.
    fn allows_compaction(&self, flags: AllocFlags) -> bool {
        flags.compaction_allowed()
    }

    /// Reserve gate for requests above normal priority.
    fn reserve_gate_allows(&self, _flags: AllocFlags) -> bool {
        true
    }

    /// Kick background reclaim. Must not block.
    fn wake_background_reclaim(&self, _req: &PageRequest<'_>) {}

    /// Synchronous reclaim on behalf of a blocking caller. Returns pages freed.
    fn direct_reclaim(&self, _req: &PageRequest<'_>) -> usize {
        0
    }

    /// Synchronous compaction. Returns true if a block of the order may now exist.
    fn compact(&self, _req: &PageRequest<'_>) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_addressing() {
        let page = Page {
            pfn: 0x10,
            order: 2,
            node: 0,
            zone: Zone::Normal,
            migrate: MigrateType::Unmovable,
        };
        assert_eq!(page.addr(), 0x10_000);
        assert_eq!(page.size(), 4 * PAGE_SIZE);
        assert!(page.contains(0x13_fff));
        assert!(!page.contains(0x14_000));
        assert!(!page.contains(0xf_fff));
    }
}
