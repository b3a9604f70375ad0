//! One backing block carved into fixed-size slots.

use crate::backend::Page;
use crate::topology::NodeId;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where a slot currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SlotState {
    /// On its slab's free list.
    Free = 0,
    /// In a per-CPU or shared array.
    Cached = 1,
    /// Handed out to a caller.
    Allocated = 2,
}

impl SlotState {
    const fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Cached,
            2 => Self::Allocated,
            _ => Self::Free,
        }
    }
}

/// Immutable description of a slab plus its per-slot tags. Shared between
/// the owning node and the cache-wide address index.
#[derive(Debug)]
pub struct SlabMeta {
    page: Page,
    s_mem: usize,
    colour_idx: u32,
    tags: Box<[AtomicU8]>,
}

impl SlabMeta {
    pub(crate) fn new(page: Page, s_mem: usize, colour_idx: u32, num: u32) -> Self {
        Self {
            page,
            s_mem,
            colour_idx,
            tags: (0..num).map(|_| AtomicU8::new(SlotState::Free as u8)).collect(),
        }
    }

    #[must_use]
    pub fn page(&self) -> Page {
        self.page
    }

    /// Base address of the backing block.
    #[must_use]
    pub fn base(&self) -> usize {
        self.page.addr()
    }

    /// Address of slot 0.
    #[must_use]
    pub fn s_mem(&self) -> usize {
        self.s_mem
    }

    #[must_use]
    pub fn colour_idx(&self) -> u32 {
        self.colour_idx
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.page.node
    }

    #[must_use]
    pub fn num(&self) -> u32 {
        self.tags.len() as u32
    }

    #[must_use]
    pub fn state(&self, idx: u32) -> SlotState {
        SlotState::from_u8(self.tags[idx as usize].load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, idx: u32, state: SlotState) {
        self.tags[idx as usize].store(state as u8, Ordering::Release);
    }

    /// Atomically moves a slot from `from` to `to`. On failure returns the
    /// state actually found.
    pub(crate) fn transition(&self, idx: u32, from: SlotState, to: SlotState) -> Result<(), SlotState> {
        self.tags[idx as usize]
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SlotState::from_u8)
    }
}

/// Node-private bookkeeping of a slab; only touched under the node lock.
#[derive(Debug)]
pub(crate) struct Slab {
    pub(crate) meta: Arc<SlabMeta>,
    /// Free slot indices; the next one handed out is at the end.
    pub(crate) free: Vec<u32>,
    /// Slots not on `free`.
    pub(crate) active: u32,
}

impl Slab {
    pub(crate) fn new(meta: Arc<SlabMeta>) -> Self {
        let free = (0..meta.num()).rev().collect();
        Self {
            meta,
            free,
            active: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobility::MigrateType;
    use crate::zone::Zone;

    fn meta(num: u32) -> SlabMeta {
        let page = Page {
            pfn: 4,
            order: 0,
            node: 0,
            zone: Zone::Normal,
            migrate: MigrateType::Unmovable,
        };
        SlabMeta::new(page, page.addr() + 64, 1, num)
    }

    #[test]
    fn slots_start_free() {
        let m = meta(3);
        assert_eq!(m.num(), 3);
        assert_eq!(m.base(), 0x4000);
        assert_eq!(m.s_mem(), 0x4040);
        assert!((0..3).all(|i| m.state(i) == SlotState::Free));
    }

    #[test]
    fn transition_rejects_wrong_state() {
        let m = meta(2);
        m.set(0, SlotState::Allocated);
        assert!(m.transition(0, SlotState::Allocated, SlotState::Cached).is_ok());
        assert_eq!(
            m.transition(0, SlotState::Allocated, SlotState::Cached),
            Err(SlotState::Cached)
        );
        assert_eq!(
            m.transition(1, SlotState::Allocated, SlotState::Cached),
            Err(SlotState::Free)
        );
    }

    #[test]
    fn new_slab_hands_out_lowest_index_first() {
        let slab = Slab::new(Arc::new(meta(4)));
        assert_eq!(slab.free.last(), Some(&0));
        assert_eq!(slab.active, 0);
    }
}
