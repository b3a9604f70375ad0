//! Per-node slab pool.
//!
//! Holds the node's shared array and every slab the cache owns on the node,
//! split into partial, free and full lists. All methods run under the node
//! lock and only ever move objects in bulk.

use super::slab::{Slab, SlabMeta, SlotState};
use crate::array_cache::ArrayCache;
use crate::geometry::Geometry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlabList {
    Partial,
    Free,
    Full,
}

/// Counts reported by [`NodeCache::counts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct NodeCounts {
    pub slabs: usize,
    pub partial: usize,
    pub free: usize,
    pub full: usize,
    pub free_objects: usize,
    pub shared_avail: usize,
}

#[derive(Debug)]
pub(crate) struct NodeCache {
    pub(crate) shared: Option<ArrayCache>,
    slabs: BTreeMap<usize, Slab>,
    partial: BTreeSet<usize>,
    free: BTreeSet<usize>,
    full: BTreeSet<usize>,
    /// Free slots across this node's slabs.
    free_objects: usize,
    free_limit: usize,
    colour_next: u32,
}

impl NodeCache {
    pub(crate) fn new(shared: Option<ArrayCache>, free_limit: usize) -> Self {
        Self {
            shared,
            slabs: BTreeMap::new(),
            partial: BTreeSet::new(),
            free: BTreeSet::new(),
            full: BTreeSet::new(),
            free_objects: 0,
            free_limit,
            colour_next: 0,
        }
    }

    fn list_of(active: u32, num: u32) -> SlabList {
        if active == 0 {
            SlabList::Free
        } else if active == num {
            SlabList::Full
        } else {
            SlabList::Partial
        }
    }

    fn list_mut(&mut self, list: SlabList) -> &mut BTreeSet<usize> {
        match list {
            SlabList::Partial => &mut self.partial,
            SlabList::Free => &mut self.free,
            SlabList::Full => &mut self.full,
        }
    }

    fn relist(&mut self, base: usize, from: SlabList, to: SlabList) {
        if from != to {
            self.list_mut(from).remove(&base);
            self.list_mut(to).insert(base);
        }
    }

    /// Colour index for the next slab grown on this node.
    pub(crate) fn next_colour(&mut self, colour: u32) -> u32 {
        let mut offset = self.colour_next;
        self.colour_next += 1;
        if self.colour_next >= colour {
            self.colour_next = 0;
        }
        if offset >= colour {
            offset = 0;
        }
        offset
    }

    /// Adopt a freshly grown slab with every slot free.
    pub(crate) fn add_slab(&mut self, meta: Arc<SlabMeta>) {
        let base = meta.base();
        self.free_objects += meta.num() as usize;
        self.free.insert(base);
        self.slabs.insert(base, Slab::new(meta));
    }

    /// Pops one slot from `base`, tagging it `state`.
    fn take_from(&mut self, base: usize, state: SlotState, geo: &Geometry) -> Option<usize> {
        let slab = self.slabs.get_mut(&base)?;
        let num = slab.meta.num();
        let before = Self::list_of(slab.active, num);
        let idx = slab.free.pop()?;
        slab.active += 1;
        slab.meta.set(idx, state);
        let addr = slab.meta.s_mem() + geo.offset_of(idx);
        let after = Self::list_of(slab.active, num);
        self.free_objects -= 1;
        self.relist(base, before, after);
        Some(addr)
    }

    fn next_source(&self) -> Option<usize> {
        self.partial.first().or_else(|| self.free.first()).copied()
    }

    /// Moves up to `max` objects from slabs (partial first, then free) into
    /// `dst`. Returns the number moved.
    pub(crate) fn fill_from_slabs(&mut self, dst: &mut ArrayCache, max: usize, geo: &Geometry) -> usize {
        let want = max.min(dst.room());
        let mut moved = 0;
        while moved < want {
            let Some(base) = self.next_source() else {
                break;
            };
            match self.take_from(base, SlotState::Cached, geo) {
                Some(addr) => {
                    dst.push(addr);
                    moved += 1;
                }
                None => break,
            }
        }
        if moved > 0 {
            dst.mark_touched();
        }
        moved
    }

    /// Hands one object straight to a caller.
    pub(crate) fn take_one(&mut self, geo: &Geometry) -> Option<usize> {
        let base = self.next_source()?;
        self.take_from(base, SlotState::Allocated, geo)
    }

    /// Returns cached or allocated objects to their slabs. Slabs that become
    /// fully free while the node holds more than its free limit are removed
    /// and returned for release.
    pub(crate) fn free_block(&mut self, addrs: &[usize], geo: &Geometry) -> Vec<Arc<SlabMeta>> {
        let mut doomed = Vec::new();
        for &addr in addrs {
            let Some((&base, slab)) = self.slabs.range_mut(..=addr).next_back() else {
                debug_assert!(false, "object {addr:#x} has no slab on this node");
                continue;
            };
            let num = slab.meta.num();
            let Some(idx) = addr
                .checked_sub(slab.meta.s_mem())
                .and_then(|offset| geo.slot_of(offset))
                .filter(|&idx| idx < num)
            else {
                debug_assert!(false, "object {addr:#x} is outside its slab");
                continue;
            };
            let before = Self::list_of(slab.active, num);
            slab.meta.set(idx, SlotState::Free);
            slab.free.push(idx);
            slab.active -= 1;
            let after = Self::list_of(slab.active, num);
            self.free_objects += 1;
            self.relist(base, before, after);
            if after == SlabList::Free && self.free_objects > self.free_limit {
                if let Some(meta) = self.remove_free_slab(base) {
                    doomed.push(meta);
                }
            }
        }
        doomed
    }

    fn remove_free_slab(&mut self, base: usize) -> Option<Arc<SlabMeta>> {
        if !self.free.remove(&base) {
            return None;
        }
        let slab = self.slabs.remove(&base)?;
        self.free_objects -= slab.meta.num() as usize;
        Some(slab.meta)
    }

    /// Removes up to `max` fully free slabs.
    pub(crate) fn drain_free_slabs(&mut self, max: usize) -> Vec<Arc<SlabMeta>> {
        let bases: Vec<usize> = self.free.iter().take(max).copied().collect();
        bases
            .into_iter()
            .filter_map(|base| self.remove_free_slab(base))
            .collect()
    }

    pub(crate) fn free_limit(&self) -> usize {
        self.free_limit
    }

    pub(crate) fn counts(&self) -> NodeCounts {
        NodeCounts {
            slabs: self.slabs.len(),
            partial: self.partial.len(),
            free: self.free.len(),
            full: self.full.len(),
            free_objects: self.free_objects,
            shared_avail: self.shared.as_ref().map_or(0, ArrayCache::avail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Page;
    use crate::geometry::ColourSpec;
    use crate::mobility::MigrateType;
    use crate::zone::Zone;

    fn slab(pfn: u64, geo: &Geometry) -> Arc<SlabMeta> {
        let page = Page {
            pfn,
            order: geo.order,
            node: 0,
            zone: Zone::Normal,
            migrate: MigrateType::Unmovable,
        };
        Arc::new(SlabMeta::new(page, page.addr(), 0, geo.num))
    }

    fn geo() -> Geometry {
        Geometry::new(1024, 8, ColourSpec::Disabled).unwrap()
    }

    #[test]
    fn fill_prefers_partial_slabs() {
        let geo = geo();
        let mut node = NodeCache::new(None, 100);
        node.add_slab(slab(1, &geo));
        let first = node.take_one(&geo).unwrap();
        assert_eq!(first, 0x1000);
        node.add_slab(slab(2, &geo));
        let mut ac = ArrayCache::new(8, 4);
        assert_eq!(node.fill_from_slabs(&mut ac, 4, &geo), 4);
        let got = ac.drain();
        assert_eq!(&got[..3], &[0x1400, 0x1800, 0x1c00]);
        assert_eq!(got[3], 0x2000);
        let counts = node.counts();
        assert_eq!((counts.full, counts.partial, counts.free), (1, 1, 0));
        assert_eq!(counts.free_objects, 3);
    }

    #[test]
    fn free_block_releases_above_free_limit() {
        let geo = geo();
        let mut node = NodeCache::new(None, 2);
        let meta = slab(1, &geo);
        node.add_slab(Arc::clone(&meta));
        let mut ac = ArrayCache::new(8, 4);
        node.fill_from_slabs(&mut ac, 4, &geo);
        assert_eq!(meta.state(0), SlotState::Cached);
        let objs = ac.drain();
        let doomed = node.free_block(&objs, &geo);
        assert_eq!(doomed.len(), 1);
        assert_eq!(doomed[0].base(), 0x1000);
        assert_eq!(node.counts(), NodeCounts::default());
    }

    #[test]
    fn free_block_keeps_slabs_under_free_limit() {
        let geo = geo();
        let mut node = NodeCache::new(None, 100);
        node.add_slab(slab(1, &geo));
        let addr = node.take_one(&geo).unwrap();
        assert!(node.free_block(&[addr], &geo).is_empty());
        assert_eq!(node.counts().free, 1);
        assert_eq!(node.drain_free_slabs(usize::MAX).len(), 1);
        assert_eq!(node.counts().slabs, 0);
    }

    #[test]
    fn colour_cycles() {
        let mut node = NodeCache::new(None, 0);
        let seq: Vec<u32> = (0..5).map(|_| node.next_colour(3)).collect();
        assert_eq!(seq, vec![0, 1, 2, 0, 1]);
        let mut node = NodeCache::new(None, 0);
        assert_eq!(node.next_colour(0), 0);
        assert_eq!(node.next_colour(0), 0);
    }
}
