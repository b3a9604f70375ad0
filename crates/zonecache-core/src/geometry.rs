//! Slab geometry and per-CPU tunables.
//!
//! Everything here is computed once when a cache is created: the aligned
//! object size, the slab order and object count, the colour range, and the
//! reciprocal used to turn an in-slab offset into a slot index.

use crate::backend::PAGE_SIZE;
use crate::error::AllocError;
use crate::reciprocal::Reciprocal;
use serde::Serialize;

/// Largest slab order a cache may use.
pub const MAX_SLAB_ORDER: u32 = 5;
/// Smallest object size and alignment.
pub const MIN_ALIGN: usize = 8;
/// Default colour step.
pub const CACHE_LINE: usize = 64;
/// Largest object a slab cache can hold.
pub const MAX_OBJECT_SIZE: usize = PAGE_SIZE << MAX_SLAB_ORDER;
/// Sizes above this use one object per CPU cache.
const HUGE_OBJECT: usize = 128 * 1024;

/// How successive slabs stagger their first object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColourSpec {
    /// Step of one cache line (or the alignment, if larger).
    #[default]
    Auto,
    /// Every slab starts at offset zero.
    Disabled,
    /// Explicit step; must be a multiple of the alignment.
    Step(usize),
}

/// Object layout inside a slab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Aligned object size.
    pub size: usize,
    pub align: usize,
    /// Objects per slab.
    pub num: u32,
    /// Slab order.
    pub order: u32,
    /// Bytes of a slab not covered by objects.
    pub left_over: usize,
    /// Number of distinct colour offsets.
    pub colour: u32,
    /// Bytes between two colour offsets.
    pub colour_off: usize,
    reciprocal: Reciprocal,
}

impl Geometry {
    pub fn new(size: usize, align: usize, colour: ColourSpec) -> Result<Self, AllocError> {
        if size == 0 {
            return Err(AllocError::InvalidGeometry("object size is zero".into()));
        }
        let align = align.max(MIN_ALIGN);
        if !align.is_power_of_two() || align > PAGE_SIZE {
            return Err(AllocError::InvalidGeometry(format!(
                "alignment {align} is not a power of two up to {PAGE_SIZE}"
            )));
        }
        let size = size.max(MIN_ALIGN).next_multiple_of(align);
        if size > MAX_OBJECT_SIZE {
            return Err(AllocError::InvalidGeometry(format!(
                "object size {size} exceeds {MAX_OBJECT_SIZE}"
            )));
        }

        let (order, num, left_over) = Self::estimate(size);
        let (colour, colour_off) = match colour {
            ColourSpec::Disabled => (0, align),
            ColourSpec::Auto => {
                let off = CACHE_LINE.max(align);
                ((left_over / off) as u32, off)
            }
            ColourSpec::Step(off) if off > 0 && off % align == 0 => {
                ((left_over / off) as u32, off)
            }
            ColourSpec::Step(off) => {
                return Err(AllocError::InvalidGeometry(format!(
                    "colour step {off} is not a multiple of alignment {align}"
                )));
            }
        };
        let reciprocal = Reciprocal::new(size as u32).ok_or_else(|| {
            AllocError::InvalidGeometry("object size does not fit a reciprocal".into())
        })?;
        Ok(Self {
            size,
            align,
            num,
            order,
            left_over,
            colour,
            colour_off,
            reciprocal,
        })
    }

    /// Smallest order whose waste is at most an eighth of the slab.
    fn estimate(size: usize) -> (u32, u32, usize) {
        let mut best = (MAX_SLAB_ORDER, 0, 0);
        for order in 0..=MAX_SLAB_ORDER {
            let slab = PAGE_SIZE << order;
            let num = slab / size;
            if num == 0 {
                continue;
            }
            let left_over = slab - num * size;
            best = (order, num as u32, left_over);
            if left_over * 8 <= slab {
                break;
            }
        }
        best
    }

    #[must_use]
    pub const fn slab_bytes(&self) -> usize {
        PAGE_SIZE << self.order
    }

    /// Colour offset in bytes for a colour index.
    #[must_use]
    pub const fn colour_offset(&self, colour_idx: u32) -> usize {
        colour_idx as usize * self.colour_off
    }

    /// Bytes from the first object to the end of the last one.
    #[must_use]
    pub const fn objects_bytes(&self) -> usize {
        self.num as usize * self.size
    }

    /// Slot index of an offset from the first object of a slab. The offset
    /// must lie below [`Self::objects_bytes`].
    #[inline]
    #[must_use]
    pub const fn index_of(&self, offset: usize) -> u32 {
        self.reciprocal.divide(offset as u32)
    }

    /// Slot containing `offset`, or `None` past the last object.
    #[inline]
    #[must_use]
    pub const fn slot_of(&self, offset: usize) -> Option<u32> {
        if offset < self.objects_bytes() {
            Some(self.index_of(offset))
        } else {
            None
        }
    }

    /// Offset of a slot from the first object of a slab.
    #[inline]
    #[must_use]
    pub const fn offset_of(&self, index: u32) -> usize {
        index as usize * self.size
    }
}

/// Per-CPU cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Tunables {
    /// Capacity of each per-CPU cache.
    pub limit: u32,
    /// Objects moved per refill or flush.
    pub batchcount: u32,
    /// Shared array capacity, in batches.
    pub shared: u32,
}

impl Tunables {
    /// Defaults for an object size on a machine with `cpus` CPUs.
    #[must_use]
    pub fn for_size(size: usize, cpus: usize) -> Self {
        let limit = if size > HUGE_OBJECT {
            1
        } else if size > PAGE_SIZE {
            8
        } else if size > 1024 {
            24
        } else if size > 256 {
            54
        } else {
            120
        };
        let shared = if size <= PAGE_SIZE && cpus > 1 { 8 } else { 0 };
        Self {
            limit,
            batchcount: limit.div_ceil(2),
            shared,
        }
    }

    /// Explicit limit and batch size.
    pub fn with_override(self, limit: u32, batchcount: u32) -> Result<Self, AllocError> {
        if batchcount == 0 || batchcount > limit {
            return Err(AllocError::InvalidGeometry(format!(
                "batch {batchcount} must be within 1..={limit}"
            )));
        }
        Ok(Self {
            limit,
            batchcount,
            ..self
        })
    }

    #[must_use]
    pub fn with_shared(self, shared: u32) -> Self {
        Self { shared, ..self }
    }

    /// Free objects a node may hold before fully free slabs are released.
    #[must_use]
    pub fn free_limit(&self, cpus_on_node: usize, num: u32) -> usize {
        (1 + cpus_on_node) * self.batchcount as usize + num as usize
    }
}
