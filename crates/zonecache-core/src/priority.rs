//! Priority classes and the watermark contract.
//!
//! The allocator never gates reserves itself. It classifies a request, hands
//! the priority bits to the page backend untouched, and lets the backend's
//! reserve gate decide. "Forbid reserves" always beats "unrestricted access".

use crate::flags::AllocFlags;
use serde::Serialize;

/// How deep into the reserves a request may reach, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Normal,
    /// HIGH: part of the reserve.
    High,
    /// ATOMIC: caller cannot reclaim, so it gets more of the reserve.
    Atomic,
    /// MEMALLOC without NOMEMALLOC: no watermark at all.
    Emergency,
}

impl PriorityClass {
    #[must_use]
    pub const fn of(flags: AllocFlags) -> Self {
        if emergency_reserve_allowed(flags) {
            Self::Emergency
        } else if flags.contains(AllocFlags::ATOMIC) {
            Self::Atomic
        } else if flags.contains(AllocFlags::HIGH) {
            Self::High
        } else {
            Self::Normal
        }
    }

    /// True if the backend's reserve gate must be consulted.
    #[must_use]
    pub const fn uses_reserves(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

/// Unrestricted reserve access, unless explicitly forbidden.
#[must_use]
pub const fn emergency_reserve_allowed(flags: AllocFlags) -> bool {
    flags.contains(AllocFlags::MEMALLOC) && !flags.contains(AllocFlags::NOMEMALLOC)
}

/// The priority bits of `flags`, exactly as they must reach the backend.
#[must_use]
pub const fn priority_bits(flags: AllocFlags) -> AllocFlags {
    flags.intersection(AllocFlags::PRIORITY_MASK)
}

/// Free pages that must remain after satisfying a request, given a zone's
/// minimum watermark. HIGH halves the floor, ATOMIC removes a further
/// quarter, emergency access ignores it.
#[must_use]
pub const fn watermark_floor(flags: AllocFlags, min: u64) -> u64 {
    if emergency_reserve_allowed(flags) {
        return 0;
    }
    let mut floor = min;
    if flags.contains(AllocFlags::HIGH) {
        floor -= floor / 2;
    }
    if flags.contains(AllocFlags::ATOMIC) {
        floor -= floor / 4;
    }
    floor
}
