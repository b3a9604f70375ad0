//! Allocation flags.
//!
//! `AllocFlags` is an immutable bitmask carried by every page or object
//! request. The layout is stable and shared with external tooling: the zone
//! modifiers occupy the low nibble, followed by the mobility, watermark,
//! reclaim and action modifiers at fixed positions. Building the crate with
//! the `lockdep` feature adds one debug-tracking bit at the top.
//!
//! Derived flag sets (for example the restricted set used by an allocation
//! nested inside reclaim) are always new values; nothing here mutates a
//! caller's flags in place.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Allocation request modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct AllocFlags: u32 {
        /// Constrained-low placement (DMA zone).
        const DMA = 0x01;
        /// Prefer high memory.
        const HIGHMEM = 0x02;
        /// 32-bit addressable placement.
        const DMA32 = 0x04;
        /// Movable placement allowed; also the movable mobility bit.
        const MOVABLE = 0x08;
        /// Reclaimable mobility bit.
        const RECLAIMABLE = 0x10;
        /// High priority; may dip into part of the reserves.
        const HIGH = 0x20;
        /// Reclaim may start physical I/O.
        const IO = 0x40;
        /// Reclaim may call into filesystem code.
        const FS = 0x80;
        /// Zero-fill the result.
        const ZERO = 0x100;
        /// Caller cannot reclaim or sleep and is high priority.
        const ATOMIC = 0x200;
        /// Caller may enter direct reclaim (and therefore block).
        const DIRECT_RECLAIM = 0x400;
        /// Background reclaim may be woken when watermarks are low.
        const KSWAPD_RECLAIM = 0x800;
        /// Caller intends to dirty the page.
        const WRITE = 0x1000;
        /// Suppress failure diagnostics.
        const NOWARN = 0x2000;
        /// Retry harder, but failure is still allowed.
        const RETRY_MAYFAIL = 0x4000;
        /// Never fail; retry indefinitely.
        const NOFAIL = 0x8000;
        /// Fail fast, no retry.
        const NORETRY = 0x10000;
        /// Unrestricted access to the emergency reserves.
        const MEMALLOC = 0x20000;
        /// Compound-object metadata.
        const COMP = 0x40000;
        /// Explicitly forbid the emergency reserves.
        const NOMEMALLOC = 0x80000;
        /// Enforce the cpuset memory policy.
        const HARDWALL = 0x100000;
        /// Allocate on the requested node only, no fallback.
        const THISNODE = 0x200000;
        /// Charge the allocation to the accounting collaborator.
        const ACCOUNT = 0x400000;
        /// Exclude the allocation from lock-dependency tracking.
        #[cfg(feature = "lockdep")]
        const NOLOCKDEP = 0x800000;
    }
}

/// Number of defined flag bits.
pub const BITS_SHIFT: u32 = 23 + if cfg!(feature = "lockdep") { 1 } else { 0 };

/// Mask covering every defined flag bit.
pub const BITS_MASK: u32 = (1 << BITS_SHIFT) - 1;

/// Shift that turns the mobility bits into a migration bucket.
pub const MOVABLE_SHIFT: u32 = 3;

/// How hard a failing backing allocation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RetryPolicy {
    /// No explicit policy: small orders retry, costly orders fail.
    Default,
    /// Give up after the first failure.
    NoRetry,
    /// Retry a bounded number of times, then fail.
    RetryMayFail,
    /// Retry until success. Failure is not a representable outcome.
    NoFail,
}

impl AllocFlags {
    /// Zone-modifier bits.
    pub const ZONE_MASK: Self = Self::DMA
        .union(Self::HIGHMEM)
        .union(Self::DMA32)
        .union(Self::MOVABLE);
    /// Mobility bits.
    pub const MOVABLE_MASK: Self = Self::RECLAIMABLE.union(Self::MOVABLE);
    /// Both reclaim permissions.
    pub const RECLAIM: Self = Self::DIRECT_RECLAIM.union(Self::KSWAPD_RECLAIM);
    /// I/O and filesystem permissions.
    pub const IOFS: Self = Self::IO.union(Self::FS);
    /// Bits that influence reclaim and priority, forwarded on nested page requests.
    pub const RECLAIM_MASK: Self = Self::RECLAIM
        .union(Self::HIGH)
        .union(Self::IO)
        .union(Self::FS)
        .union(Self::NOWARN)
        .union(Self::RETRY_MAYFAIL)
        .union(Self::NOFAIL)
        .union(Self::NORETRY)
        .union(Self::MEMALLOC)
        .union(Self::NOMEMALLOC)
        .union(Self::ATOMIC);
    /// Placement constraints.
    pub const CONSTRAINT_MASK: Self = Self::HARDWALL.union(Self::THISNODE);
    /// Watermark / priority bits.
    pub const PRIORITY_MASK: Self = Self::HIGH
        .union(Self::ATOMIC)
        .union(Self::MEMALLOC)
        .union(Self::NOMEMALLOC);
    /// Every defined bit except those that may block or touch I/O during boot.
    pub const BOOT_MASK: Self =
        Self::from_bits_retain(BITS_MASK & !(Self::RECLAIM.bits() | Self::IOFS.bits()));

    /// Interrupt context: cannot sleep, high priority.
    pub const ATOMIC_CTX: Self = Self::HIGH.union(Self::ATOMIC).union(Self::KSWAPD_RECLAIM);
    /// Ordinary process context.
    pub const KERNEL: Self = Self::RECLAIM.union(Self::IO).union(Self::FS);
    /// Ordinary process context, accounted.
    pub const KERNEL_ACCOUNT: Self = Self::KERNEL.union(Self::ACCOUNT);
    /// Must not sleep.
    pub const NOWAIT: Self = Self::KSWAPD_RECLAIM;
    /// May reclaim but must not start I/O.
    pub const NOIO: Self = Self::RECLAIM;
    /// May reclaim and do I/O, but not re-enter the filesystem.
    pub const NOFS: Self = Self::RECLAIM.union(Self::IO);
    /// User-space backed allocations.
    pub const USER: Self = Self::RECLAIM
        .union(Self::IO)
        .union(Self::FS)
        .union(Self::HARDWALL);
    /// Constrained-low placement preset.
    pub const DMA_CTX: Self = Self::DMA;
    /// 32-bit placement preset.
    pub const DMA32_CTX: Self = Self::DMA32;
    /// User allocations preferring high memory.
    pub const HIGHUSER: Self = Self::USER.union(Self::HIGHMEM);
    /// Movable user allocations preferring high memory.
    pub const HIGHUSER_MOVABLE: Self = Self::HIGHUSER.union(Self::MOVABLE);
    /// Opportunistic huge allocations that must not reclaim.
    pub const TRANSHUGE_LIGHT: Self = Self::from_bits_retain(
        (Self::HIGHUSER_MOVABLE.bits()
            | Self::COMP.bits()
            | Self::NOMEMALLOC.bits()
            | Self::NOWARN.bits())
            & !Self::RECLAIM.bits(),
    );
    /// Huge allocations that may direct-reclaim.
    pub const TRANSHUGE: Self = Self::TRANSHUGE_LIGHT.union(Self::DIRECT_RECLAIM);

    /// Builds flags from raw bits, dropping anything outside the defined layout.
    #[must_use]
    pub const fn from_raw(bits: u32) -> Self {
        Self::from_bits_retain(bits & BITS_MASK)
    }

    /// Returns a copy restricted to the defined layout.
    #[must_use]
    pub const fn masked(self) -> Self {
        Self::from_raw(self.bits())
    }

    /// Raw zone-modifier pattern, `0..16`.
    #[must_use]
    pub const fn zone_bits(self) -> usize {
        (self.bits() & Self::ZONE_MASK.bits()) as usize
    }

    /// True iff the caller permits direct reclaim, and so may block.
    #[must_use]
    pub const fn allows_blocking(self) -> bool {
        self.contains(Self::DIRECT_RECLAIM)
    }

    /// True iff the caller may sleep *and* is a normal task context.
    ///
    /// Unrestricted reserve access marks allocations made on behalf of reclaim
    /// itself; those must not touch resources owned by the calling task.
    #[must_use]
    pub const fn owns_caller_context(self) -> bool {
        self.bits() & (Self::DIRECT_RECLAIM.bits() | Self::MEMALLOC.bits())
            == Self::DIRECT_RECLAIM.bits()
    }

    /// Retry policy; NOFAIL wins over RETRY_MAYFAIL, which wins over NORETRY.
    #[must_use]
    pub const fn retry_policy(self) -> RetryPolicy {
        if self.contains(Self::NOFAIL) {
            RetryPolicy::NoFail
        } else if self.contains(Self::RETRY_MAYFAIL) {
            RetryPolicy::RetryMayFail
        } else if self.contains(Self::NORETRY) {
            RetryPolicy::NoRetry
        } else {
            RetryPolicy::Default
        }
    }

    #[must_use]
    pub const fn wants_zero(self) -> bool {
        self.contains(Self::ZERO)
    }

    /// Compaction needs I/O permission.
    #[must_use]
    pub const fn compaction_allowed(self) -> bool {
        self.contains(Self::IO)
    }

    #[must_use]
    pub const fn is_this_node(self) -> bool {
        self.contains(Self::THISNODE)
    }

    /// Whether a failure should be reported.
    #[must_use]
    pub const fn warn_on_failure(self) -> bool {
        !self.contains(Self::NOWARN)
    }

    /// Flags for an allocation performed while already reclaiming: no I/O,
    /// no filesystem recursion, no failure noise.
    #[must_use]
    pub const fn for_nested_reclaim(self) -> Self {
        self.difference(Self::IOFS).union(Self::NOWARN)
    }

    #[must_use]
    pub const fn without_io(self) -> Self {
        self.difference(Self::IOFS)
    }

    #[must_use]
    pub const fn without_fs(self) -> Self {
        self.difference(Self::FS)
    }
}

/// Semantic group of a flag bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagGroup {
    Zone,
    Mobility,
    Watermark,
    Reclaim,
    Placement,
    Action,
    Debug,
}

/// One entry of the published flag layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlagDescriptor {
    pub name: &'static str,
    pub bits: u32,
    pub group: FlagGroup,
}

const fn descriptor(name: &'static str, flag: AllocFlags, group: FlagGroup) -> FlagDescriptor {
    FlagDescriptor {
        name,
        bits: flag.bits(),
        group,
    }
}

const BASE_LAYOUT: [FlagDescriptor; 23] = [
    descriptor("DMA", AllocFlags::DMA, FlagGroup::Zone),
    descriptor("HIGHMEM", AllocFlags::HIGHMEM, FlagGroup::Zone),
    descriptor("DMA32", AllocFlags::DMA32, FlagGroup::Zone),
    descriptor("MOVABLE", AllocFlags::MOVABLE, FlagGroup::Zone),
    descriptor("RECLAIMABLE", AllocFlags::RECLAIMABLE, FlagGroup::Mobility),
    descriptor("HIGH", AllocFlags::HIGH, FlagGroup::Watermark),
    descriptor("IO", AllocFlags::IO, FlagGroup::Reclaim),
    descriptor("FS", AllocFlags::FS, FlagGroup::Reclaim),
    descriptor("ZERO", AllocFlags::ZERO, FlagGroup::Action),
    descriptor("ATOMIC", AllocFlags::ATOMIC, FlagGroup::Watermark),
    descriptor("DIRECT_RECLAIM", AllocFlags::DIRECT_RECLAIM, FlagGroup::Reclaim),
    descriptor("KSWAPD_RECLAIM", AllocFlags::KSWAPD_RECLAIM, FlagGroup::Reclaim),
    descriptor("WRITE", AllocFlags::WRITE, FlagGroup::Placement),
    descriptor("NOWARN", AllocFlags::NOWARN, FlagGroup::Action),
    descriptor("RETRY_MAYFAIL", AllocFlags::RETRY_MAYFAIL, FlagGroup::Reclaim),
    descriptor("NOFAIL", AllocFlags::NOFAIL, FlagGroup::Reclaim),
    descriptor("NORETRY", AllocFlags::NORETRY, FlagGroup::Reclaim),
    descriptor("MEMALLOC", AllocFlags::MEMALLOC, FlagGroup::Watermark),
    descriptor("COMP", AllocFlags::COMP, FlagGroup::Action),
    descriptor("NOMEMALLOC", AllocFlags::NOMEMALLOC, FlagGroup::Watermark),
    descriptor("HARDWALL", AllocFlags::HARDWALL, FlagGroup::Placement),
    descriptor("THISNODE", AllocFlags::THISNODE, FlagGroup::Placement),
    descriptor("ACCOUNT", AllocFlags::ACCOUNT, FlagGroup::Action),
];

/// Published bit layout, lowest bit first.
#[must_use]
pub fn layout() -> Vec<FlagDescriptor> {
    #[allow(unused_mut)]
    let mut out = BASE_LAYOUT.to_vec();
    #[cfg(feature = "lockdep")]
    out.push(descriptor(
        "NOLOCKDEP",
        AllocFlags::NOLOCKDEP,
        FlagGroup::Debug,
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_bits_are_low_nibble() {
        assert_eq!(AllocFlags::ZONE_MASK.bits(), 0x0f);
        assert_eq!((AllocFlags::DMA | AllocFlags::FS).zone_bits(), 0x01);
        assert_eq!(AllocFlags::HIGHUSER_MOVABLE.zone_bits(), 0x0a);
    }

    #[test]
    fn layout_is_contiguous_and_ordered() {
        let layout = layout();
        assert_eq!(layout.len() as u32, BITS_SHIFT);
        for (i, entry) in layout.iter().enumerate() {
            assert_eq!(entry.bits, 1 << i, "{} at position {i}", entry.name);
        }
        let all = layout.iter().fold(0, |acc, d| acc | d.bits);
        assert_eq!(all, BITS_MASK);
        assert_eq!(AllocFlags::all().bits(), BITS_MASK);
    }

    #[test]
    fn from_raw_drops_undefined_bits() {
        let flags = AllocFlags::from_raw(0xff00_0000 | AllocFlags::IO.bits());
        assert_eq!(flags, AllocFlags::IO);
    }

    #[test]
    fn blocking_and_caller_context() {
        assert!(AllocFlags::KERNEL.allows_blocking());
        assert!(AllocFlags::KERNEL.owns_caller_context());
        assert!(!AllocFlags::ATOMIC_CTX.allows_blocking());
        assert!(!AllocFlags::ATOMIC_CTX.owns_caller_context());

        let reclaimer = AllocFlags::KERNEL | AllocFlags::MEMALLOC;
        assert!(reclaimer.allows_blocking());
        assert!(!reclaimer.owns_caller_context());
    }

    #[test]
    fn retry_policy_precedence() {
        assert_eq!(AllocFlags::KERNEL.retry_policy(), RetryPolicy::Default);
        assert_eq!(
            (AllocFlags::NORETRY | AllocFlags::RETRY_MAYFAIL).retry_policy(),
            RetryPolicy::RetryMayFail
        );
        assert_eq!(
            (AllocFlags::NORETRY | AllocFlags::NOFAIL).retry_policy(),
            RetryPolicy::NoFail
        );
        assert_eq!(AllocFlags::NORETRY.retry_policy(), RetryPolicy::NoRetry);
    }

    #[test]
    fn derived_flags_leave_original_untouched() {
        let original = AllocFlags::KERNEL;
        let nested = original.for_nested_reclaim();
        assert_eq!(original, AllocFlags::KERNEL);
        assert!(!nested.intersects(AllocFlags::IOFS));
        assert!(nested.contains(AllocFlags::NOWARN | AllocFlags::RECLAIM));
        assert_eq!(original.without_fs(), AllocFlags::NOFS);
        assert_eq!(original.without_io(), AllocFlags::NOIO);
    }

    #[test]
    fn presets_match_layout() {
        assert_eq!(AllocFlags::KERNEL.bits(), 0xcc0);
        assert_eq!(AllocFlags::ATOMIC_CTX.bits(), 0xa20);
        assert!(!AllocFlags::TRANSHUGE_LIGHT.intersects(AllocFlags::RECLAIM));
        assert!(AllocFlags::TRANSHUGE.contains(AllocFlags::DIRECT_RECLAIM));
        assert!(!AllocFlags::BOOT_MASK.intersects(AllocFlags::KERNEL));
    }
}
