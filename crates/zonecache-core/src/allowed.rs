//! Permitted-flags mask.
//!
//! Every entry point intersects the caller's flags with this mask. It starts
//! out without reclaim or I/O permission (nothing can block during early
//! initialization), is widened once when the system is up, and is narrowed
//! around suspend windows. `restrict` returns the prior value and `restore`
//! reinstates it, so nested narrow/restore pairs compose like a stack.

use crate::events::{self, EventFields, EventLevel};
use crate::flags::AllocFlags;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub struct AllowedMask {
    bits: AtomicU32,
    widened: AtomicBool,
}

impl AllowedMask {
    /// Boot-time mask: no reclaim, no I/O, no filesystem.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(AllocFlags::BOOT_MASK.bits()),
            widened: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn current(&self) -> AllocFlags {
        AllocFlags::from_bits_retain(self.bits.load(Ordering::Acquire))
    }

    /// `flags` restricted to what is currently permitted.
    #[must_use]
    pub fn apply(&self, flags: AllocFlags) -> AllocFlags {
        flags.masked() & self.current()
    }

    #[must_use]
    pub fn is_widened(&self) -> bool {
        self.widened.load(Ordering::Acquire)
    }

    /// Open the mask to every defined bit. Only the first call has an
    /// effect; returns the mask in force before the call.
    pub fn widen(&self) -> AllocFlags {
        if self.widened.swap(true, Ordering::AcqRel) {
            return self.current();
        }
        let prior = self.bits.swap(AllocFlags::all().bits(), Ordering::AcqRel);
        events::emit(
            EventLevel::Info,
            "allowed_mask",
            "widened",
            EventFields::default().details(format!("{prior:#x} -> {:#x}", AllocFlags::all().bits())),
        );
        AllocFlags::from_bits_retain(prior)
    }

    /// Drop I/O and filesystem permission. Returns the prior mask.
    pub fn restrict(&self) -> AllocFlags {
        let prior = self
            .bits
            .fetch_and(!AllocFlags::IOFS.bits(), Ordering::AcqRel);
        events::emit(
            EventLevel::Debug,
            "allowed_mask",
            "restricted",
            EventFields::default().details(format!("prior {prior:#x}")),
        );
        AllocFlags::from_bits_retain(prior)
    }

    /// Reinstate a mask previously returned by `restrict` or `widen`.
    pub fn restore(&self, prior: AllocFlags) {
        self.bits.store(prior.masked().bits(), Ordering::Release);
        events::emit(
            EventLevel::Debug,
            "allowed_mask",
            "restored",
            EventFields::default().details(format!("{:#x}", prior.bits())),
        );
    }

    /// Restrict for the lifetime of the returned guard.
    #[must_use]
    pub fn suspend(&self) -> SuspendGuard<'_> {
        SuspendGuard {
            mask: self,
            prior: self.restrict(),
        }
    }
}

impl Default for AllowedMask {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the mask in force before [`AllowedMask::suspend`] on drop.
pub struct SuspendGuard<'a> {
    mask: &'a AllowedMask,
    prior: AllocFlags,
}

impl SuspendGuard<'_> {
    #[must_use]
    pub fn prior(&self) -> AllocFlags {
        self.prior
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.mask.restore(self.prior);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_mask_forbids_blocking() {
        let mask = AllowedMask::new();
        let flags = mask.apply(AllocFlags::KERNEL | AllocFlags::ZERO);
        assert!(!flags.allows_blocking());
        assert!(!flags.intersects(AllocFlags::IOFS));
        assert!(flags.contains(AllocFlags::ZERO));
    }

    #[test]
    fn widen_only_once() {
        let mask = AllowedMask::new();
        assert_eq!(mask.widen(), AllocFlags::BOOT_MASK);
        assert_eq!(mask.current(), AllocFlags::all());
        let prior = mask.restrict();
        assert_eq!(mask.widen(), mask.current());
        assert!(!mask.current().contains(AllocFlags::IO));
        mask.restore(prior);
        assert_eq!(mask.current(), AllocFlags::all());
    }

    #[test]
    fn nested_restrict_restore() {
        let mask = AllowedMask::new();
        mask.widen();
        let outer = mask.restrict();
        let inner = mask.restrict();
        assert_eq!(outer, AllocFlags::all());
        assert_eq!(inner, AllocFlags::all() - AllocFlags::IOFS);
        mask.restore(inner);
        assert_eq!(mask.current(), AllocFlags::all() - AllocFlags::IOFS);
        mask.restore(outer);
        assert_eq!(mask.current(), AllocFlags::all());
    }

    #[test]
    fn suspend_guard_restores_on_drop() {
        let mask = AllowedMask::new();
        mask.widen();
        {
            let guard = mask.suspend();
            assert_eq!(guard.prior(), AllocFlags::all());
            assert_eq!(mask.apply(AllocFlags::KERNEL), AllocFlags::NOIO);
            let _inner = mask.suspend();
        }
        assert_eq!(mask.apply(AllocFlags::KERNEL), AllocFlags::KERNEL);
    }
}
