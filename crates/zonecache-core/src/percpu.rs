//! Storage owned by an execution unit.
//!
//! `PerCpu<T>` holds one `T` per CPU index. A slot is only reachable through
//! an [`IrqGuard`], which models disabling interruption on that CPU: while a
//! guard is live, no other context can enter the same slot. The guard spins,
//! it never parks, and it is released on every exit path by `Drop`.
//!
//! Host threads are mapped to CPU indices either explicitly with
//! [`bind_current_thread`] or round-robin on first use.

#![allow(unsafe_code)]

use std::cell::{Cell, UnsafeCell};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Spins between yields while a slot is busy.
const SPINS_BEFORE_YIELD: u32 = 64;

#[repr(align(64))]
struct CpuSlot<T> {
    irq_off: AtomicBool,
    value: UnsafeCell<T>,
}

/// One value per CPU.
pub struct PerCpu<T> {
    slots: Box<[CpuSlot<T>]>,
}

// SAFETY: a slot's value is only accessed through an IrqGuard, and at most one
// guard per slot exists at a time (acquired by a successful swap of irq_off).
unsafe impl<T: Send> Sync for PerCpu<T> {}

impl<T> PerCpu<T> {
    /// One slot per CPU, initialised with `init(cpu)`.
    pub fn new(cpus: usize, mut init: impl FnMut(usize) -> T) -> Self {
        let slots = (0..cpus.max(1))
            .map(|cpu| CpuSlot {
                irq_off: AtomicBool::new(false),
                value: UnsafeCell::new(init(cpu)),
            })
            .collect();
        Self { slots }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Enter `cpu`'s slot, waiting for any other holder to leave.
    /// Indices wrap around the number of slots.
    pub fn disable_irq(&self, cpu: usize) -> IrqGuard<'_, T> {
        let cpu = cpu % self.slots.len();
        let slot = &self.slots[cpu];
        let mut spins = 0u32;
        while slot
            .irq_off
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        IrqGuard { slot, cpu }
    }

    /// Enter `cpu`'s slot only if nobody holds it.
    pub fn try_disable_irq(&self, cpu: usize) -> Option<IrqGuard<'_, T>> {
        let cpu = cpu % self.slots.len();
        let slot = &self.slots[cpu];
        slot.irq_off
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| IrqGuard { slot, cpu })
    }

    /// Enter the calling thread's slot.
    pub fn this_cpu(&self) -> IrqGuard<'_, T> {
        self.disable_irq(current_cpu())
    }

    /// Mutable access to every slot; exclusive borrow means no guard is live.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().map(|slot| slot.value.get_mut())
    }
}

/// Exclusive access to one CPU's slot.
pub struct IrqGuard<'a, T> {
    slot: &'a CpuSlot<T>,
    cpu: usize,
}

impl<T> IrqGuard<'_, T> {
    #[must_use]
    pub fn cpu(&self) -> usize {
        self.cpu
    }
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard holds irq_off for the slot.
        unsafe { &*self.slot.value.get() }
    }
}

impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this guard holds irq_off for the slot, and &mut self
        // prevents aliasing through the guard.
        unsafe { &mut *self.slot.value.get() }
    }
}

impl<T> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        self.slot.irq_off.store(false, Ordering::Release);
    }
}

static NEXT_CPU: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CURRENT_CPU: Cell<Option<usize>> = const { Cell::new(None) };
}

/// CPU index of the calling thread. Unbound threads are assigned one
/// round-robin on first call and keep it.
#[must_use]
pub fn current_cpu() -> usize {
    CURRENT_CPU.with(|cell| match cell.get() {
        Some(cpu) => cpu,
        None => {
            let cpu = NEXT_CPU.fetch_add(1, Ordering::Relaxed);
            cell.set(Some(cpu));
            cpu
        }
    })
}

/// Pin the calling thread to `cpu`.
pub fn bind_current_thread(cpu: usize) {
    CURRENT_CPU.with(|cell| cell.set(Some(cpu)));
}

/// Forget the calling thread's binding; the next call to [`current_cpu`]
/// assigns a fresh index.
pub fn unbind_current_thread() {
    CURRENT_CPU.with(|cell| cell.set(None));
}
