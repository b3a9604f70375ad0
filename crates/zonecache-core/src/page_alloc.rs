//! Page-granular allocation on top of a [`PageBackend`].
//!
//! Resolves a request's flags into a placement (highest zone, search path,
//! migration bucket, priority class), then drives the backend under the
//! request's retry policy:
//!
//! - `NoRetry`, or blocking not allowed: a single attempt.
//! - `Default`: retries up to `max_retries` times for orders up to
//!   [`COSTLY_ORDER`], no retry above it.
//! - `RetryMayFail`: retries up to `max_retries` times at any order.
//! - `NoFail`: retries until it succeeds. When the caller may not block the
//!   loop yields instead of sleeping; this is an indefinite wait.
//!
//! Between attempts background reclaim is woken (when permitted) and, for
//! blocking callers, direct reclaim and compaction are invoked before a short
//! backoff.

use crate::allowed::AllowedMask;
use crate::backend::{MAX_ORDER, Page, PageBackend, PageRequest};
use crate::error::{AllocError, BackendError};
use crate::events::{self, EventFields, EventLevel};
use crate::flags::{AllocFlags, RetryPolicy};
use crate::metrics::{AllocatorMetrics, global_metrics};
use crate::mobility::{MigrateType, flags_to_migration_bucket};
use crate::priority::PriorityClass;
use crate::topology::{NodeId, Topology, Zonelist};
use crate::zone::Zone;
use std::sync::Arc;
use std::time::Duration;

/// Orders above this are not retried by default.
pub const COSTLY_ORDER: u32 = 3;

/// Retry tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt for bounded policies.
    pub max_retries: u32,
    /// Base sleep between attempts of a blocking caller.
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 16,
            backoff: Duration::from_micros(50),
        }
    }
}

/// Where a request may be placed.
#[derive(Debug, Clone, Copy)]
pub struct Placement<'a> {
    pub high_zone: Zone,
    pub zonelist: &'a Zonelist,
    pub migrate: MigrateType,
    pub priority: PriorityClass,
}

/// Front end of the page layer.
pub struct PageAllocator {
    topology: Arc<Topology>,
    backend: Arc<dyn PageBackend>,
    mask: Arc<AllowedMask>,
    retry: RetryConfig,
    grouping: bool,
}

impl PageAllocator {
    pub fn new(
        topology: Arc<Topology>,
        backend: Arc<dyn PageBackend>,
        mask: Arc<AllowedMask>,
        retry: RetryConfig,
        grouping: bool,
    ) -> Self {
        Self {
            topology,
            backend,
            mask,
            retry,
            grouping,
        }
    }

    #[must_use]
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn PageBackend> {
        &self.backend
    }

    #[must_use]
    pub fn allowed_mask(&self) -> &Arc<AllowedMask> {
        &self.mask
    }

    /// Highest zone for `flags`. Invalid zone modifiers are counted, logged
    /// and rejected.
    pub fn check_zone(&self, flags: AllocFlags) -> Result<Zone, AllocError> {
        self.topology
            .zone_table()
            .try_decode_zone(flags)
            .inspect_err(|_| {
                AllocatorMetrics::inc(&global_metrics().invalid_zone_flags);
                events::emit(
                    EventLevel::Error,
                    "invalid_zone_flags",
                    "rejected",
                    EventFields::default().details(format!("flags {:#x}", flags.bits())),
                );
            })
    }

    /// Placement for already-masked flags.
    pub fn resolve(&self, flags: AllocFlags, node: NodeId) -> Result<Placement<'_>, AllocError> {
        let high_zone = self.check_zone(flags)?;
        Ok(Placement {
            high_zone,
            zonelist: self.topology.select_fallback_list(node, flags)?,
            migrate: flags_to_migration_bucket(flags, self.grouping),
            priority: PriorityClass::of(flags),
        })
    }

    /// Allocate a block of `1 << order` pages near `preferred_node`.
    pub fn allocate_pages(
        &self,
        flags: AllocFlags,
        order: u32,
        preferred_node: NodeId,
    ) -> Result<Page, AllocError> {
        let flags = self.mask.apply(flags);
        self.allocate_masked(flags, order, preferred_node)
    }

    /// Allocation with flags that have already been through the mask.
    pub(crate) fn allocate_masked(
        &self,
        flags: AllocFlags,
        order: u32,
        preferred_node: NodeId,
    ) -> Result<Page, AllocError> {
        if order > MAX_ORDER {
            return Err(AllocError::InvalidOrder {
                order,
                max: MAX_ORDER,
            });
        }
        let placement = self.resolve(flags, preferred_node)?;
        let req = PageRequest {
            flags,
            order,
            high_zone: placement.high_zone,
            zonelist: placement.zonelist,
            migrate: placement.migrate,
            preferred_node,
        };
        let policy = flags.retry_policy();
        if policy == RetryPolicy::NoFail && order > 1 && flags.warn_on_failure() {
            events::emit(
                EventLevel::Warn,
                "nofail_high_order",
                "allowed",
                EventFields::default().order(order),
            );
        }

        let metrics = global_metrics();
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let result = if placement.priority.uses_reserves()
                && !self.backend.reserve_gate_allows(flags)
            {
                AllocatorMetrics::inc(&metrics.reserve_denials);
                Err(BackendError::ReserveDenied)
            } else {
                self.backend.alloc_pages(&req)
            };
            match result {
                Ok(page) => {
                    AllocatorMetrics::inc(&metrics.page_allocs);
                    if attempts > 1 {
                        events::emit(
                            EventLevel::Debug,
                            "page_alloc",
                            "recovered",
                            EventFields::default()
                                .addr(page.addr())
                                .order(order)
                                .details(format!("after {attempts} attempts")),
                        );
                    }
                    return Ok(page);
                }
                Err(err) => {
                    if !self.should_retry(policy, flags, order, attempts) {
                        AllocatorMetrics::inc(&metrics.page_failures);
                        let level = if flags.warn_on_failure() {
                            EventLevel::Warn
                        } else {
                            EventLevel::Debug
                        };
                        events::emit(
                            level,
                            "page_alloc",
                            "failed",
                            EventFields::default()
                                .order(order)
                                .details(format!("{err} after {attempts} attempts, flags {:#x}", flags.bits())),
                        );
                        return Err(AllocError::BackingAllocationFailure {
                            order,
                            attempts,
                            cause: err.into(),
                        });
                    }
                    AllocatorMetrics::inc(&metrics.page_retries);
                    self.between_attempts(&req, attempts);
                }
            }
        }
    }

    fn should_retry(&self, policy: RetryPolicy, flags: AllocFlags, order: u32, attempts: u32) -> bool {
        let bounded = attempts <= self.retry.max_retries;
        match policy {
            RetryPolicy::NoFail => true,
            _ if !flags.allows_blocking() => false,
            RetryPolicy::NoRetry => false,
            RetryPolicy::Default => order <= COSTLY_ORDER && bounded,
            RetryPolicy::RetryMayFail => bounded,
        }
    }

    fn between_attempts(&self, req: &PageRequest<'_>, attempts: u32) {
        if req.flags.contains(AllocFlags::KSWAPD_RECLAIM) {
            self.backend.wake_background_reclaim(req);
        }
        if !req.flags.allows_blocking() {
            if attempts == 1 && req.flags.warn_on_failure() {
                events::emit(
                    EventLevel::Warn,
                    "nofail_nonblocking",
                    "spinning",
                    EventFields::default().order(req.order),
                );
            }
            std::thread::yield_now();
            return;
        }
        let reclaimed = self.backend.direct_reclaim(req);
        if reclaimed == 0 && req.order > 0 && self.backend.allows_compaction(req.flags) {
            self.backend.compact(req);
        }
        let backoff = self.retry.backoff.saturating_mul(attempts.min(8));
        if !backoff.is_zero() {
            std::thread::sleep(backoff);
        }
    }

    /// Return a block to the backend. `order` must be the order the block
    /// was allocated at.
    pub fn free_pages(&self, page: Page, order: u32) -> Result<(), AllocError> {
        if order > MAX_ORDER {
            return Err(AllocError::InvalidOrder {
                order,
                max: MAX_ORDER,
            });
        }
        if order != page.order {
            events::emit(
                EventLevel::Error,
                "page_free",
                "rejected",
                EventFields::default()
                    .addr(page.addr())
                    .order(order)
                    .details(format!("allocated at order {}", page.order)),
            );
            return Err(AllocError::OrderMismatch {
                order,
                allocated: page.order,
            });
        }
        self.backend.free_pages(page, order);
        AllocatorMetrics::inc(&global_metrics().page_frees);
        Ok(())
    }
}
