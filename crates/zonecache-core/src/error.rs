//! Error taxonomy.

use serde::Serialize;
use thiserror::Error;

/// Why a backing page could not be obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Every eligible zone was exhausted.
    Exhausted,
    /// The reserve gate refused the request's priority.
    ReserveDenied,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted => f.write_str("exhausted"),
            Self::ReserveDenied => f.write_str("reserve denied"),
        }
    }
}

/// Failure reported by a page backend for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no eligible zone has free pages")]
    Exhausted,
    #[error("request priority insufficient for the reserve gate")]
    ReserveDenied,
}

impl From<BackendError> for FailureCause {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Exhausted => Self::Exhausted,
            BackendError::ReserveDenied => Self::ReserveDenied,
        }
    }
}

/// Errors surfaced by page and object allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Zone-modifier bits form a disallowed set. A programming error.
    #[error("invalid zone modifier combination {bits:#x}")]
    InvalidFlagCombination { bits: u32 },

    /// The page backend could not satisfy the request under its retry policy.
    #[error("backing allocation of order {order} failed after {attempts} attempt(s): {cause}")]
    BackingAllocationFailure {
        order: u32,
        attempts: u32,
        cause: FailureCause,
    },

    /// The slot behind `addr` is not currently handed out.
    #[error("double free of {addr:#x} in cache {cache}")]
    DoubleFree { cache: String, addr: usize },

    /// `addr` is not an object boundary of any slab of this cache.
    #[error("address {addr:#x} does not belong to cache {cache}")]
    ForeignObject { cache: String, addr: usize },

    #[error("invalid cache geometry: {0}")]
    InvalidGeometry(String),

    #[error("cache {0} already exists")]
    DuplicateCache(String),

    #[error("no cache named {0}")]
    UnknownCache(String),

    /// Teardown refused while objects are still live.
    #[error("cache {cache} still has {active} live object(s)")]
    CacheBusy { cache: String, active: usize },

    #[error("node {0} does not exist")]
    InvalidNode(u16),

    #[error("order {order} exceeds maximum order {max}")]
    InvalidOrder { order: u32, max: u32 },

    /// A block was freed with an order other than the one it was allocated at.
    #[error("freeing order {order} block allocated at order {allocated}")]
    OrderMismatch { order: u32, allocated: u32 },

    #[error("no runtime installed")]
    NotInitialized,

    #[error("a runtime is already installed")]
    AlreadyInitialized,
}

impl AllocError {
    /// Recoverable failures the caller is expected to handle.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::BackingAllocationFailure { .. })
    }

    /// Structural violations that indicate a caller bug.
    #[must_use]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidFlagCombination { .. }
                | Self::DoubleFree { .. }
                | Self::ForeignObject { .. }
                | Self::OrderMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = AllocError::BackingAllocationFailure {
            order: 2,
            attempts: 3,
            cause: FailureCause::ReserveDenied,
        };
        assert_eq!(
            err.to_string(),
            "backing allocation of order 2 failed after 3 attempt(s): reserve denied"
        );
        let err = AllocError::DoubleFree {
            cache: "kmalloc-64".into(),
            addr: 0x1040,
        };
        assert_eq!(err.to_string(), "double free of 0x1040 in cache kmalloc-64");
    }

    #[test]
    fn classification() {
        assert!(
            AllocError::BackingAllocationFailure {
                order: 0,
                attempts: 1,
                cause: FailureCause::Exhausted
            }
            .is_recoverable()
        );
        assert!(AllocError::InvalidFlagCombination { bits: 3 }.is_contract_violation());
        assert!(
            AllocError::OrderMismatch {
                order: 1,
                allocated: 0
            }
            .is_contract_violation()
        );
        assert!(!AllocError::NotInitialized.is_contract_violation());
    }

    #[test]
    fn backend_error_maps_to_cause() {
        assert_eq!(
            FailureCause::from(BackendError::ReserveDenied),
            FailureCause::ReserveDenied
        );
        assert_eq!(FailureCause::from(BackendError::Exhausted), FailureCause::Exhausted);
    }
}
