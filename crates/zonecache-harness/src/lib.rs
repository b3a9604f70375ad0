//! Compatibility and stress tooling for zonecache.
//!
//! This crate provides:
//! - Layout dumps: the request flag word and the decoded zone table as JSON,
//!   for tooling that must agree with the allocator bit for bit
//! - Request resolution: zone, fallback path, bucket and priority for a flag word
//! - Stress runs: multi-threaded cache traffic over the simulated backend,
//!   reported as JSON with the allocator's event log as JSONL

#![forbid(unsafe_code)]

pub mod layout;
pub mod stress;

use thiserror::Error;

pub use layout::{FlagLayoutReport, ResolveReport, ZoneTableReport, parse_flags};
pub use stress::{StressConfig, StressReport, run_stress};

/// Errors surfaced by the harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unknown flag name {0:?}")]
    UnknownFlag(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("allocator error: {0}")]
    Alloc(#[from] zonecache_core::AllocError),
    #[error("stress invariant violated: {0}")]
    Invariant(String),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
