//! Shared fixtures for the zonecache benchmarks.

#![forbid(unsafe_code)]

use zonecache_core::{AllocError, Runtime, RuntimeConfig};

/// A booted simulated runtime with `nodes` nodes of `cpus_per_node` CPUs and
/// no retry backoff.
pub fn bench_runtime(nodes: u16, cpus_per_node: usize, kmalloc: bool) -> Result<Runtime, AllocError> {
    let (rt, _) = Runtime::simulated(RuntimeConfig {
        nodes,
        cpus_per_node,
        retry_backoff_us: 0,
        kmalloc,
        ..RuntimeConfig::default()
    })?;
    rt.mark_up();
    Ok(rt)
}
