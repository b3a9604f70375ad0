//! Zone-aware page requests and per-CPU object caches.
//!
//! A two-tier allocator: a page layer that turns a request's flag word into
//! a zone, a fallback search path, a mobility bucket and a priority class,
//! and an object layer of named slab caches fronted by per-CPU arrays.
//!
//! # Architecture
//!
//! - **Flags** (`flags`): the request flag word, masks and presets
//! - **Zones** (`zone`): zone set and the packed zone table
//! - **Topology** (`topology`): nodes, CPUs and fallback zonelists
//! - **Mobility** (`mobility`) and **priority** (`priority`)
//! - **Permitted mask** (`allowed`): boot-time and suspend restrictions
//! - **Page layer** (`backend`, `page_alloc`, `simulated`)
//! - **Object layer** (`geometry`, `reciprocal`, `array_cache`, `percpu`,
//!   `cache`, `registry`)
//! - **Size classes** (`size_class`, `kmalloc`)
//! - **Wiring** (`config`, `runtime`)
//! - **Observability** (`events`, `metrics`)

#![deny(unsafe_code)]

pub mod allowed;
pub mod array_cache;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod flags;
pub mod geometry;
pub mod kmalloc;
pub mod metrics;
pub mod mobility;
pub mod page_alloc;
pub mod percpu;
pub mod priority;
pub mod reciprocal;
pub mod registry;
pub mod runtime;
pub mod simulated;
pub mod size_class;
pub mod topology;
pub mod zone;

pub use allowed::AllowedMask;
pub use backend::{Page, PageBackend, PageRequest};
pub use cache::{CacheSpec, CacheStats, ObjectCache, SlotState};
pub use config::RuntimeConfig;
pub use error::{AllocError, BackendError, FailureCause};
pub use flags::{AllocFlags, RetryPolicy};
pub use geometry::ColourSpec;
pub use metrics::{AllocatorMetrics, MetricsSnapshot};
pub use mobility::{MigrateType, flags_to_migration_bucket};
pub use page_alloc::{PageAllocator, RetryConfig};
pub use priority::PriorityClass;
pub use registry::{CacheRegistry, LifecycleState};
pub use runtime::Runtime;
pub use simulated::{SimulatedBackend, SimulatedConfig};
pub use topology::{NodeId, Topology, ZoneRef, Zonelist, ZonelistKind};
pub use zone::{Zone, ZoneConfig, ZoneTable};
