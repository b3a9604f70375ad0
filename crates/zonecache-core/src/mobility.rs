//! Migration buckets.
//!
//! The two mobility bits select the free-list bucket a page is taken from, so
//! that compaction can keep movable and unmovable memory apart.

use crate::events::{self, EventFields, EventLevel};
use crate::flags::{AllocFlags, MOVABLE_SHIFT};
use crate::metrics::{AllocatorMetrics, global_metrics};
use serde::Serialize;

/// Mobility class of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MigrateType {
    Unmovable = 0,
    Movable = 1,
    Reclaimable = 2,
}

impl MigrateType {
    pub const ALL: [MigrateType; 3] = [Self::Unmovable, Self::Movable, Self::Reclaimable];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Bucket for `flags`. With mobility grouping disabled every request is
/// unmovable. Setting both mobility bits is reserved; it is reported and
/// treated as unmovable.
#[must_use]
pub fn flags_to_migration_bucket(flags: AllocFlags, grouping_enabled: bool) -> MigrateType {
    if !grouping_enabled {
        return MigrateType::Unmovable;
    }
    match (flags.bits() & AllocFlags::MOVABLE_MASK.bits()) >> MOVABLE_SHIFT {
        0 => MigrateType::Unmovable,
        1 => MigrateType::Movable,
        2 => MigrateType::Reclaimable,
        _ => {
            AllocatorMetrics::inc(&global_metrics().mixed_mobility_flags);
            events::emit(
                EventLevel::Warn,
                "mixed_mobility_flags",
                "unmovable",
                EventFields::default().details(format!("flags {:#x}", flags.bits())),
            );
            MigrateType::Unmovable
        }
    }
}
