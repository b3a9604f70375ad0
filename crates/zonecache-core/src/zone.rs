//! Placement zones and the packed zone-modifier table.
//!
//! The four zone-modifier bits of [`AllocFlags`] select a target zone through
//! a 16-entry lookup table packed into a single `u64` (three bits per entry),
//! plus a 16-bit bitmap marking the patterns that are not allowed. Both are
//! computed once from the set of configured zones; lookups are pure.

use crate::error::AllocError;
use crate::events::{self, EventFields, EventLevel};
use crate::flags::AllocFlags;
use crate::metrics::{AllocatorMetrics, global_metrics};
use serde::{Deserialize, Serialize};

/// A physical placement class. Declaration order is the address order; the
/// fallback order is the reverse.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Zone {
    Dma = 0,
    Dma32 = 1,
    Normal = 2,
    HighMem = 3,
    Movable = 4,
}

/// Number of zone kinds.
pub const ZONE_COUNT: usize = 5;

/// Bits per packed table entry.
pub const ZONES_SHIFT: u32 = 3;

const ZONE_PATTERNS: usize = 16;

const _: () = assert!(ZONES_SHIFT as usize * ZONE_PATTERNS <= 64);
const _: () = assert!(ZONE_COUNT <= 1 << ZONES_SHIFT);

impl Zone {
    /// All zones, lowest first.
    pub const ALL: [Zone; ZONE_COUNT] = [
        Zone::Dma,
        Zone::Dma32,
        Zone::Normal,
        Zone::HighMem,
        Zone::Movable,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Self::Dma),
            1 => Some(Self::Dma32),
            2 => Some(Self::Normal),
            3 => Some(Self::HighMem),
            4 => Some(Self::Movable),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dma => "dma",
            Self::Dma32 => "dma32",
            Self::Normal => "normal",
            Self::HighMem => "highmem",
            Self::Movable => "movable",
        }
    }

    /// Parse a zone name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dma" => Some(Self::Dma),
            "dma32" => Some(Self::Dma32),
            "normal" => Some(Self::Normal),
            "highmem" | "high" => Some(Self::HighMem),
            "movable" => Some(Self::Movable),
            _ => None,
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Which optional zones exist. `Normal` and `Movable` always exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoneConfig {
    pub dma: bool,
    pub dma32: bool,
    pub highmem: bool,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            dma: true,
            dma32: true,
            highmem: false,
        }
    }
}

impl ZoneConfig {
    /// Only the mandatory zones.
    #[must_use]
    pub const fn minimal() -> Self {
        Self {
            dma: false,
            dma32: false,
            highmem: false,
        }
    }

    /// Every zone configured.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            dma: true,
            dma32: true,
            highmem: true,
        }
    }

    /// Parse a comma-separated list of optional zones, e.g. `dma,dma32`.
    /// Mandatory or unknown names are ignored.
    #[must_use]
    pub fn from_list(list: &str) -> Self {
        let mut cfg = Self::minimal();
        for zone in list.split(',').filter_map(Zone::from_name) {
            match zone {
                Zone::Dma => cfg.dma = true,
                Zone::Dma32 => cfg.dma32 = true,
                Zone::HighMem => cfg.highmem = true,
                Zone::Normal | Zone::Movable => {}
            }
        }
        cfg
    }

    #[must_use]
    pub const fn has(&self, zone: Zone) -> bool {
        match zone {
            Zone::Dma => self.dma,
            Zone::Dma32 => self.dma32,
            Zone::HighMem => self.highmem,
            Zone::Normal | Zone::Movable => true,
        }
    }

    /// Configured zones in fallback order (highest first).
    #[must_use]
    pub fn zones_highest_first(&self) -> Vec<Zone> {
        Zone::ALL
            .iter()
            .rev()
            .copied()
            .filter(|z| self.has(*z))
            .collect()
    }

    /// `zone` if configured, otherwise `Normal`.
    const fn or_normal(&self, zone: Zone) -> Zone {
        if self.has(zone) { zone } else { Zone::Normal }
    }
}

/// One row of the decoded table, as published to tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneTableEntry {
    pub bits: u32,
    /// `None` for an invalid pattern.
    pub zone: Option<Zone>,
}

/// Packed zone lookup built once from a [`ZoneConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneTable {
    config: ZoneConfig,
    packed: u64,
    invalid: u16,
}

const DMA: usize = AllocFlags::DMA.bits() as usize;
const HIGHMEM: usize = AllocFlags::HIGHMEM.bits() as usize;
const DMA32: usize = AllocFlags::DMA32.bits() as usize;
const MOVABLE: usize = AllocFlags::MOVABLE.bits() as usize;

impl ZoneTable {
    #[must_use]
    pub const fn new(config: ZoneConfig) -> Self {
        let mut packed = 0u64;
        let mut invalid = 0u16;
        let mut bits = 0;
        while bits < ZONE_PATTERNS {
            match Self::resolve(&config, bits) {
                Some(zone) => packed |= (zone as u64) << (bits as u32 * ZONES_SHIFT),
                None => invalid |= 1 << bits,
            }
            bits += 1;
        }
        Self {
            config,
            packed,
            invalid,
        }
    }

    /// Zone selected by a raw modifier pattern, or `None` if the pattern sets
    /// more than one of DMA, HIGHMEM and DMA32.
    const fn resolve(config: &ZoneConfig, bits: usize) -> Option<Zone> {
        let placement = bits & (DMA | HIGHMEM | DMA32);
        let movable = bits & MOVABLE != 0;
        match placement {
            0 => Some(Zone::Normal),
            DMA => Some(config.or_normal(Zone::Dma)),
            DMA32 => Some(config.or_normal(Zone::Dma32)),
            HIGHMEM if movable => Some(Zone::Movable),
            HIGHMEM => Some(config.or_normal(Zone::HighMem)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> ZoneConfig {
        self.config
    }

    /// The raw packed table.
    #[must_use]
    pub const fn packed(&self) -> u64 {
        self.packed
    }

    /// Bit `n` is set iff pattern `n` is invalid.
    #[must_use]
    pub const fn invalid_bitmap(&self) -> u16 {
        self.invalid
    }

    #[must_use]
    pub const fn is_valid(&self, flags: AllocFlags) -> bool {
        self.invalid & (1 << flags.zone_bits()) == 0
    }

    /// Decode the target zone, rejecting invalid modifier combinations.
    pub fn try_decode_zone(&self, flags: AllocFlags) -> Result<Zone, AllocError> {
        let bits = flags.zone_bits();
        if self.invalid & (1 << bits) != 0 {
            return Err(AllocError::InvalidFlagCombination { bits: bits as u32 });
        }
        let idx = (self.packed >> (bits as u32 * ZONES_SHIFT)) & ((1 << ZONES_SHIFT) - 1);
        match Zone::from_index(idx as u8) {
            Some(zone) => Ok(zone),
            None => Err(AllocError::InvalidFlagCombination { bits: bits as u32 }),
        }
    }

    /// Decode the target zone for flags already known to be valid.
    ///
    /// Allocation entry points go through [`Self::try_decode_zone`] (via
    /// `PageAllocator::check_zone`) and reject invalid combinations. This
    /// form is for callers that hold validated flags: an invalid
    /// combination here is a caller bug, so debug builds panic and release
    /// builds record the violation and fall back to `Zone::Normal`.
    #[must_use]
    pub fn decode_zone(&self, flags: AllocFlags) -> Zone {
        match self.try_decode_zone(flags) {
            Ok(zone) => zone,
            Err(_) => {
                let bits = flags.zone_bits();
                AllocatorMetrics::inc(&global_metrics().invalid_zone_flags);
                events::emit(
                    EventLevel::Error,
                    "invalid_zone_flags",
                    "fallback_normal",
                    EventFields::default().details(format!("zone bits {bits:#x}")),
                );
                if cfg!(debug_assertions) {
                    panic!("invalid zone modifier combination {bits:#x}");
                }
                Zone::Normal
            }
        }
    }

    /// All 16 patterns with their decoded zone.
    #[must_use]
    pub fn entries(&self) -> Vec<ZoneTableEntry> {
        (0..ZONE_PATTERNS as u32)
            .map(|bits| ZoneTableEntry {
                bits,
                zone: self.try_decode_zone(AllocFlags::from_raw(bits)).ok(),
            })
            .collect()
    }
}

impl Default for ZoneTable {
    fn default() -> Self {
        Self::new(ZoneConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(bits: u32) -> AllocFlags {
        AllocFlags::from_raw(bits)
    }

    #[test]
    fn invalid_bitmap_has_eight_patterns() {
        for cfg in [ZoneConfig::minimal(), ZoneConfig::default(), ZoneConfig::full()] {
            let table = ZoneTable::new(cfg);
            let inv = table.invalid_bitmap();
            assert_eq!(inv.count_ones(), 8);
            for bits in [0x3, 0x5, 0x6, 0x7, 0xb, 0xd, 0xe, 0xf] {
                assert!(inv & (1 << bits) != 0, "pattern {bits:#x} must be invalid");
            }
        }
    }

    #[test]
    fn full_config_table() {
        let table = ZoneTable::new(ZoneConfig::full());
        assert_eq!(table.decode_zone(f(0)), Zone::Normal);
        assert_eq!(table.decode_zone(AllocFlags::DMA), Zone::Dma);
        assert_eq!(table.decode_zone(AllocFlags::HIGHMEM), Zone::HighMem);
        assert_eq!(table.decode_zone(AllocFlags::DMA32), Zone::Dma32);
        assert_eq!(table.decode_zone(AllocFlags::MOVABLE), Zone::Normal);
        assert_eq!(
            table.decode_zone(AllocFlags::MOVABLE | AllocFlags::DMA),
            Zone::Dma
        );
        assert_eq!(
            table.decode_zone(AllocFlags::MOVABLE | AllocFlags::HIGHMEM),
            Zone::Movable
        );
        assert_eq!(
            table.decode_zone(AllocFlags::MOVABLE | AllocFlags::DMA32),
            Zone::Dma32
        );
    }

    #[test]
    fn missing_optional_zones_collapse_to_normal() {
        let table = ZoneTable::new(ZoneConfig::minimal());
        assert_eq!(table.decode_zone(AllocFlags::DMA), Zone::Normal);
        assert_eq!(table.decode_zone(AllocFlags::DMA32), Zone::Normal);
        assert_eq!(table.decode_zone(AllocFlags::HIGHMEM), Zone::Normal);
        assert_eq!(
            table.decode_zone(AllocFlags::HIGHUSER_MOVABLE),
            Zone::Movable
        );
    }

    #[test]
    fn unrelated_bits_do_not_affect_decoding() {
        let table = ZoneTable::new(ZoneConfig::full());
        assert_eq!(
            table.decode_zone(AllocFlags::KERNEL | AllocFlags::DMA32),
            Zone::Dma32
        );
    }

    #[test]
    fn try_decode_rejects_multiple_placements() {
        let table = ZoneTable::default();
        let err = table
            .try_decode_zone(AllocFlags::DMA | AllocFlags::HIGHMEM)
            .unwrap_err();
        assert_eq!(err, AllocError::InvalidFlagCombination { bits: 0x3 });
        assert!(!table.is_valid(AllocFlags::DMA32 | AllocFlags::HIGHMEM));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "invalid zone modifier combination")]
    fn decode_zone_panics_on_invalid_in_debug() {
        let _ = ZoneTable::default().decode_zone(AllocFlags::DMA | AllocFlags::HIGHMEM);
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn decode_zone_falls_back_to_normal_in_release() {
        assert_eq!(
            ZoneTable::default().decode_zone(AllocFlags::DMA | AllocFlags::HIGHMEM),
            Zone::Normal
        );
    }

    #[test]
    fn entries_cover_all_patterns() {
        let entries = ZoneTable::new(ZoneConfig::full()).entries();
        assert_eq!(entries.len(), 16);
        assert_eq!(entries.iter().filter(|e| e.zone.is_none()).count(), 8);
        assert_eq!(entries[0xa].zone, Some(Zone::Movable));
    }

    #[test]
    fn zone_list_parsing() {
        let cfg = ZoneConfig::from_list("dma, HIGHMEM,bogus,normal");
        assert!(cfg.dma && cfg.highmem && !cfg.dma32);
        assert_eq!(
            cfg.zones_highest_first(),
            vec![Zone::Movable, Zone::HighMem, Zone::Normal, Zone::Dma]
        );
    }

    #[test]
    fn zone_order() {
        assert!(Zone::Dma < Zone::Dma32);
        assert!(Zone::HighMem < Zone::Movable);
        for z in Zone::ALL {
            assert_eq!(Zone::from_index(z as u8), Some(z));
            assert_eq!(Zone::from_name(z.name()), Some(z));
        }
    }
}
