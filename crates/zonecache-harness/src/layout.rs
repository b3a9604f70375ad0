//! Flag layout and zone table dumps, and single-request resolution.

use serde::Serialize;
use zonecache_core::flags::{BITS_MASK, BITS_SHIFT, FlagDescriptor, layout};
use zonecache_core::zone::ZoneTableEntry;
use zonecache_core::{
    AllocFlags, MigrateType, PriorityClass, RetryPolicy, Topology, Zone, ZoneConfig, ZoneTable,
    flags_to_migration_bucket,
};

use crate::HarnessError;

/// Named presets accepted by [`parse_flags`] in addition to single bits.
const PRESETS: &[(&str, AllocFlags)] = &[
    ("KERNEL", AllocFlags::KERNEL),
    ("KERNEL_ACCOUNT", AllocFlags::KERNEL_ACCOUNT),
    ("ATOMIC_CTX", AllocFlags::ATOMIC_CTX),
    ("NOWAIT", AllocFlags::NOWAIT),
    ("NOIO", AllocFlags::NOIO),
    ("NOFS", AllocFlags::NOFS),
    ("USER", AllocFlags::USER),
    ("HIGHUSER", AllocFlags::HIGHUSER),
    ("HIGHUSER_MOVABLE", AllocFlags::HIGHUSER_MOVABLE),
    ("TRANSHUGE_LIGHT", AllocFlags::TRANSHUGE_LIGHT),
    ("TRANSHUGE", AllocFlags::TRANSHUGE),
];

/// Parse `KERNEL|DMA`, `0x4c0`, or a mix. Separators are `|`, `,` and `+`;
/// names are case-insensitive. An empty string is the empty flag word.
pub fn parse_flags(s: &str) -> Result<AllocFlags, HarnessError> {
    let mut flags = AllocFlags::empty();
    for token in s
        .split(['|', ',', '+'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let upper = token.to_ascii_uppercase();
        if let Some(hex) = upper.strip_prefix("0X") {
            let bits = u32::from_str_radix(&hex.replace('_', ""), 16)
                .map_err(|_| HarnessError::UnknownFlag(token.to_owned()))?;
            flags |= AllocFlags::from_raw(bits);
            continue;
        }
        let named = PRESETS
            .iter()
            .find(|(name, _)| *name == upper)
            .map(|(_, f)| *f)
            .or_else(|| {
                layout()
                    .into_iter()
                    .find(|d| d.name == upper)
                    .map(|d| AllocFlags::from_raw(d.bits))
            })
            .ok_or_else(|| HarnessError::UnknownFlag(token.to_owned()))?;
        flags |= named;
    }
    Ok(flags)
}

/// The published request flag word.
#[derive(Debug, Clone, Serialize)]
pub struct FlagLayoutReport {
    pub bits_shift: u32,
    pub bits_mask: u32,
    pub boot_mask: u32,
    pub flags: Vec<FlagDescriptor>,
    pub presets: Vec<PresetEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresetEntry {
    pub name: &'static str,
    pub bits: u32,
}

impl FlagLayoutReport {
    #[must_use]
    pub fn current() -> Self {
        Self {
            bits_shift: BITS_SHIFT,
            bits_mask: BITS_MASK,
            boot_mask: AllocFlags::BOOT_MASK.bits(),
            flags: layout(),
            presets: PRESETS
                .iter()
                .map(|&(name, f)| PresetEntry {
                    name,
                    bits: f.bits(),
                })
                .collect(),
        }
    }
}

/// The decoded zone table for one zone configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneTableReport {
    pub config: ZoneConfig,
    pub packed: String,
    pub invalid_bitmap: String,
    pub entries: Vec<ZoneTableEntry>,
}

impl ZoneTableReport {
    #[must_use]
    pub fn for_config(config: ZoneConfig) -> Self {
        let table = ZoneTable::new(config);
        Self {
            config,
            packed: format!("{:#018x}", table.packed()),
            invalid_bitmap: format!("{:#06x}", table.invalid_bitmap()),
            entries: table.entries(),
        }
    }
}

/// How one flag word would be placed, without allocating.
#[derive(Debug, Clone, Serialize)]
pub struct ResolveReport {
    pub flags: String,
    pub zone: Option<Zone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub migrate: MigrateType,
    pub priority: PriorityClass,
    pub retry: RetryPolicy,
    pub may_block: bool,
    /// `node:zone` in search order, restricted to zones at or below the target.
    pub search_path: Vec<String>,
}

/// Resolve `flags` on `node` of `topology`.
pub fn resolve(
    topology: &Topology,
    flags: AllocFlags,
    node: u16,
    grouping: bool,
) -> Result<ResolveReport, HarnessError> {
    let flags = flags.masked();
    let decoded = topology.zone_table().try_decode_zone(flags);
    let list = topology.select_fallback_list(node, flags)?;
    let search_path = match &decoded {
        Ok(zone) => list
            .eligible(*zone)
            .map(|r| format!("{}:{}", r.node, r.zone.name()))
            .collect(),
        Err(_) => Vec::new(),
    };
    Ok(ResolveReport {
        flags: format!("{:#x}", flags.bits()),
        zone: decoded.as_ref().ok().copied(),
        error: decoded.err().map(|e| e.to_string()),
        migrate: flags_to_migration_bucket(flags, grouping),
        priority: PriorityClass::of(flags),
        retry: flags.retry_policy(),
        may_block: flags.allows_blocking(),
        search_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_presets_and_hex() {
        assert_eq!(parse_flags("KERNEL").unwrap(), AllocFlags::KERNEL);
        assert_eq!(
            parse_flags("kernel | dma").unwrap(),
            AllocFlags::KERNEL | AllocFlags::DMA
        );
        assert_eq!(parse_flags("0x3").unwrap(), AllocFlags::DMA | AllocFlags::HIGHMEM);
        assert_eq!(parse_flags("").unwrap(), AllocFlags::empty());
        assert!(matches!(
            parse_flags("KERNEL|BOGUS"),
            Err(HarnessError::UnknownFlag(t)) if t == "BOGUS"
        ));
    }

    #[test]
    fn layout_report_is_consistent() {
        let report = FlagLayoutReport::current();
        assert_eq!(report.flags.len() as u32, report.bits_shift);
        assert_eq!(report.boot_mask & AllocFlags::IOFS.bits(), 0);
    }

    #[test]
    fn resolve_reports_invalid_pairs() {
        let topo = Topology::single_node(1, ZoneConfig::default()).unwrap();
        let report = resolve(&topo, AllocFlags::DMA | AllocFlags::DMA32, 0, true).unwrap();
        assert_eq!(report.zone, None);
        assert!(report.error.is_some());
        assert!(report.search_path.is_empty());

        let report = resolve(&topo, AllocFlags::KERNEL, 0, true).unwrap();
        assert_eq!(report.zone, Some(Zone::Normal));
        assert_eq!(report.search_path, vec!["0:normal", "0:dma32", "0:dma"]);
    }
}
