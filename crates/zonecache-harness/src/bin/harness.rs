//! CLI entrypoint for the zonecache harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use zonecache_core::events::global_log;
use zonecache_core::{RuntimeConfig, ZoneConfig};
use zonecache_harness::layout::resolve;
use zonecache_harness::{
    FlagLayoutReport, HarnessError, StressConfig, ZoneTableReport, parse_flags, run_stress,
};

/// Compatibility and stress tooling for zonecache.
#[derive(Debug, Parser)]
#[command(name = "zonecache-harness")]
#[command(about = "Compatibility and stress tooling for zonecache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the request flag layout as JSON.
    Flags,
    /// Print the decoded zone table as JSON.
    ZoneTable {
        /// Optional zones, e.g. `dma,dma32,highmem`. Defaults to the runtime config.
        #[arg(long)]
        zones: Option<String>,
    },
    /// Show how a flag word would be placed.
    Resolve {
        /// Flag word: names, presets or hex, joined by `|`.
        flags: String,
        /// Preferred node.
        #[arg(long, default_value_t = 0)]
        node: u16,
        /// Number of nodes in the simulated topology.
        #[arg(long, default_value_t = 1)]
        nodes: u16,
        /// Optional zones, e.g. `dma,dma32,highmem`.
        #[arg(long)]
        zones: Option<String>,
        /// Disable mobility grouping.
        #[arg(long)]
        no_grouping: bool,
    },
    /// Run multi-threaded cache traffic and report as JSON.
    Stress {
        /// JSON stress configuration; flags below override it.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        threads: Option<usize>,
        #[arg(long)]
        ops: Option<usize>,
        /// Root seed (decimal or 0x...).
        #[arg(long)]
        seed: Option<String>,
        /// Write the allocator event log as JSONL to this path.
        #[arg(long)]
        events: Option<PathBuf>,
    },
}

fn zone_config(zones: Option<String>) -> ZoneConfig {
    zones.map_or_else(
        || RuntimeConfig::from_env().zones,
        |list| ZoneConfig::from_list(&list),
    )
}

fn parse_seed(s: &str) -> Result<u64, HarnessError> {
    let cleaned = s.trim().replace('_', "");
    let parsed = match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => cleaned.parse(),
    };
    parsed.map_err(|_| HarnessError::InvalidConfig(format!("bad seed {s:?}")))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Flags => {
            println!("{}", serde_json::to_string_pretty(&FlagLayoutReport::current())?);
        }
        Command::ZoneTable { zones } => {
            let report = ZoneTableReport::for_config(zone_config(zones));
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Resolve {
            flags,
            node,
            nodes,
            zones,
            no_grouping,
        } => {
            let topology = zonecache_core::Topology::new(nodes, 1, zone_config(zones))?;
            let report = resolve(&topology, parse_flags(&flags)?, node, !no_grouping)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stress {
            config,
            threads,
            ops,
            seed,
            events,
        } => {
            let mut cfg = match config {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
                None => StressConfig::default(),
            };
            if let Some(threads) = threads {
                cfg.threads = threads;
            }
            if let Some(ops) = ops {
                cfg.ops_per_thread = ops;
            }
            if let Some(seed) = seed {
                cfg.seed = parse_seed(&seed)?;
            }
            eprintln!(
                "Stress: {} threads x {} ops, seed {:#x}",
                cfg.threads, cfg.ops_per_thread, cfg.seed
            );
            let report = run_stress(&cfg)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if let Some(path) = events {
                std::fs::write(&path, global_log().to_jsonl())?;
                eprintln!("Wrote event log to {}", path.display());
            }
            if !report.leak_free() {
                return Err(format!("{} pages outstanding after shrink", report.pages_outstanding).into());
            }
        }
    }

    Ok(())
}
