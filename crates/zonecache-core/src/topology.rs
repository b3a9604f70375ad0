//! Nodes, zonelists and the execution-unit map.
//!
//! Every node owns the configured zones and two immutable zonelists: one that
//! never leaves the node and one that falls back across nodes by distance.
//! Zonelists are shared `Arc` slices; a topology change would replace them
//! wholesale.

use crate::error::AllocError;
use crate::flags::AllocFlags;
use crate::zone::{Zone, ZoneConfig, ZoneTable};
use serde::Serialize;
use std::sync::Arc;

pub type NodeId = u16;

/// One `(node, zone)` candidate of a search path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ZoneRef {
    pub node: NodeId,
    pub zone: Zone,
}

/// Which of a node's two lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZonelistKind {
    Fallback,
    NoFallback,
}

/// Ordered search path. Iteration order is the fallback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zonelist {
    kind: ZonelistKind,
    refs: Arc<[ZoneRef]>,
}

impl Zonelist {
    fn new(kind: ZonelistKind, refs: Vec<ZoneRef>) -> Self {
        Self {
            kind,
            refs: refs.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ZonelistKind {
        self.kind
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ZoneRef] {
        &self.refs
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZoneRef> {
        self.refs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Candidates whose zone does not exceed `high_zone`, in search order.
    pub fn eligible(&self, high_zone: Zone) -> impl Iterator<Item = ZoneRef> + '_ {
        self.refs.iter().copied().filter(move |r| r.zone <= high_zone)
    }
}

/// A NUMA grouping of zones.
#[derive(Debug, Clone)]
pub struct Node {
    id: NodeId,
    zones: Vec<Zone>,
    fallback: Zonelist,
    local: Zonelist,
}

impl Node {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Zones owned by this node, highest first.
    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    #[must_use]
    pub fn zonelist(&self, kind: ZonelistKind) -> &Zonelist {
        match kind {
            ZonelistKind::Fallback => &self.fallback,
            ZonelistKind::NoFallback => &self.local,
        }
    }
}

/// Static machine description: nodes, zones and CPUs.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<Node>,
    cpus_per_node: usize,
    table: ZoneTable,
}

impl Topology {
    /// Uniform topology: `nodes` nodes with `cpus_per_node` CPUs each and the
    /// same configured zones on every node.
    pub fn new(nodes: u16, cpus_per_node: usize, zones: ZoneConfig) -> Result<Self, AllocError> {
        if nodes == 0 {
            return Err(AllocError::InvalidNode(0));
        }
        if cpus_per_node == 0 {
            return Err(AllocError::InvalidGeometry(
                "a node needs at least one cpu".into(),
            ));
        }
        let node_zones = zones.zones_highest_first();
        let built = (0..nodes)
            .map(|id| {
                let local: Vec<ZoneRef> = node_zones
                    .iter()
                    .map(|&zone| ZoneRef { node: id, zone })
                    .collect();
                let mut order: Vec<NodeId> = (0..nodes).collect();
                order.sort_by_key(|&other| (other.abs_diff(id), other));
                let fallback: Vec<ZoneRef> = order
                    .iter()
                    .flat_map(|&node| node_zones.iter().map(move |&zone| ZoneRef { node, zone }))
                    .collect();
                Node {
                    id,
                    zones: node_zones.clone(),
                    fallback: Zonelist::new(ZonelistKind::Fallback, fallback),
                    local: Zonelist::new(ZonelistKind::NoFallback, local),
                }
            })
            .collect();
        Ok(Self {
            nodes: built,
            cpus_per_node,
            table: ZoneTable::new(zones),
        })
    }

    /// One node with `cpus` CPUs.
    pub fn single_node(cpus: usize, zones: ZoneConfig) -> Result<Self, AllocError> {
        Self::new(1, cpus, zones)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn cpu_count(&self) -> usize {
        self.nodes.len() * self.cpus_per_node
    }

    #[must_use]
    pub fn cpus_per_node(&self) -> usize {
        self.cpus_per_node
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, AllocError> {
        self.nodes.get(id as usize).ok_or(AllocError::InvalidNode(id))
    }

    #[must_use]
    pub fn zone_table(&self) -> &ZoneTable {
        &self.table
    }

    #[must_use]
    pub fn zone_config(&self) -> ZoneConfig {
        self.table.config()
    }

    /// Home node of an execution unit. Out-of-range CPUs wrap.
    #[must_use]
    pub fn cpu_to_node(&self, cpu: usize) -> NodeId {
        ((cpu % self.cpu_count()) / self.cpus_per_node) as NodeId
    }

    /// CPUs whose home node is `node`.
    #[must_use]
    pub fn cpus_on_node(&self, node: NodeId) -> usize {
        if (node as usize) < self.nodes.len() {
            self.cpus_per_node
        } else {
            0
        }
    }

    /// Search path for a request: the node-local list when the caller asked
    /// for this node only, the full fallback list otherwise.
    pub fn select_fallback_list(
        &self,
        node: NodeId,
        flags: AllocFlags,
    ) -> Result<&Zonelist, AllocError> {
        let kind = if flags.is_this_node() {
            ZonelistKind::NoFallback
        } else {
            ZonelistKind::Fallback
        };
        Ok(self.node(node)?.zonelist(kind))
    }
}
