mod commit;
mod plan;

pub use self::{
    commit::CommitResult,
    plan::{ClosedPeer, Plan, PlanOutcome, PortOp},
};

use ahash::AHashMap;

use crate::{
    ports::{PortAllocator, PortRange},
    routes::{LocRibEntry, PeerInfo, RouteKey},
    table::RouteTable,
};

/// Construction inputs for the routing core.
#[derive(Debug, Clone)]
pub struct RibOptions {
    /// This node's own identity; its name is what loop detection looks
    /// for in node paths.
    pub node: PeerInfo,
    pub port_ranges: Vec<PortRange>,
    pub default_hold_seconds: u64,
}

/// An egress port reserved for the current best path of one route key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressBinding {
    pub peer_name: String,
    pub port: u16,
}

/// The local route's allocator key.
pub fn ingress_key(route_name: &str) -> String {
    route_name.to_string()
}

/// The allocator key for a learned route reached via `peer_name`.
pub fn egress_key(route_name: &str, peer_name: &str) -> String {
    format!("egress_{route_name}_via_{peer_name}")
}

/// The Routing Information Base.
///
/// Owns the route table, the best-path decisions, the egress bindings
/// and the port allocator. Transitions are split in two phases:
/// [`Rib::plan`] is pure and only proposes, [`Rib::commit`] applies a
/// plan, touches the allocator, and derives the outbound messages and
/// the dataplane snapshot.
///
/// The RIB performs no I/O and takes no locks; callers must serialize
/// mutation (one writer at a time).
pub struct Rib {
    pub(crate) node: PeerInfo,
    pub(crate) default_hold: u64,
    pub(crate) table: RouteTable,
    pub(crate) loc_rib: AHashMap<RouteKey, LocRibEntry>,
    pub(crate) egress: AHashMap<RouteKey, EgressBinding>,
    pub(crate) allocator: PortAllocator,
    pub(crate) version: u64,
}

impl Rib {
    pub fn new(options: RibOptions) -> Self {
        Self {
            node: options.node,
            default_hold: options.default_hold_seconds,
            table: RouteTable::default(),
            loc_rib: AHashMap::new(),
            egress: AHashMap::new(),
            allocator: PortAllocator::new(options.port_ranges),
            version: 0,
        }
    }

    pub fn node(&self) -> &PeerInfo {
        &self.node
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Best-path decisions, one entry per route key present in state.
    pub fn loc_rib(&self) -> &AHashMap<RouteKey, LocRibEntry> {
        &self.loc_rib
    }

    pub fn egress_bindings(&self) -> &AHashMap<RouteKey, EgressBinding> {
        &self.egress
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    /// Current dataplane snapshot version.
    pub fn version(&self) -> u64 {
        self.version
    }
}
