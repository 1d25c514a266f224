//! The Catalyst routing core.
//!
//! A node advertises the services it hosts, learns remote services from
//! its peers, and programs a local proxy so local callers can reach any
//! federated service through a local port. Peer exchange follows an
//! adaptation of iBGP: long-lived sessions, UPDATE messages carrying a
//! node-path analogue of AS-PATH, best-path selection, loop detection by
//! path inspection, and dead-peer detection via hold timers.
//!
//! This crate is the pure core of that node: the route table, the keyed
//! port allocator, the action schema, and the RIB with its two-phase
//! `plan`/`commit` transition. It performs no I/O, speaks no wire
//! protocol, and holds no locks; the surrounding runtime serializes
//! mutation and carries the results to the transport and the dataplane
//! sink.

pub mod action;
pub mod dataplane;
pub mod ports;
pub mod propagation;
pub mod rib;
pub mod routes;
pub mod table;

pub use self::{
    action::{Action, RouteUpdate, RouteUpdateItem, UpdateAction},
    dataplane::{Cluster, DataplaneSnapshot, Listener, ListenerDirection},
    ports::{PortAllocator, PortRange},
    propagation::{Propagation, PropagationBody},
    rib::{ClosedPeer, CommitResult, EgressBinding, Plan, PlanOutcome, PortOp, Rib, RibOptions},
    routes::{
        ConnectionStatus, DataChannelDefinition, InternalRoute, LocRibEntry, PeerInfo, PeerRecord,
        Protocol, RouteKey, SelectionReason,
    },
    table::RouteTable,
};

/// Typed failures the core can produce. `plan` errors leave state
/// untouched; `PortExhausted` is the one commit-phase error and aborts
/// the transition the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RibError {
    InvalidAction(String),
    UnknownPeer(String),
    DuplicatePeer(String),
    NoSuchRoute(String),
    PortExhausted,
}

impl std::error::Error for RibError {}

impl std::fmt::Display for RibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidAction(message) => write!(f, "invalid action: {message}"),
            Self::UnknownPeer(name) => write!(f, "unknown peer: {name}"),
            Self::DuplicatePeer(name) => write!(f, "peer already exists: {name}"),
            Self::NoSuchRoute(key) => write!(f, "no such route: {key}"),
            Self::PortExhausted => {
                write!(f, "no free port remains in the configured ranges")
            }
        }
    }
}
