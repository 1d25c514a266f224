use std::{collections::HashMap, str::FromStr};

use serde::{Deserialize, Serialize};
use url::Url;

/// Application protocols a data channel can speak.
///
/// The colon forms are sub-protocols of http and are carried verbatim on
/// the wire, so the serde names keep the colon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "http:graphql")]
    HttpGraphql,
    #[serde(rename = "http:gql")]
    HttpGql,
    #[serde(rename = "http:grpc")]
    HttpGrpc,
    #[serde(rename = "tcp")]
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::HttpGraphql => "http:graphql",
            Self::HttpGql => "http:gql",
            Self::HttpGrpc => "http:grpc",
            Self::Tcp => "tcp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "http" => Self::Http,
            "http:graphql" => Self::HttpGraphql,
            "http:gql" => Self::HttpGql,
            "http:grpc" => Self::HttpGrpc,
            "tcp" => Self::Tcp,
            _ => return Err(format!("unknown protocol: {value}")),
        })
    }
}

/// Check a channel name against the DNS-compatible form: 1-253 characters,
/// alphanumeric at both ends, with dots, underscores and dashes allowed in
/// between. The check is case-insensitive.
///
/// # Test
///
/// ```
/// use catalyst_rib::routes::valid_channel_name;
///
/// assert!(valid_channel_name("books-api"));
/// assert!(valid_channel_name("a"));
/// assert!(valid_channel_name("svc.v2_beta"));
/// assert!(!valid_channel_name(""));
/// assert!(!valid_channel_name("-books"));
/// assert!(!valid_channel_name("books-"));
/// assert!(!valid_channel_name("bad name"));
/// ```
pub fn valid_channel_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 253 {
        return false;
    }

    let alnum = |b: u8| b.is_ascii_alphanumeric();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    bytes
        .iter()
        .all(|&b| alnum(b) || b == b'.' || b == b'_' || b == b'-')
}

/// The `(name, protocol)` pair uniquely identifying a service across the
/// federation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    pub name: String,
    pub protocol: Protocol,
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.protocol)
    }
}

/// The unit of advertisement: a service hosted somewhere in the mesh.
///
/// `envoy_port` is assigned by commit when the route is installed, it is
/// never provided by callers and never advertised to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataChannelDefinition {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envoy_port: Option<u16>,
}

impl DataChannelDefinition {
    pub fn key(&self) -> RouteKey {
        RouteKey {
            name: self.name.clone(),
            protocol: self.protocol,
        }
    }

    /// Copy with the proxy port cleared, the form used for comparisons and
    /// for everything that leaves this node.
    pub fn without_port(&self) -> Self {
        Self {
            envoy_port: None,
            ..self.clone()
        }
    }
}

/// Peer identity. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Fully qualified, globally unique node name.
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envoy_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Initializing,
    Connected,
    Closed,
}

/// A peer's identity plus session lifecycle state.
///
/// Exactly one record exists per peer name at any time. The record
/// survives a close so a later open can reuse it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    #[serde(flatten)]
    pub info: PeerInfo,
    pub connection_status: ConnectionStatus,
    /// Epoch milliseconds of the last message received from this peer.
    pub last_received: u64,
    /// Epoch milliseconds of the last propagation sent to this peer.
    pub last_sent: u64,
    /// Seconds this peer may stay silent before the session is dead.
    pub hold_time: u64,
    pub last_connected: u64,
}

impl PeerRecord {
    pub fn new(info: PeerInfo, hold_time: u64, now: u64) -> Self {
        Self {
            info,
            connection_status: ConnectionStatus::Initializing,
            last_received: now,
            last_sent: now,
            hold_time,
            last_connected: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}

/// A route learned from a peer, with the full path it traversed.
///
/// `node_path[0]` is the immediate upstream; the origin sits at the end.
/// Every re-advertisement prepends the advertising node, so a path that
/// contains the local node name is a loop and must never be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalRoute {
    pub channel: DataChannelDefinition,
    pub peer: PeerInfo,
    pub peer_name: String,
    pub node_path: Vec<String>,
}

impl InternalRoute {
    pub fn key(&self) -> RouteKey {
        self.channel.key()
    }

    /// The node this route was learned from directly.
    pub fn upstream(&self) -> Option<&str> {
        self.node_path.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionReason {
    #[serde(rename = "only candidate")]
    OnlyCandidate,
    #[serde(rename = "shortest nodePath")]
    ShortestNodePath,
}

impl std::fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OnlyCandidate => write!(f, "only candidate"),
            Self::ShortestNodePath => write!(f, "shortest nodePath"),
        }
    }
}

/// The best-path decision for one route key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocRibEntry {
    pub best_path: InternalRoute,
    /// Remaining candidates, shortest node path first.
    pub alternatives: Vec<InternalRoute>,
    pub selection_reason: SelectionReason,
}
