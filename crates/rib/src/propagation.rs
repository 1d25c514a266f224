use serde::{Deserialize, Serialize};

use crate::{action::RouteUpdate, routes::PeerInfo};

/// One outbound protocol message to one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropagationBody {
    /// Reciprocal session open.
    Open,
    /// Session teardown with a protocol code.
    Close {
        code: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// No-op sent at one third of the hold time to keep the session up.
    Keepalive,
    /// Route advertisement and withdrawal batch.
    Update { update: RouteUpdate },
}

impl PropagationBody {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close { .. } => "close",
            Self::Keepalive => "keepalive",
            Self::Update { .. } => "update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Propagation {
    pub peer: PeerInfo,
    #[serde(flatten)]
    pub body: PropagationBody,
}

impl Propagation {
    pub fn new(peer: PeerInfo, body: PropagationBody) -> Self {
        Self { peer, body }
    }
}
