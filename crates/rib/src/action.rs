use serde::{Deserialize, Serialize};

use crate::{
    RibError,
    routes::{DataChannelDefinition, PeerInfo, Protocol, valid_channel_name},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateAction {
    #[serde(rename = "add")]
    Add,
    #[serde(rename = "remove")]
    Remove,
}

/// One entry of a peer UPDATE: advertise or withdraw a single route.
///
/// `node_path` accompanies adds only; when a peer omits it the path
/// defaults to that peer alone (it is the origin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteUpdateItem {
    pub action: UpdateAction,
    pub route: DataChannelDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_path: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub updates: Vec<RouteUpdateItem>,
}

/// Every state transition enters the core as one of these variants.
///
/// The tags are the wire names used by all ingress surfaces (peer RPC,
/// CLI, tick driver); internal code matches on the variants exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    #[serde(rename = "local:peer:create")]
    LocalPeerCreate(PeerInfo),
    #[serde(rename = "local:peer:update")]
    LocalPeerUpdate(PeerInfo),
    #[serde(rename = "local:peer:delete")]
    LocalPeerDelete { name: String },
    #[serde(rename = "local:route:create")]
    LocalRouteCreate(DataChannelDefinition),
    #[serde(rename = "local:route:delete")]
    LocalRouteDelete { name: String, protocol: Protocol },
    #[serde(rename = "internal:protocol:open")]
    #[serde(rename_all = "camelCase")]
    InternalProtocolOpen { peer_info: PeerInfo },
    #[serde(rename = "internal:protocol:connected")]
    InternalProtocolConnected { name: String },
    #[serde(rename = "internal:protocol:update")]
    #[serde(rename_all = "camelCase")]
    InternalProtocolUpdate {
        peer_info: PeerInfo,
        update: RouteUpdate,
    },
    #[serde(rename = "internal:protocol:close")]
    #[serde(rename_all = "camelCase")]
    InternalProtocolClose {
        peer_info: PeerInfo,
        code: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "system:tick")]
    Tick { now: u64 },
}

impl Action {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalPeerCreate(_) => "local:peer:create",
            Self::LocalPeerUpdate(_) => "local:peer:update",
            Self::LocalPeerDelete { .. } => "local:peer:delete",
            Self::LocalRouteCreate(_) => "local:route:create",
            Self::LocalRouteDelete { .. } => "local:route:delete",
            Self::InternalProtocolOpen { .. } => "internal:protocol:open",
            Self::InternalProtocolConnected { .. } => "internal:protocol:connected",
            Self::InternalProtocolUpdate { .. } => "internal:protocol:update",
            Self::InternalProtocolClose { .. } => "internal:protocol:close",
            Self::Tick { .. } => "system:tick",
        }
    }

    /// Schema validation at ingress. Anything malformed fails here with
    /// `InvalidAction` before a transition is attempted.
    pub fn validate(&self) -> Result<(), RibError> {
        match self {
            Self::LocalPeerCreate(info) | Self::LocalPeerUpdate(info) => validate_peer(info),
            Self::LocalPeerDelete { name } => validate_node_name(name),
            Self::LocalRouteCreate(route) => {
                validate_route(route)?;
                if route.envoy_port.is_some() {
                    return Err(RibError::InvalidAction(
                        "envoyPort is assigned by commit, not by callers".to_string(),
                    ));
                }

                Ok(())
            }
            Self::LocalRouteDelete { name, .. } => {
                if !valid_channel_name(name) {
                    return Err(RibError::InvalidAction(format!(
                        "invalid route name: {name:?}"
                    )));
                }

                Ok(())
            }
            Self::InternalProtocolOpen { peer_info } => validate_peer(peer_info),
            Self::InternalProtocolConnected { name } => validate_node_name(name),
            Self::InternalProtocolUpdate { peer_info, update } => {
                validate_peer(peer_info)?;
                for item in &update.updates {
                    validate_route(&item.route)?;
                    if let Some(path) = &item.node_path {
                        if path.is_empty() {
                            return Err(RibError::InvalidAction(
                                "nodePath must not be empty".to_string(),
                            ));
                        }
                    }
                }

                Ok(())
            }
            Self::InternalProtocolClose { peer_info, .. } => validate_peer(peer_info),
            Self::Tick { .. } => Ok(()),
        }
    }
}

fn validate_node_name(name: &str) -> Result<(), RibError> {
    if name.is_empty() {
        return Err(RibError::InvalidAction(
            "peer name must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_peer(info: &PeerInfo) -> Result<(), RibError> {
    validate_node_name(&info.name)
}

fn validate_route(route: &DataChannelDefinition) -> Result<(), RibError> {
    if !valid_channel_name(&route.name) {
        return Err(RibError::InvalidAction(format!(
            "invalid route name: {:?}",
            route.name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str) -> DataChannelDefinition {
        DataChannelDefinition {
            name: name.to_string(),
            protocol: Protocol::Http,
            endpoint: None,
            region: None,
            tags: None,
            envoy_port: None,
        }
    }

    #[test]
    fn tags_round_trip_through_serde() {
        let action = Action::LocalRouteCreate(channel("books-api"));
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "local:route:create");
        assert_eq!(json["name"], "books-api");
        assert_eq!(json["protocol"], "http");

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn update_wire_shape() {
        let json = serde_json::json!({
            "type": "internal:protocol:update",
            "peerInfo": { "name": "node-b.example.local.io" },
            "update": {
                "updates": [
                    {
                        "action": "add",
                        "route": { "name": "svc-x", "protocol": "http:grpc" },
                        "nodePath": ["node-b.example.local.io"],
                    },
                ],
            },
        });

        let action: Action = serde_json::from_value(json).unwrap();
        match &action {
            Action::InternalProtocolUpdate { peer_info, update } => {
                assert_eq!(peer_info.name, "node-b.example.local.io");
                assert_eq!(update.updates.len(), 1);
                assert_eq!(update.updates[0].action, UpdateAction::Add);
                assert_eq!(update.updates[0].route.protocol, Protocol::HttpGrpc);
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn caller_provided_envoy_port_is_rejected() {
        let mut route = channel("books-api");
        route.envoy_port = Some(10000);

        let action = Action::LocalRouteCreate(route);
        assert!(matches!(
            action.validate(),
            Err(RibError::InvalidAction(_))
        ));
    }

    #[test]
    fn empty_node_path_is_rejected() {
        let action = Action::InternalProtocolUpdate {
            peer_info: PeerInfo {
                name: "node-b".to_string(),
                domains: Vec::new(),
                endpoint: None,
                labels: None,
                peer_token: None,
                envoy_address: None,
            },
            update: RouteUpdate {
                updates: vec![RouteUpdateItem {
                    action: UpdateAction::Add,
                    route: channel("svc-x"),
                    node_path: Some(Vec::new()),
                }],
            },
        };

        assert!(matches!(action.validate(), Err(RibError::InvalidAction(_))));
    }
}
