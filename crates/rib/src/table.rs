use serde::Serialize;

use crate::routes::{DataChannelDefinition, InternalRoute, PeerRecord, RouteKey};

/// Services this node originates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocalTable {
    pub routes: Vec<DataChannelDefinition>,
}

/// Everything learned from the mesh: peer records and all known paths.
///
/// `routes` holds every path, not just the selected ones; best-path
/// selection runs over it on each transition. Insertion order is
/// significant, it is the tie-breaker for paths of equal length.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InternalTable {
    pub peers: Vec<PeerRecord>,
    pub routes: Vec<InternalRoute>,
}

/// The complete in-memory routing state.
///
/// A plain value type: transitions clone it, mutate the clone, and the
/// commit phase swaps the clone in. Nothing here performs I/O.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RouteTable {
    pub local: LocalTable,
    pub internal: InternalTable,
}

impl RouteTable {
    pub fn local_route(&self, key: &RouteKey) -> Option<&DataChannelDefinition> {
        self.local.routes.iter().find(|r| r.key() == *key)
    }

    /// Insert or replace a local route, keyed by `(name, protocol)`.
    ///
    /// Replacement happens in place so the table keeps its insertion
    /// order. Returns the previous definition when one existed.
    ///
    /// # Test
    ///
    /// ```
    /// use catalyst_rib::routes::{DataChannelDefinition, Protocol};
    /// use catalyst_rib::table::RouteTable;
    ///
    /// let route = DataChannelDefinition {
    ///     name: "books-api".to_string(),
    ///     protocol: Protocol::Http,
    ///     endpoint: None,
    ///     region: None,
    ///     tags: None,
    ///     envoy_port: None,
    /// };
    ///
    /// let mut table = RouteTable::default();
    /// assert!(table.upsert_local_route(route.clone()).is_none());
    /// assert!(table.upsert_local_route(route.clone()).is_some());
    /// assert_eq!(table.local.routes.len(), 1);
    /// ```
    pub fn upsert_local_route(
        &mut self,
        route: DataChannelDefinition,
    ) -> Option<DataChannelDefinition> {
        let key = route.key();
        if let Some(slot) = self.local.routes.iter_mut().find(|r| r.key() == key) {
            Some(std::mem::replace(slot, route))
        } else {
            self.local.routes.push(route);
            None
        }
    }

    pub fn remove_local_route(&mut self, key: &RouteKey) -> Option<DataChannelDefinition> {
        let index = self.local.routes.iter().position(|r| r.key() == *key)?;
        Some(self.local.routes.remove(index))
    }

    pub fn peer(&self, name: &str) -> Option<&PeerRecord> {
        self.internal.peers.iter().find(|p| p.info.name == name)
    }

    pub fn peer_mut(&mut self, name: &str) -> Option<&mut PeerRecord> {
        self.internal.peers.iter_mut().find(|p| p.info.name == name)
    }

    pub fn remove_peer(&mut self, name: &str) -> Option<PeerRecord> {
        let index = self
            .internal
            .peers
            .iter()
            .position(|p| p.info.name == name)?;
        Some(self.internal.peers.remove(index))
    }

    /// Connected peers in name order, the deterministic fan-out order.
    pub fn connected_peers(&self) -> Vec<&PeerRecord> {
        let mut peers: Vec<&PeerRecord> = self
            .internal
            .peers
            .iter()
            .filter(|p| p.is_connected())
            .collect();

        peers.sort_by(|a, b| a.info.name.cmp(&b.info.name));
        peers
    }

    /// Insert or replace a learned route, keyed by
    /// `(peer_name, name, protocol)`. In-place replacement keeps the
    /// first-received position for best-path tie-breaking.
    pub fn upsert_internal_route(&mut self, route: InternalRoute) -> Option<InternalRoute> {
        let key = route.key();
        if let Some(slot) = self
            .internal
            .routes
            .iter_mut()
            .find(|r| r.peer_name == route.peer_name && r.key() == key)
        {
            Some(std::mem::replace(slot, route))
        } else {
            self.internal.routes.push(route);
            None
        }
    }

    pub fn remove_internal_route(
        &mut self,
        peer_name: &str,
        key: &RouteKey,
    ) -> Option<InternalRoute> {
        let index = self
            .internal
            .routes
            .iter()
            .position(|r| r.peer_name == peer_name && r.key() == *key)?;
        Some(self.internal.routes.remove(index))
    }

    /// Drop every route learned from one peer, returning the withdrawn
    /// set in stored order.
    pub fn remove_peer_routes(&mut self, peer_name: &str) -> Vec<InternalRoute> {
        let mut withdrawn = Vec::new();
        self.internal.routes.retain(|r| {
            if r.peer_name == peer_name {
                withdrawn.push(r.clone());
                false
            } else {
                true
            }
        });

        withdrawn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{PeerInfo, Protocol};

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

    fn peer(name: &str) -> PeerInfo {
        PeerInfo {
            name: name.to_string(),
            domains: Vec::new(),
            endpoint: None,
            labels: None,
            peer_token: None,
            envoy_address: None,
        }
    }

    fn learned(peer_name: &str, name: &str, path: &[&str]) -> InternalRoute {
        InternalRoute {
            channel: channel(name),
            peer: peer(peer_name),
            peer_name: peer_name.to_string(),
            node_path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn upsert_internal_route_keeps_position() {
        let mut table = RouteTable::default();
        table.upsert_internal_route(learned("node-b", "svc-x", &["node-b"]));
        table.upsert_internal_route(learned("node-c", "svc-x", &["node-c"]));

        // Re-advertisement from node-b must not move it behind node-c.
        table.upsert_internal_route(learned("node-b", "svc-x", &["node-b", "hop"]));
        assert_eq!(table.internal.routes[0].peer_name, "node-b");
        assert_eq!(table.internal.routes[0].node_path, vec!["node-b", "hop"]);
        assert_eq!(table.internal.routes.len(), 2);
    }

    #[test]
    fn remove_peer_routes_returns_withdrawn_in_order() {
        let mut table = RouteTable::default();
        table.upsert_internal_route(learned("node-b", "svc-x", &["node-b"]));
        table.upsert_internal_route(learned("node-c", "svc-x", &["node-c"]));
        table.upsert_internal_route(learned("node-b", "svc-y", &["node-b"]));

        let withdrawn = table.remove_peer_routes("node-b");
        assert_eq!(withdrawn.len(), 2);
        assert_eq!(withdrawn[0].channel.name, "svc-x");
        assert_eq!(withdrawn[1].channel.name, "svc-y");
        assert_eq!(table.internal.routes.len(), 1);
    }

    #[test]
    fn connected_peers_sorted_by_name() {
        let mut table = RouteTable::default();
        for name in ["node-c", "node-a", "node-b"] {
            let mut record = PeerRecord::new(peer(name), 60, 0);
            record.connection_status = crate::routes::ConnectionStatus::Connected;
            table.internal.peers.push(record);
        }

        let names: Vec<&str> = table
            .connected_peers()
            .iter()
            .map(|p| p.info.name.as_str())
            .collect();
        assert_eq!(names, vec!["node-a", "node-b", "node-c"]);
    }
}
