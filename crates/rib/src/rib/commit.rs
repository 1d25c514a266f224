use ahash::AHashMap;

use super::{ClosedPeer, EgressBinding, Plan, PlanOutcome, PortOp, Rib, egress_key, ingress_key};

use crate::{
    RibError,
    action::{RouteUpdate, RouteUpdateItem, UpdateAction},
    dataplane::DataplaneSnapshot,
    propagation::{Propagation, PropagationBody},
    routes::{DataChannelDefinition, PeerInfo, RouteKey},
};

/// What a successful commit produced: the messages to fan out and the
/// snapshot for the dataplane sink.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub propagations: Vec<Propagation>,
    pub snapshot: DataplaneSnapshot,
    pub routes_changed: bool,
}

impl Rib {
    /// Apply a [`Plan`]: run the allocator operations, stamp ports,
    /// install the proposed table, and derive propagations plus the
    /// dataplane snapshot.
    ///
    /// Allocator operations run against a staged copy which is swapped
    /// in only after every allocation succeeded, so a `PortExhausted`
    /// aborts the whole transition with all state untouched.
    pub fn commit(&mut self, plan: Plan) -> Result<CommitResult, RibError> {
        let Plan {
            now,
            mut new_table,
            port_ops,
            mut route_metadata,
            outcome,
            routes_changed,
        } = plan;

        // 1. Port operations, releases first.
        let mut staged = self.allocator.clone();
        for op in &port_ops {
            match op {
                PortOp::Release(key) => {
                    staged.release(key);
                }
                PortOp::Allocate(key) => {
                    staged.allocate(key).map_err(|_| RibError::PortExhausted)?;
                }
            }
        }

        // 2. Stamp ingress ports onto local routes and egress ports
        // onto selected best paths. Alternatives stay unstamped.
        for route in new_table.local.routes.iter_mut() {
            route.envoy_port = staged.port_for(&ingress_key(&route.name));
        }

        let mut egress: AHashMap<RouteKey, EgressBinding> = AHashMap::new();
        for (key, entry) in route_metadata.iter_mut() {
            let peer_name = entry.best_path.peer_name.clone();
            if let Some(port) = staged.port_for(&egress_key(&key.name, &peer_name)) {
                entry.best_path.channel.envoy_port = Some(port);
                egress.insert(key.clone(), EgressBinding { peer_name, port });
            }
        }

        // 3. Install.
        self.allocator = staged;
        self.table = new_table;
        self.loc_rib = route_metadata;
        self.egress = egress;
        if routes_changed {
            self.version += 1;
        }

        // 4. Outbound messages, derived from the installed state.
        let propagations = self.build_propagations(&outcome);

        // 5. Dataplane snapshot.
        let snapshot =
            DataplaneSnapshot::build(self.version, &self.table, &self.loc_rib, &self.egress);

        // 6. Every peer that gets a message counts as contacted now.
        for propagation in &propagations {
            if let Some(record) = self.table.peer_mut(&propagation.peer.name) {
                record.last_sent = now;
            }
        }

        Ok(CommitResult {
            propagations,
            snapshot,
            routes_changed,
        })
    }

    fn build_propagations(&self, outcome: &PlanOutcome) -> Vec<Propagation> {
        let mut propagations = Vec::new();
        let peers: Vec<PeerInfo> = self
            .table
            .connected_peers()
            .into_iter()
            .map(|record| record.info.clone())
            .collect();

        match outcome {
            PlanOutcome::Quiet => {}
            PlanOutcome::LocalAdvertise(route) => {
                for q in &peers {
                    propagations.push(self.update_to(
                        q.clone(),
                        vec![self.add_item(route.clone(), vec![self.node.name.clone()])],
                    ));
                }
            }
            PlanOutcome::LocalWithdraw(route) => {
                for q in &peers {
                    propagations.push(self.update_to(q.clone(), vec![remove_item(route.clone())]));
                }
            }
            PlanOutcome::PeerSync(peer) => {
                propagations.push(Propagation::new(peer.clone(), PropagationBody::Open));

                // Full current table: every local route plus every
                // learned path not from or through the new peer.
                let mut updates = Vec::new();
                for route in &self.table.local.routes {
                    updates.push(
                        self.add_item(route.without_port(), vec![self.node.name.clone()]),
                    );
                }

                for learned in &self.table.internal.routes {
                    if learned.peer_name == peer.name {
                        continue;
                    }

                    let path = self.extended_path(&learned.node_path);
                    if path.iter().any(|n| *n == peer.name) {
                        continue;
                    }

                    updates.push(self.add_item(learned.channel.without_port(), path));
                }

                propagations.push(self.update_to(peer.clone(), updates));
            }
            PlanOutcome::PeerClosed(closed) => {
                self.push_closure(closed, &peers, &mut propagations);
            }
            PlanOutcome::RelayUpdate { from, updates } => {
                for q in peers.iter().filter(|q| q.name != from.name) {
                    let mut items = Vec::new();
                    for item in updates {
                        match item.action {
                            UpdateAction::Add => {
                                let incoming = item.node_path.clone().unwrap_or_default();
                                let path = self.extended_path(&incoming);

                                // Never advertise back to a node already
                                // on the path.
                                if path.iter().any(|n| *n == q.name) {
                                    continue;
                                }

                                items.push(self.add_item(item.route.clone(), path));
                            }
                            UpdateAction::Remove => {
                                self.withdraw_or_readvertise(q, &item.route, &mut items);
                            }
                        }
                    }

                    if !items.is_empty() {
                        propagations.push(self.update_to(q.clone(), items));
                    }
                }
            }
            PlanOutcome::TickEffects { keepalive, expired } => {
                let mut keepalive = keepalive.clone();
                keepalive.sort_by(|a, b| a.name.cmp(&b.name));
                for peer in keepalive {
                    propagations.push(Propagation::new(peer, PropagationBody::Keepalive));
                }

                let mut expired: Vec<_> = expired.iter().collect();
                expired.sort_by(|a, b| a.peer.name.cmp(&b.peer.name));
                for closed in expired {
                    self.push_closure(closed, &peers, &mut propagations);
                }
            }
        }

        propagations
    }

    /// Teardown notification to the closed peer plus withdrawals (or
    /// best-path re-advertisements) to everyone else.
    fn push_closure(
        &self,
        closed: &ClosedPeer,
        peers: &[PeerInfo],
        propagations: &mut Vec<Propagation>,
    ) {
        if closed.notify {
            propagations.push(Propagation::new(
                closed.peer.clone(),
                PropagationBody::Close {
                    code: closed.code,
                    reason: closed.reason.clone(),
                },
            ));
        }

        for q in peers.iter().filter(|q| q.name != closed.peer.name) {
            let mut items = Vec::new();
            for withdrawn in &closed.withdrawn {
                self.withdraw_or_readvertise(q, &withdrawn.channel, &mut items);
            }

            if !items.is_empty() {
                propagations.push(self.update_to(q.clone(), items));
            }
        }
    }

    /// A withdrawn path either yields a withdrawal to `q`, or, when
    /// another candidate took over as best, a re-advertisement of the
    /// new best path. If `q` itself sits on the new path it gets the
    /// withdrawal (our previous advertisement no longer stands).
    fn withdraw_or_readvertise(
        &self,
        q: &PeerInfo,
        route: &DataChannelDefinition,
        items: &mut Vec<RouteUpdateItem>,
    ) {
        match self.loc_rib.get(&route.key()) {
            Some(entry) => {
                let path = self.extended_path(&entry.best_path.node_path);
                if path.iter().any(|n| *n == q.name) {
                    items.push(remove_item(route.without_port()));
                } else {
                    items.push(self.add_item(entry.best_path.channel.without_port(), path));
                }
            }
            None => items.push(remove_item(route.without_port())),
        }
    }

    fn update_to(&self, peer: PeerInfo, updates: Vec<RouteUpdateItem>) -> Propagation {
        Propagation::new(
            peer,
            PropagationBody::Update {
                update: RouteUpdate { updates },
            },
        )
    }

    fn add_item(&self, route: DataChannelDefinition, node_path: Vec<String>) -> RouteUpdateItem {
        RouteUpdateItem {
            action: UpdateAction::Add,
            route: route.without_port(),
            node_path: Some(node_path),
        }
    }

    /// Re-advertisement prepends this node to the stored path.
    fn extended_path(&self, node_path: &[String]) -> Vec<String> {
        let mut path = Vec::with_capacity(node_path.len() + 1);
        path.push(self.node.name.clone());
        path.extend(node_path.iter().cloned());
        path
    }
}

fn remove_item(route: DataChannelDefinition) -> RouteUpdateItem {
    RouteUpdateItem {
        action: UpdateAction::Remove,
        route: route.without_port(),
        node_path: None,
    }
}
