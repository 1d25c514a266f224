use ahash::AHashMap;

use super::{Rib, egress_key, ingress_key};

use crate::{
    RibError,
    action::{Action, RouteUpdateItem, UpdateAction},
    routes::{
        ConnectionStatus, DataChannelDefinition, InternalRoute, LocRibEntry, PeerInfo, PeerRecord,
        RouteKey, SelectionReason,
    },
    table::RouteTable,
};

/// One allocator operation a commit must perform. Releases are ordered
/// before allocates so a churning key can be handed its old port back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOp {
    Release(String),
    Allocate(String),
}

/// A peer whose session ended in this transition, with everything that
/// has to be withdrawn because of it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPeer {
    pub peer: PeerInfo,
    pub code: u32,
    pub reason: Option<String>,
    pub withdrawn: Vec<InternalRoute>,
    /// Whether the peer should still be told (it was connected when the
    /// closure happened).
    pub notify: bool,
}

/// The semantic effect of a transition, carrying exactly the facts the
/// commit phase needs to derive propagations.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// Peer management; nothing leaves this node.
    Quiet,
    /// A locally-originated route to advertise to every connected peer.
    LocalAdvertise(DataChannelDefinition),
    /// A locally-originated route to withdraw from every connected peer.
    LocalWithdraw(DataChannelDefinition),
    /// A freshly opened session that gets a reciprocal open plus a
    /// full-table sync.
    PeerSync(PeerInfo),
    PeerClosed(ClosedPeer),
    /// Update items from one peer that survived loop filtering and are
    /// eligible for re-advertisement.
    RelayUpdate {
        from: PeerInfo,
        updates: Vec<RouteUpdateItem>,
    },
    TickEffects {
        keepalive: Vec<PeerInfo>,
        expired: Vec<ClosedPeer>,
    },
}

/// The pure output of considering one action against current state.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Clock value the transition was planned at, epoch milliseconds.
    pub now: u64,
    /// Proposed table, ports not yet stamped.
    pub new_table: RouteTable,
    pub port_ops: Vec<PortOp>,
    pub route_metadata: AHashMap<RouteKey, LocRibEntry>,
    pub outcome: PlanOutcome,
    pub routes_changed: bool,
}

/// Close code used when a hold timer fires, the BGP NOTIFICATION value
/// for the same condition.
pub(crate) const HOLD_TIMER_EXPIRED: u32 = 4;

impl Rib {
    /// Consider `action` against current state and produce a [`Plan`].
    ///
    /// Pure: no allocator access, no I/O, no clock reads (`now` is an
    /// input). On failure nothing is proposed and the caller sees the
    /// typed error.
    pub fn plan(&self, action: &Action, now: u64) -> Result<Plan, RibError> {
        action.validate()?;

        // Tick is a pure function of the clock value it carries.
        let now = match action {
            Action::Tick { now } => *now,
            _ => now,
        };

        let mut table = self.table.clone();
        let outcome = self.transition(action, &mut table, now)?;
        let route_metadata = select_best(&table.internal.routes);
        let port_ops = self.derive_port_ops(action, &route_metadata);
        let routes_changed = self.routes_changed(&table, &route_metadata);

        Ok(Plan {
            now,
            new_table: table,
            port_ops,
            route_metadata,
            outcome,
            routes_changed,
        })
    }

    fn transition(
        &self,
        action: &Action,
        table: &mut RouteTable,
        now: u64,
    ) -> Result<PlanOutcome, RibError> {
        Ok(match action {
            Action::LocalPeerCreate(info) => {
                if table.peer(&info.name).is_some() {
                    return Err(RibError::DuplicatePeer(info.name.clone()));
                }

                table
                    .internal
                    .peers
                    .push(PeerRecord::new(info.clone(), self.default_hold, now));
                PlanOutcome::Quiet
            }
            Action::LocalPeerUpdate(info) => {
                let record = table
                    .peer_mut(&info.name)
                    .ok_or_else(|| RibError::UnknownPeer(info.name.clone()))?;

                // Identity is replaced wholesale; session state and
                // timers stay.
                record.info = info.clone();
                PlanOutcome::Quiet
            }
            Action::LocalPeerDelete { name } => {
                // Idempotent: a missing peer is a no-op.
                table.remove_peer(name);
                table.remove_peer_routes(name);
                PlanOutcome::Quiet
            }
            Action::LocalRouteCreate(route) => {
                let route = route.without_port();
                table.upsert_local_route(route.clone());
                PlanOutcome::LocalAdvertise(route)
            }
            Action::LocalRouteDelete { name, protocol } => {
                let key = RouteKey {
                    name: name.clone(),
                    protocol: *protocol,
                };

                let removed = table
                    .remove_local_route(&key)
                    .ok_or_else(|| RibError::NoSuchRoute(key.to_string()))?;
                PlanOutcome::LocalWithdraw(removed.without_port())
            }
            Action::InternalProtocolOpen { peer_info } => {
                // Idempotent: a re-open refreshes timers and identity
                // and re-sends the full-table sync.
                if table.peer(&peer_info.name).is_none() {
                    table
                        .internal
                        .peers
                        .push(PeerRecord::new(peer_info.clone(), self.default_hold, now));
                }

                if let Some(record) = table.peer_mut(&peer_info.name) {
                    record.info = peer_info.clone();
                    record.connection_status = ConnectionStatus::Connected;
                    record.last_connected = now;
                    record.last_received = now;
                }

                PlanOutcome::PeerSync(peer_info.clone())
            }
            Action::InternalProtocolConnected { name } => {
                let record = table
                    .peer_mut(name)
                    .ok_or_else(|| RibError::UnknownPeer(name.clone()))?;

                record.connection_status = ConnectionStatus::Connected;
                record.last_connected = now;
                record.last_received = now;
                PlanOutcome::Quiet
            }
            Action::InternalProtocolUpdate { peer_info, update } => {
                let record = table
                    .peer_mut(&peer_info.name)
                    .ok_or_else(|| RibError::UnknownPeer(peer_info.name.clone()))?;

                record.last_received = now;
                // Protocol traffic proves the session is up.
                if record.connection_status != ConnectionStatus::Connected {
                    record.connection_status = ConnectionStatus::Connected;
                    record.last_connected = now;
                }

                let mut survivors = Vec::new();
                for item in &update.updates {
                    match item.action {
                        UpdateAction::Add => {
                            let node_path = item
                                .node_path
                                .clone()
                                .unwrap_or_else(|| vec![peer_info.name.clone()]);

                            // Loop: this node already sits on the path.
                            if node_path.iter().any(|n| *n == self.node.name) {
                                continue;
                            }

                            table.upsert_internal_route(InternalRoute {
                                channel: item.route.without_port(),
                                peer: peer_info.clone(),
                                peer_name: peer_info.name.clone(),
                                node_path: node_path.clone(),
                            });

                            survivors.push(RouteUpdateItem {
                                action: UpdateAction::Add,
                                route: item.route.without_port(),
                                node_path: Some(node_path),
                            });
                        }
                        UpdateAction::Remove => {
                            if table
                                .remove_internal_route(&peer_info.name, &item.route.key())
                                .is_some()
                            {
                                survivors.push(RouteUpdateItem {
                                    action: UpdateAction::Remove,
                                    route: item.route.without_port(),
                                    node_path: None,
                                });
                            }
                        }
                    }
                }

                PlanOutcome::RelayUpdate {
                    from: peer_info.clone(),
                    updates: survivors,
                }
            }
            Action::InternalProtocolClose {
                peer_info,
                code,
                reason,
            } => {
                let mut notify = false;
                if let Some(record) = table.peer_mut(&peer_info.name) {
                    notify = record.is_connected();
                    record.connection_status = ConnectionStatus::Closed;
                }

                let withdrawn = table.remove_peer_routes(&peer_info.name);
                PlanOutcome::PeerClosed(ClosedPeer {
                    peer: peer_info.clone(),
                    code: *code,
                    reason: reason.clone(),
                    withdrawn,
                    notify,
                })
            }
            Action::Tick { now } => {
                let mut expired_infos = Vec::new();
                let mut keepalive = Vec::new();
                for record in table.internal.peers.iter_mut() {
                    if !record.is_connected() {
                        continue;
                    }

                    // Expiry is strict: silence of exactly holdTime is
                    // still alive.
                    if now.saturating_sub(record.last_received) > record.hold_time * 1000 {
                        record.connection_status = ConnectionStatus::Closed;
                        expired_infos.push(record.info.clone());
                    } else if now.saturating_sub(record.last_sent) > (record.hold_time / 3) * 1000 {
                        keepalive.push(record.info.clone());
                    }
                }

                let expired = expired_infos
                    .into_iter()
                    .map(|peer| ClosedPeer {
                        withdrawn: table.remove_peer_routes(&peer.name),
                        code: HOLD_TIMER_EXPIRED,
                        reason: Some("hold timer expired".to_string()),
                        notify: true,
                        peer,
                    })
                    .collect();

                PlanOutcome::TickEffects { keepalive, expired }
            }
        })
    }

    /// Releases for stale keys first, then allocates for new keys, each
    /// group sorted so identical action sequences yield identical
    /// allocator walks.
    fn derive_port_ops(
        &self,
        action: &Action,
        route_metadata: &AHashMap<RouteKey, LocRibEntry>,
    ) -> Vec<PortOp> {
        let mut releases = Vec::new();
        let mut allocates = Vec::new();

        match action {
            Action::LocalRouteCreate(route) => allocates.push(ingress_key(&route.name)),
            Action::LocalRouteDelete { name, .. } => releases.push(ingress_key(name)),
            _ => {}
        }

        // Egress diff: one port per route key, bound to the current
        // best-path peer. Re-selection releases the old key and
        // allocates the new one.
        for (key, binding) in &self.egress {
            let still_best = route_metadata
                .get(key)
                .map(|entry| entry.best_path.peer_name == binding.peer_name)
                .unwrap_or(false);

            if !still_best {
                releases.push(egress_key(&key.name, &binding.peer_name));
            }
        }

        for (key, entry) in route_metadata {
            let already_bound = self
                .egress
                .get(key)
                .map(|binding| binding.peer_name == entry.best_path.peer_name)
                .unwrap_or(false);

            if !already_bound {
                allocates.push(egress_key(&key.name, &entry.best_path.peer_name));
            }
        }

        releases.sort();
        allocates.sort();

        let mut ops: Vec<PortOp> = releases.into_iter().map(PortOp::Release).collect();
        ops.extend(allocates.into_iter().map(PortOp::Allocate));
        ops
    }

    fn routes_changed(
        &self,
        new_table: &RouteTable,
        route_metadata: &AHashMap<RouteKey, LocRibEntry>,
    ) -> bool {
        // Local routes compare with ports cleared: stamping is commit's
        // business and must not read as a route change by itself.
        let local_changed = self.table.local.routes.len() != new_table.local.routes.len()
            || self
                .table
                .local
                .routes
                .iter()
                .zip(new_table.local.routes.iter())
                .any(|(a, b)| a.without_port() != b.without_port());

        if local_changed || self.table.internal.routes != new_table.internal.routes {
            return true;
        }

        // Same paths but a different best-path binding still reprograms
        // the proxy.
        route_metadata.len() != self.egress.len()
            || route_metadata.iter().any(|(key, entry)| {
                self.egress
                    .get(key)
                    .map(|binding| binding.peer_name != entry.best_path.peer_name)
                    .unwrap_or(true)
            })
    }
}

/// Best-path selection over every candidate path in the table.
///
/// Candidates for one key are ranked by node-path length; equal lengths
/// keep their insertion order, so the first received wins.
pub(crate) fn select_best(routes: &[InternalRoute]) -> AHashMap<RouteKey, LocRibEntry> {
    let mut grouped: AHashMap<RouteKey, Vec<InternalRoute>> = AHashMap::new();
    for route in routes {
        grouped.entry(route.key()).or_default().push(route.clone());
    }

    grouped
        .into_iter()
        .map(|(key, mut candidates)| {
            let selection_reason = if candidates.len() == 1 {
                SelectionReason::OnlyCandidate
            } else {
                SelectionReason::ShortestNodePath
            };

            // Stable sort: ties stay in first-received order.
            candidates.sort_by_key(|r| r.node_path.len());
            let best_path = candidates.remove(0);

            (
                key,
                LocRibEntry {
                    best_path,
                    alternatives: candidates,
                    selection_reason,
                },
            )
        })
        .collect()
}
