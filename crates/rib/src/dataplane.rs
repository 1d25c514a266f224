use std::collections::BTreeMap;

use ahash::AHashMap;
use serde::Serialize;
use url::Url;

use crate::{
    rib::EgressBinding,
    routes::{LocRibEntry, RouteKey},
    table::RouteTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerDirection {
    /// Accepts traffic destined for a locally-originated service.
    Ingress,
    /// Routes outbound traffic to a remote service via a peer.
    Egress,
}

/// One proxy listener, bound to a stamped port.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub route: RouteKey,
    pub direction: ListenerDirection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
}

/// One upstream a listener forwards to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    pub endpoint: String,
}

/// The language-neutral record handed to the dataplane sink. Binary
/// encoding for the proxy is the sink's concern.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataplaneSnapshot {
    /// Monotonic counter, bumped once per commit that changed routes.
    pub version: u64,
    pub listeners: Vec<Listener>,
    pub clusters: Vec<Cluster>,
}

/// Cluster names must be stable and filesystem/proxy friendly, so they
/// are derived from the upstream endpoint with punctuation folded away.
fn cluster_name(endpoint: &str) -> String {
    endpoint
        .trim_end_matches('/')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl DataplaneSnapshot {
    /// Package the stamped local routes and the selected egress best
    /// paths. Listeners come out in deterministic order: ingress first
    /// (table order), then egress sorted by route key; clusters are
    /// deduplicated by upstream endpoint and sorted by name.
    pub fn build(
        version: u64,
        table: &RouteTable,
        loc_rib: &AHashMap<RouteKey, LocRibEntry>,
        egress: &AHashMap<RouteKey, EgressBinding>,
    ) -> Self {
        let mut listeners = Vec::new();
        let mut clusters: BTreeMap<String, Cluster> = BTreeMap::new();

        for route in &table.local.routes {
            let Some(port) = route.envoy_port else {
                continue;
            };

            let cluster = route.endpoint.as_ref().map(|endpoint| {
                let endpoint = endpoint.to_string();
                let name = cluster_name(&endpoint);
                clusters.entry(name.clone()).or_insert(Cluster {
                    name: name.clone(),
                    endpoint,
                });
                name
            });

            listeners.push(Listener {
                name: format!("ingress_{}", route.name),
                port,
                route: route.key(),
                direction: ListenerDirection::Ingress,
                cluster,
            });
        }

        let mut bindings: Vec<(&RouteKey, &EgressBinding)> = egress.iter().collect();
        bindings.sort_by(|a, b| a.0.cmp(b.0));

        for (key, binding) in bindings {
            let upstream = loc_rib.get(key).and_then(|entry| {
                entry
                    .best_path
                    .peer
                    .envoy_address
                    .clone()
                    .or_else(|| entry.best_path.peer.endpoint.as_ref().map(Url::as_str).map(str::to_string))
            });

            let cluster = upstream.map(|endpoint| {
                let name = cluster_name(&endpoint);
                clusters.entry(name.clone()).or_insert(Cluster {
                    name: name.clone(),
                    endpoint,
                });
                name
            });

            listeners.push(Listener {
                name: format!("egress_{}_via_{}", key.name, binding.peer_name),
                port: binding.port,
                route: key.clone(),
                direction: ListenerDirection::Egress,
                cluster,
            });
        }

        Self {
            version,
            listeners,
            clusters: clusters.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_names_fold_punctuation() {
        assert_eq!(cluster_name("http://books:8080/"), "http___books_8080");
        assert_eq!(cluster_name("10.0.0.1:15001"), "10_0_0_1_15001");
    }
}
