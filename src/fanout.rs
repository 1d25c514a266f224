use std::{sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinSet};

use rib::{CommitResult, Propagation};

use crate::{
    DataplaneSink, PeerTransport,
    statistics::{Statistics, Stats},
};

/// Propagation fan-out worker.
///
/// Consumes commit results strictly in commit order. Within one commit,
/// each peer's messages go out sequentially (a session must see open
/// before update) while distinct peers proceed in parallel; one peer's
/// failure or timeout never blocks another. Failures are logged and not
/// retried, the session lifecycle handles recovery.
pub(crate) async fn run<T, S>(
    mut receiver: mpsc::Receiver<CommitResult>,
    transport: Arc<T>,
    sink: S,
    statistics: Statistics,
    send_timeout: Duration,
) where
    T: PeerTransport,
    S: DataplaneSink,
{
    while let Some(commit) = receiver.recv().await {
        let CommitResult {
            propagations,
            snapshot,
            routes_changed,
        } = commit;

        let mut set = JoinSet::new();
        for (peer_name, batch) in group_by_peer(propagations) {
            let transport = transport.clone();
            let statistics = statistics.clone();
            set.spawn(async move {
                for propagation in batch {
                    let kind = propagation.body.kind();
                    match tokio::time::timeout(send_timeout, transport.send(propagation)).await {
                        Ok(Ok(())) => {
                            statistics.add(Some(&peer_name), Stats::PropagationSent);
                        }
                        Ok(Err(error)) => {
                            statistics.add(Some(&peer_name), Stats::PropagationFailed);
                            log::warn!(
                                "propagation failed: peer={peer_name:?}, type={kind}, error={error}"
                            );
                        }
                        Err(_) => {
                            statistics.add(Some(&peer_name), Stats::PropagationFailed);
                            log::warn!("propagation timed out: peer={peer_name:?}, type={kind}");
                        }
                    }
                }
            });
        }

        while set.join_next().await.is_some() {}

        // The RIB is already authoritative; a sink failure is
        // observable only in the logs.
        if routes_changed {
            log::info!(
                "dataplane snapshot: version={}, listeners={}, clusters={}",
                snapshot.version,
                snapshot.listeners.len(),
                snapshot.clusters.len()
            );

            if let Err(error) = sink.push(snapshot) {
                log::warn!("dataplane snapshot push failed: error={error}");
            }
        }
    }
}

/// Split one commit's propagations into per-peer batches, preserving
/// both the per-peer message order and the overall peer order.
fn group_by_peer(propagations: Vec<Propagation>) -> Vec<(String, Vec<Propagation>)> {
    let mut batches: Vec<(String, Vec<Propagation>)> = Vec::new();
    for propagation in propagations {
        match batches
            .iter_mut()
            .find(|(name, _)| *name == propagation.peer.name)
        {
            Some((_, batch)) => batch.push(propagation),
            None => batches.push((propagation.peer.name.clone(), vec![propagation])),
        }
    }

    batches
}
