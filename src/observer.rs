use std::sync::Arc;

use anyhow::Result;

use rib::{DataplaneSnapshot, Propagation};

use crate::{DataplaneSink, PeerTransport, config::Config};

/// The standalone binary's view of the outside world.
///
/// A deployed node hangs its session layer and its xDS snapshot cache
/// off these two traits; the standalone binary runs with this logging
/// observer instead, which makes a single node useful for dry runs and
/// for watching what a config would do to the mesh.
#[derive(Clone)]
pub struct Observer {
    #[allow(dead_code)]
    config: Arc<Config>,
}

impl Observer {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

impl PeerTransport for Observer {
    async fn send(&self, propagation: Propagation) -> Result<()> {
        log::info!(
            "propagate: peer={:?}, type={}",
            propagation.peer.name,
            propagation.body.kind()
        );

        Ok(())
    }
}

impl DataplaneSink for Observer {
    fn push(&self, snapshot: DataplaneSnapshot) -> Result<()> {
        for listener in &snapshot.listeners {
            log::info!(
                "listener: name={:?}, port={}, cluster={:?}",
                listener.name,
                listener.port,
                listener.cluster
            );
        }

        Ok(())
    }
}
