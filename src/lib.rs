pub mod config;
pub mod fanout;
pub mod observer;
pub mod queue;
pub mod statistics;
pub mod tick;

use std::{future::Future, sync::Arc, time::Duration};

use rib::{Action, DataplaneSnapshot, Propagation, Rib, RibOptions};

use self::{
    config::Config,
    observer::Observer,
    queue::{ActionQueue, QueueOptions},
    statistics::Statistics,
    tick::TickDriver,
};

/// Session layer handle: ships one propagation to the peer named inside
/// it. Implementations own their framing, retries and thread safety;
/// the fan-out only awaits the result and logs failures.
pub trait PeerTransport: Send + Sync + 'static {
    fn send(&self, propagation: Propagation) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Receiver of routing snapshots, normally an xDS snapshot cache in
/// front of the local proxy. Pushes are synchronous and must be quick.
pub trait DataplaneSink: Send + Sync + 'static {
    fn push(&self, snapshot: DataplaneSnapshot) -> anyhow::Result<()>;
}

/// Time source, injected so tests can drive sessions through hold-timer
/// expiry without waiting for it.
pub trait Clock: Send + Sync + 'static {
    /// Epoch milliseconds.
    fn now(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// In order to let the integration test directly use the catalyst crate
/// and start the node, a function is opened to replace the main
/// function to directly start the node.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let rib = Rib::new(RibOptions {
        node: config.node.peer_info(),
        port_ranges: config.runtime.port_ranges.clone(),
        default_hold_seconds: config.runtime.default_hold_seconds,
    });

    let observer = Observer::new(config.clone());
    let queue = ActionQueue::spawn(QueueOptions {
        rib,
        transport: observer.clone(),
        sink: observer,
        clock: SystemClock,
        statistics: Statistics::default(),
        send_timeout: Duration::from_secs(config.runtime.send_timeout),
    });

    // Seed the mesh neighbours the config already knows about; their
    // sessions open later, through the protocol.
    for peer in &config.peers {
        if let Err(error) = queue.dispatch(Action::LocalPeerCreate(peer.clone())).await {
            log::warn!("seed peer rejected: name={:?}, error={}", peer.name, error);
        }
    }

    let ticker = TickDriver::spawn(
        queue.clone(),
        SystemClock,
        Duration::from_millis(config.runtime.tick_interval_ms),
    );

    log::info!("catalyst node started: name={:?}", config.node.name);

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    ticker.stop().await;
    Ok(())
}
