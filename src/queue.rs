use std::{sync::Arc, time::Duration};

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

use rib::{Action, CommitResult, Rib, RibError, RouteTable};

use crate::{
    Clock, DataplaneSink, PeerTransport, fanout,
    statistics::{Statistics, Stats},
};

/// Depth of the dispatch channel. Enqueues beyond it apply backpressure
/// to the caller instead of growing without bound.
const QUEUE_DEPTH: usize = 256;

#[derive(Debug)]
pub enum DispatchError {
    /// The transition was rejected by the routing core.
    Rib(RibError),
    /// The queue task is gone; the node is shutting down.
    Closed,
}

impl std::error::Error for DispatchError {}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rib(error) => write!(f, "{error}"),
            Self::Closed => write!(f, "action queue is closed"),
        }
    }
}

impl From<RibError> for DispatchError {
    fn from(error: RibError) -> Self {
        Self::Rib(error)
    }
}

struct Dispatch {
    action: Action,
    responder: oneshot::Sender<Result<CommitResult, RibError>>,
}

pub struct QueueOptions<T, S, C> {
    pub rib: Rib,
    pub transport: T,
    pub sink: S,
    pub clock: C,
    pub statistics: Statistics,
    /// Per-peer fan-out send timeout.
    pub send_timeout: Duration,
}

/// The single writer in front of the RIB.
///
/// Every mutation enters through [`ActionQueue::dispatch`] and is
/// applied by one task, strictly in enqueue order, one at a time. The
/// second of two concurrent dispatches observes all state changes of
/// the first; a rejected dispatch does not poison the queue. Completed
/// commits are handed to the fan-out worker in commit order before the
/// next dispatch begins.
#[derive(Clone)]
pub struct ActionQueue {
    sender: mpsc::Sender<Dispatch>,
    table: Arc<RwLock<Arc<RouteTable>>>,
}

impl ActionQueue {
    pub fn spawn<T, S, C>(options: QueueOptions<T, S, C>) -> Self
    where
        T: PeerTransport,
        S: DataplaneSink,
        C: Clock,
    {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let (commits, commits_rx) = mpsc::channel(QUEUE_DEPTH);
        let table = Arc::new(RwLock::new(Arc::new(options.rib.table().clone())));

        tokio::spawn(fanout::run(
            commits_rx,
            Arc::new(options.transport),
            options.sink,
            options.statistics.clone(),
            options.send_timeout,
        ));
        tokio::spawn(run(
            receiver,
            options.rib,
            options.clock,
            options.statistics,
            commits,
            table.clone(),
        ));

        Self { sender, table }
    }

    /// Submit one action and wait for its transition to settle.
    pub async fn dispatch(&self, action: Action) -> Result<CommitResult, DispatchError> {
        let (responder, response) = oneshot::channel();
        self.sender
            .send(Dispatch { action, responder })
            .await
            .map_err(|_| DispatchError::Closed)?;

        match response.await {
            Ok(result) => result.map_err(DispatchError::Rib),
            Err(_) => Err(DispatchError::Closed),
        }
    }

    /// Read-only snapshot of the route table as of the last commit.
    pub fn table(&self) -> Arc<RouteTable> {
        self.table.read().clone()
    }
}

async fn run<C>(
    mut receiver: mpsc::Receiver<Dispatch>,
    mut rib: Rib,
    clock: C,
    statistics: Statistics,
    commits: mpsc::Sender<CommitResult>,
    table: Arc<RwLock<Arc<RouteTable>>>,
) where
    C: Clock,
{
    while let Some(Dispatch { action, responder }) = receiver.recv().await {
        let now = clock.now();
        log::trace!("dispatch: action={}", action.kind());

        let result = rib
            .plan(&action, now)
            .and_then(|plan| rib.commit(plan));

        match &result {
            Ok(commit) => {
                statistics.add(None, Stats::DispatchAccepted);

                // Publish before answering so the result is never
                // observable ahead of the state it describes.
                *table.write() = Arc::new(rib.table().clone());

                if commits.send(commit.clone()).await.is_err() {
                    log::warn!("fan-out worker is gone, dropping propagations");
                }
            }
            Err(error) => {
                statistics.add(None, Stats::DispatchRejected);
                log::debug!("dispatch rejected: action={}, error={}", action.kind(), error);
            }
        }

        // A caller that gave up on the response is not an error.
        let _ = responder.send(result);
    }
}
