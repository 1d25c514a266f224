use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;

/// The kind of event being counted.
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    DispatchAccepted,
    DispatchRejected,
    PropagationSent,
    PropagationFailed,
}

#[derive(Default)]
struct Count(AtomicUsize);

impl Count {
    fn add(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-peer send counters.
#[derive(Default)]
struct PeerCounts {
    sent: Count,
    failed: Count,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerStats {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Inner {
    accepted: Count,
    rejected: Count,
    peers: RwLock<AHashMap<String, PeerCounts>>,
}

/// Node counters for the admin surface.
///
/// Dispatch counts come from the action queue, send counts from the
/// fan-out workers; both sides only ever add, so everything is plain
/// relaxed atomics behind one shared handle.
///
/// # Example
///
/// ```
/// use catalyst::statistics::{Statistics, Stats};
///
/// let statistics = Statistics::default();
///
/// statistics.add(None, Stats::DispatchAccepted);
/// statistics.add(Some("node-b"), Stats::PropagationSent);
///
/// assert_eq!(statistics.accepted(), 1);
/// assert_eq!(statistics.peer("node-b").unwrap().sent, 1);
/// ```
#[derive(Default, Clone)]
pub struct Statistics(Arc<Inner>);

impl Statistics {
    pub fn add(&self, peer: Option<&str>, stats: Stats) {
        match stats {
            Stats::DispatchAccepted => self.0.accepted.add(),
            Stats::DispatchRejected => self.0.rejected.add(),
            Stats::PropagationSent | Stats::PropagationFailed => {
                let Some(peer) = peer else {
                    return;
                };

                {
                    if let Some(counts) = self.0.peers.read().get(peer) {
                        match stats {
                            Stats::PropagationSent => counts.sent.add(),
                            _ => counts.failed.add(),
                        }

                        return;
                    }
                }

                let mut peers = self.0.peers.write();
                let counts = peers.entry(peer.to_string()).or_default();
                match stats {
                    Stats::PropagationSent => counts.sent.add(),
                    _ => counts.failed.add(),
                }
            }
        }
    }

    pub fn accepted(&self) -> usize {
        self.0.accepted.get()
    }

    pub fn rejected(&self) -> usize {
        self.0.rejected.get()
    }

    pub fn peer(&self, name: &str) -> Option<PeerStats> {
        self.0.peers.read().get(name).map(|counts| PeerStats {
            sent: counts.sent.get(),
            failed: counts.failed.get(),
        })
    }

    /// Forget a peer's counters, for when its record is deleted.
    pub fn forget(&self, name: &str) {
        self.0.peers.write().remove(name);
    }
}
