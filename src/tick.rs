use std::time::Duration;

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use rib::Action;

use crate::{
    Clock,
    queue::{ActionQueue, DispatchError},
};

/// Periodic clock source.
///
/// Enqueues a `system:tick` action at a fixed cadence; all expiry and
/// keepalive logic lives in the routing core, the driver itself holds
/// no state.
pub struct TickDriver {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TickDriver {
    pub fn spawn<C>(queue: ActionQueue, clock: C, period: Duration) -> Self
    where
        C: Clock,
    {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let now = clock.now();
                        match queue.dispatch(Action::Tick { now }).await {
                            Ok(_) => {}
                            Err(DispatchError::Closed) => break,
                            Err(error) => {
                                log::warn!("tick dispatch rejected: error={error}");
                            }
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
        });

        Self { stop, handle }
    }

    /// Stop the driver and wait for the in-flight tick, if any, to
    /// settle.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
