use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use parking_lot::Mutex;

use catalyst::{
    Clock, DataplaneSink, PeerTransport,
    queue::{ActionQueue, DispatchError, QueueOptions},
    statistics::Statistics,
    tick::TickDriver,
};
use rib::{
    Action, DataplaneSnapshot, PeerInfo, PortRange, Propagation, PropagationBody, Protocol, Rib,
    RibError, RibOptions,
};

const LOCAL: &str = "node-a.example.local.io";

#[derive(Default, Clone)]
struct MockTransport {
    sent: Arc<Mutex<Vec<Propagation>>>,
}

impl PeerTransport for MockTransport {
    async fn send(&self, propagation: Propagation) -> Result<()> {
        self.sent.lock().push(propagation);
        Ok(())
    }
}

#[derive(Default, Clone)]
struct MockSink {
    versions: Arc<Mutex<Vec<u64>>>,
}

impl DataplaneSink for MockSink {
    fn push(&self, snapshot: DataplaneSnapshot) -> Result<()> {
        self.versions.lock().push(snapshot.version);
        Ok(())
    }
}

#[derive(Default, Clone)]
struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    fn set(&self, now: u64) {
        self.0.store(now, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn node(name: &str) -> PeerInfo {
    PeerInfo {
        name: name.to_string(),
        domains: Vec::new(),
        endpoint: None,
        labels: None,
        peer_token: None,
        envoy_address: None,
    }
}

fn rib() -> Rib {
    Rib::new(RibOptions {
        node: node(LOCAL),
        port_ranges: vec![PortRange::new(10000, 10100)],
        default_hold_seconds: 60,
    })
}

fn spawn_queue(
    transport: MockTransport,
    sink: MockSink,
    clock: ManualClock,
) -> (ActionQueue, Statistics) {
    let statistics = Statistics::default();
    let queue = ActionQueue::spawn(QueueOptions {
        rib: rib(),
        transport,
        sink,
        clock,
        statistics: statistics.clone(),
        send_timeout: Duration::from_secs(5),
    });

    (queue, statistics)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("condition not reached in time");
}

fn route(name: &str) -> rib::DataChannelDefinition {
    rib::DataChannelDefinition {
        name: name.to_string(),
        protocol: Protocol::Http,
        endpoint: None,
        region: None,
        tags: None,
        envoy_port: None,
    }
}

#[tokio::test]
async fn concurrent_dispatches_serialize_in_enqueue_order() {
    let sink = MockSink::default();
    let (queue, _) = spawn_queue(MockTransport::default(), sink.clone(), ManualClock::default());

    // Enqueued without awaiting the first: the delete must still
    // observe the create's state.
    let create = queue.dispatch(Action::LocalRouteCreate(route("books-api")));
    let delete = queue.dispatch(Action::LocalRouteDelete {
        name: "books-api".to_string(),
        protocol: Protocol::Http,
    });

    let (created, deleted) = tokio::join!(create, delete);
    let created = created.unwrap();
    let deleted = deleted.unwrap();

    assert_eq!(created.snapshot.version, 1);
    assert_eq!(created.snapshot.listeners.len(), 1);
    assert_eq!(deleted.snapshot.version, 2);
    assert!(deleted.snapshot.listeners.is_empty());

    assert!(queue.table().local.routes.is_empty());

    // The sink sees both snapshots, in commit order.
    wait_for(|| sink.versions.lock().len() == 2).await;
    assert_eq!(*sink.versions.lock(), vec![1, 2]);
}

#[tokio::test]
async fn a_rejected_dispatch_does_not_poison_the_queue() {
    let (queue, statistics) = spawn_queue(
        MockTransport::default(),
        MockSink::default(),
        ManualClock::default(),
    );

    queue
        .dispatch(Action::LocalPeerCreate(node("node-b")))
        .await
        .unwrap();

    let error = queue
        .dispatch(Action::LocalPeerCreate(node("node-b")))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        DispatchError::Rib(RibError::DuplicatePeer(_))
    ));

    // The queue keeps going.
    queue
        .dispatch(Action::LocalRouteCreate(route("books-api")))
        .await
        .unwrap();
    assert_eq!(queue.table().local.routes.len(), 1);
    assert_eq!(statistics.accepted(), 2);
    assert_eq!(statistics.rejected(), 1);
}

#[tokio::test]
async fn open_and_sync_reach_the_peer_in_order() {
    let transport = MockTransport::default();
    let (queue, statistics) = spawn_queue(
        transport.clone(),
        MockSink::default(),
        ManualClock::default(),
    );

    queue
        .dispatch(Action::LocalRouteCreate(route("books-api")))
        .await
        .unwrap();
    queue
        .dispatch(Action::InternalProtocolOpen {
            peer_info: node("node-b"),
        })
        .await
        .unwrap();

    wait_for(|| transport.sent.lock().len() == 2).await;

    let sent = transport.sent.lock();
    assert_eq!(sent[0].peer.name, "node-b");
    assert_eq!(sent[0].body, PropagationBody::Open);
    match &sent[1].body {
        PropagationBody::Update { update } => {
            assert_eq!(update.updates.len(), 1);
            assert_eq!(update.updates[0].route.name, "books-api");
            assert_eq!(update.updates[0].node_path.as_deref().unwrap(), [LOCAL]);
        }
        other => panic!("unexpected body: {other:?}"),
    }
    drop(sent);

    assert_eq!(statistics.peer("node-b").unwrap().sent, 2);
}

#[tokio::test]
async fn tick_driver_drives_keepalive_and_expiry() {
    let transport = MockTransport::default();
    let clock = ManualClock::default();
    let (queue, _) = spawn_queue(transport.clone(), MockSink::default(), clock.clone());

    queue
        .dispatch(Action::LocalPeerCreate(node("node-b")))
        .await
        .unwrap();
    queue
        .dispatch(Action::InternalProtocolConnected {
            name: "node-b".to_string(),
        })
        .await
        .unwrap();

    let ticker = TickDriver::spawn(queue.clone(), clock.clone(), Duration::from_millis(10));

    // A third of the hold time with nothing sent: keepalive is due.
    clock.set(25_000);
    wait_for(|| {
        transport
            .sent
            .lock()
            .iter()
            .any(|p| p.body == PropagationBody::Keepalive)
    })
    .await;

    // Past the hold time with nothing received: the session dies.
    clock.set(90_000);
    wait_for(|| {
        transport
            .sent
            .lock()
            .iter()
            .any(|p| matches!(p.body, PropagationBody::Close { .. }))
    })
    .await;

    wait_for(|| {
        queue
            .table()
            .peer("node-b")
            .map(|record| record.connection_status == rib::ConnectionStatus::Closed)
            .unwrap_or(false)
    })
    .await;

    ticker.stop().await;
}
