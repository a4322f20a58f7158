// tests/console_tests.rs
// Console side: adaptive poller pacing, heartbeat scheduling and peer discovery.

use aquadrone::console::{PeerListener, PeerTracker, PollOutcome, PollRecord, PollTransport, UpdatePoller};
use aquadrone::network::broadcast::decode_announcement;
use aquadrone::network::{
    BroadcastHandler, BroadcastSink, DataType, HeartbeatBroadcast, InfoPayload, Message, UdpSink,
};
use aquadrone::{ControllerRuntimeState, DroneCI, DroneConfig, SimulatedDroneCI};
use crossbeam::channel;
use mockall::mock;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

mock! {
    Transport {}
    impl PollTransport for Transport {
        fn request(&mut self, data_type: DataType) -> aquadrone::Result<InfoPayload>;
    }
}

mock! {
    Sink {}
    impl BroadcastSink for Sink {
        fn send(&mut self, datagram: &[u8]) -> io::Result<()>;
    }
}

fn simulated() -> Arc<dyn DroneCI> {
    Arc::new(SimulatedDroneCI::new(&DroneConfig::default().simulation).unwrap())
}

#[test]
fn test_poller_sleep_shrinks_as_round_trip_grows() {
    let delays = [10u64, 40, 70, 130];
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    // Drone answers slower on every request
    let mut transport = MockTransport::new();
    transport.expect_request().returning(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst).min(delays.len() - 1);
        thread::sleep(Duration::from_millis(delays[n]));
        Ok(InfoPayload::Compass(Some(90.0)))
    });

    let refresh = Duration::from_millis(100);
    let (tx, rx) = channel::unbounded::<PollRecord>();
    let poller = UpdatePoller::spawn(DataType::Compass, refresh, Box::new(transport), Box::new(tx)).unwrap();

    let records: Vec<PollRecord> = (0..delays.len())
        .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
        .collect();
    let stats = poller.stop();

    for record in &records {
        assert_eq!(record.outcome, PollOutcome::Update(InfoPayload::Compass(Some(90.0))));
        assert_eq!(record.sleep, refresh.saturating_sub(record.round_trip));
    }
    assert!(records[0].sleep > records[1].sleep);
    assert!(records[1].sleep > records[2].sleep);
    // Slower than the refresh interval: next request goes out immediately
    assert_eq!(records[3].sleep, Duration::ZERO);
    assert!(stats.answered >= delays.len() as u64);
    assert_eq!(stats.missed, 0);
}

#[test]
fn test_pollers_run_independently() {
    let mut fast = MockTransport::new();
    fast.expect_request().returning(|_| Ok(InfoPayload::Compass(Some(0.0))));
    let mut stalled = MockTransport::new();
    stalled.expect_request().returning(|_| {
        thread::sleep(Duration::from_millis(300));
        Ok(InfoPayload::Compass(None))
    });

    let (tx, rx) = channel::unbounded::<PollRecord>();
    let refresh = Duration::from_millis(20);
    let quick = UpdatePoller::spawn(DataType::Compass, refresh, Box::new(fast), Box::new(tx.clone())).unwrap();
    let slow = UpdatePoller::spawn(DataType::Gps, refresh, Box::new(stalled), Box::new(tx)).unwrap();

    // A stalled data type does not hold back the other one
    thread::sleep(Duration::from_millis(200));
    let quick_stats = quick.stop();
    let slow_stats = slow.stop();
    assert!(quick_stats.answered >= 3);
    assert!(slow_stats.sent <= 2);
    assert!(rx.try_iter().any(|r| r.data_type == DataType::Compass));
}

#[test]
fn test_heartbeat_count_matches_interval() {
    // 500 ms of 10 ms cycles with a 100 ms heartbeat: due at 0, 100, 200, 300, 400
    let mut sink = MockSink::new();
    sink.expect_send()
        .withf(|datagram| matches!(decode_announcement(datagram), Ok(Message::Heartbeat(_))))
        .times(5)
        .returning(|_| Ok(()));

    let mut handler = BroadcastHandler::new(Box::new(sink));
    handler.add(Box::new(HeartbeatBroadcast::new(
        "drone-7",
        None,
        Duration::from_millis(100),
        Arc::new(ControllerRuntimeState::new()),
        simulated(),
    )));
    for cycle in 0..50u64 {
        handler.update(Duration::from_millis(cycle * 10));
    }
    assert_eq!(handler.sent(), 5);
}

#[test]
fn test_heartbeat_each_cycle_when_interval_equals_cycle() {
    // 20 ms cycles that start late by a growing amount, as a real loop does
    let mut sink = MockSink::new();
    sink.expect_send().times(30).returning(|_| Ok(()));

    let mut handler = BroadcastHandler::new(Box::new(sink));
    handler.add(Box::new(HeartbeatBroadcast::new(
        "drone-7",
        None,
        Duration::from_millis(20),
        Arc::new(ControllerRuntimeState::new()),
        simulated(),
    )));
    let mut started = Duration::from_millis(7);
    for cycle in 0..30u64 {
        handler.update(started);
        started += Duration::from_millis(20) + Duration::from_micros(cycle % 4 * 300);
    }
    assert_eq!(handler.sent(), 30);
}

#[test]
fn test_failed_sends_are_not_counted() {
    let mut sink = MockSink::new();
    sink.expect_send()
        .times(2)
        .returning(|_| Err(io::Error::new(io::ErrorKind::Other, "network unreachable")));

    let mut handler = BroadcastHandler::new(Box::new(sink));
    handler.add(Box::new(HeartbeatBroadcast::new(
        "drone-7",
        None,
        Duration::from_millis(100),
        Arc::new(ControllerRuntimeState::new()),
        simulated(),
    )));
    handler.update(Duration::ZERO);
    handler.update(Duration::from_millis(100));
    assert_eq!(handler.sent(), 0);
    assert!(handler.is_active());
}

#[test]
fn test_peer_listener_discovers_heartbeat_sender() {
    let tracker = Arc::new(Mutex::new(PeerTracker::new(Duration::from_secs(10))));
    let mut listener = PeerListener::bind("127.0.0.1:0".parse().unwrap(), tracker.clone()).unwrap();

    // Heartbeat over a real UDP socket
    let runtime = Arc::new(ControllerRuntimeState::new());
    let mut handler = BroadcastHandler::new(Box::new(UdpSink::bind(listener.local_addr()).unwrap()));
    handler.add(Box::new(HeartbeatBroadcast::new(
        "drone-3",
        Some("127.0.0.1:10101".parse().unwrap()),
        Duration::from_millis(50),
        runtime,
        simulated(),
    )));
    handler.update(Duration::ZERO);

    let deadline = Instant::now() + Duration::from_secs(2);
    while tracker.lock().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    listener.stop();

    let tracker = tracker.lock();
    let peer = tracker.get("drone-3").unwrap();
    assert_eq!(peer.heartbeat.status, "Starting");
    assert_eq!(peer.heartbeat.address, Some("127.0.0.1:10101".parse().unwrap()));
    assert!(peer.heartbeat.position.is_some());
}
