mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use peer_link::{ManagerConfig, Outbound, PeerManager, ReceiveHandlers, WebRtcNegotiator};
use signal_bus::{LocalBus, SignalingTransport};

fn endpoint(id: &str, bus: &Arc<LocalBus>) -> PeerManager {
    let config = ManagerConfig::new(id).localhost();
    let negotiator = Arc::new(WebRtcNegotiator::new(&config).expect("webrtc api"));
    let transport: Arc<dyn SignalingTransport> = bus.clone();
    PeerManager::start(config, transport, negotiator).expect("start manager")
}

#[test_timeout::tokio_timeout_test(30, multi_thread)]
#[ignore = "needs a usable host network interface for ICE"]
async fn webrtc_endpoints_exchange_queued_messages() {
    common::init_tracing();
    let bus = Arc::new(LocalBus::new());
    let alice = endpoint("alice", &bus);
    let bob = endpoint("bob", &bus);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    bob.on_receive(
        "alice",
        ReceiveHandlers::new().on_data(move |payload: Bytes| sink.lock().push(payload)),
    )
    .await
    .expect("register");

    for n in 0..5 {
        alice
            .send("bob", Outbound::message(format!("hello-{n}")))
            .await
            .expect("queue");
    }
    alice.connect("bob", true).await.expect("connect");

    let observed = Arc::clone(&received);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while observed.lock().len() < 5 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of 5 messages arrived",
            observed.lock().len()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let expected: Vec<Bytes> = (0..5).map(|n| Bytes::from(format!("hello-{n}"))).collect();
    assert_eq!(*received.lock(), expected);

    let snapshot = alice.snapshot("bob").await.unwrap().unwrap();
    assert!(snapshot.connected());
}
