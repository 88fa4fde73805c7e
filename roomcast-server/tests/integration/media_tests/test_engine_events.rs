use std::time::Duration;

use roomcast_core::MediaKind;
use roomcast_server::{EngineError, EngineResource};

use crate::integration::{create_test_coordinator, init_tracing};
use crate::utils::{DEMO_ROOM, TestClient};

#[tokio::test]
async fn test_engine_closed_producer_cascades() {
    init_tracing();

    let mut harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");
    b.join(DEMO_ROOM).await.expect("B joins");
    a.create_send_transport().await.expect("send transport");
    let (producer, _) = a.produce(MediaKind::Video).await.expect("produce");
    let recv = b.create_recv_transport().await.expect("receive transport");
    let consumer = b.consume(producer, recv).await.expect("consume");

    harness.engine.close_producer_remotely(producer);
    harness.pump_events().await.expect("engine alive");

    assert_eq!(
        harness.signaling.closed_producers_for(&b.peer_id).await,
        vec![producer]
    );
    let (known, a_producers, peers) = harness
        .coordinator
        .inspect(|s| {
            (
                s.consumers.find(&consumer.id).is_some(),
                s.registry.peer(&a.peer_id).map(|p| p.producers.len()),
                s.registry.peer_count(),
            )
        })
        .await;
    assert!(!known);
    assert_eq!(a_producers, Some(0));
    assert_eq!(peers, 2, "nobody disconnected");
    assert!(b.get_producers().await.expect("list").is_empty());
}

#[tokio::test]
async fn test_transport_failure_closes_its_producers() {
    init_tracing();

    let mut harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");
    b.join(DEMO_ROOM).await.expect("B joins");
    let send = a.create_send_transport().await.expect("send transport");
    let (producer, _) = a.produce(MediaKind::Audio).await.expect("produce");
    let recv = b.create_recv_transport().await.expect("receive transport");
    b.consume(producer, recv).await.expect("consume");

    harness.engine.fail_transport(send);
    harness.pump_events().await.expect("engine alive");

    assert_eq!(
        harness.signaling.closed_producers_for(&b.peer_id).await,
        vec![producer]
    );
    assert!(!harness.engine.is_open(EngineResource::Transport(recv)));

    // The send slot is free again.
    a.create_send_transport().await.expect("replacement send transport");
}

#[tokio::test]
async fn test_engine_closed_consumer_drops_record() {
    init_tracing();

    let mut harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");
    b.join(DEMO_ROOM).await.expect("B joins");
    a.create_send_transport().await.expect("send transport");
    let (producer, _) = a.produce(MediaKind::Video).await.expect("produce");
    let recv = b.create_recv_transport().await.expect("receive transport");
    let consumer = b.consume(producer, recv).await.expect("consume");

    harness.engine.close_consumer_remotely(consumer.id);
    harness.pump_events().await.expect("engine alive");

    assert!(harness.signaling.closed_producers_for(&b.peer_id).await.is_empty());
    let (known, recv_known) = harness
        .coordinator
        .inspect(|s| {
            (
                s.consumers.find(&consumer.id).is_some(),
                s.registry.transport(&recv).is_some(),
            )
        })
        .await;
    assert!(!known);
    assert!(!recv_known, "idle receive transport released");
    assert!(!harness.engine.is_open(EngineResource::Transport(recv)));

    let fresh = b.create_recv_transport().await.expect("new receive transport");
    b.consume(producer, fresh)
        .await
        .expect("the pair can be consumed again");
}

#[tokio::test]
async fn test_engine_death_stops_event_loop() {
    init_tracing();

    let harness = create_test_coordinator();
    let (coordinator, engine, handle) = harness.into_event_loop();
    let mut a = TestClient::new(&coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");

    engine.crash("worker exited");

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("event loop ends")
        .expect("task not panicked");
    assert_eq!(result, Err(EngineError::Died));

    let kind = a
        .expect_error("createWebRtcTransport", serde_json::json!({ "consumer": true }))
        .await
        .expect("ack");
    assert_eq!(kind, "EngineFailure");
}
