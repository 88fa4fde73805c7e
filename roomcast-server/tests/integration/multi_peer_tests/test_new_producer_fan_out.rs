use roomcast_core::MediaKind;

use crate::integration::{create_test_coordinator, init_tracing};
use crate::utils::{DEMO_ROOM, TestClient};

#[tokio::test]
async fn test_new_producer_reaches_every_other_peer_once() {
    init_tracing();

    let harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);
    let mut c = TestClient::new(&harness.coordinator);
    let mut outsider = TestClient::new(&harness.coordinator);

    for client in [&mut a, &mut b, &mut c] {
        client.join(DEMO_ROOM).await.expect("join");
    }
    outsider.join("elsewhere").await.expect("join");

    a.create_send_transport().await.expect("send transport");
    let (producer, exist) = a.produce(MediaKind::Video).await.expect("produce");

    assert!(!exist);
    assert_eq!(harness.signaling.new_producers_for(&b.peer_id).await, vec![producer]);
    assert_eq!(harness.signaling.new_producers_for(&c.peer_id).await, vec![producer]);
    assert!(harness.signaling.events_for(&a.peer_id).await.is_empty());
    assert!(harness.signaling.events_for(&outsider.peer_id).await.is_empty());
}

#[tokio::test]
async fn test_late_joiner_uses_producer_list() {
    init_tracing();

    let harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");
    a.create_send_transport().await.expect("send transport");
    let (audio, _) = a.produce(MediaKind::Audio).await.expect("audio");
    let (video, _) = a.produce(MediaKind::Video).await.expect("video");

    let mut late = TestClient::new(&harness.coordinator);
    late.join(DEMO_ROOM).await.expect("late join");

    assert!(harness.signaling.events_for(&late.peer_id).await.is_empty());
    assert_eq!(late.get_producers().await.expect("list"), vec![audio, video]);
}

#[tokio::test]
async fn test_get_producers_excludes_own() {
    init_tracing();

    let harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");
    b.join(DEMO_ROOM).await.expect("B joins");

    a.create_send_transport().await.expect("A send transport");
    b.create_send_transport().await.expect("B send transport");
    let (pa, _) = a.produce(MediaKind::Video).await.expect("A produces");
    let (pb, _) = b.produce(MediaKind::Video).await.expect("B produces");

    assert_eq!(a.get_producers().await.expect("list"), vec![pb]);
    assert_eq!(b.get_producers().await.expect("list"), vec![pa]);
}
