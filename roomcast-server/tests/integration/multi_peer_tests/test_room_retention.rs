use roomcast_core::RoomName;
use roomcast_server::RoomRetention;

use crate::integration::{create_test_coordinator_with, init_tracing};
use crate::utils::{DEMO_ROOM, TestClient};

#[tokio::test]
async fn test_last_peer_out_releases_router() {
    init_tracing();

    let harness = create_test_coordinator_with(RoomRetention::Release);
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);
    a.join(DEMO_ROOM).await.expect("A joins");
    b.join(DEMO_ROOM).await.expect("B joins");

    a.close().await;
    assert_eq!(harness.engine.router_count(), 1);

    b.close().await;
    assert_eq!(harness.engine.router_count(), 0);
    let exists = harness
        .coordinator
        .inspect(|s| s.registry.room(&RoomName::from(DEMO_ROOM)).is_some())
        .await;
    assert!(!exists);

    let mut c = TestClient::new(&harness.coordinator);
    c.join(DEMO_ROOM).await.expect("C recreates the room");
    assert_eq!(harness.engine.router_count(), 1);
}

#[tokio::test]
async fn test_keep_retention_reuses_dormant_router() {
    init_tracing();

    let harness = create_test_coordinator_with(RoomRetention::Keep);
    let mut a = TestClient::new(&harness.coordinator);
    let first = a.join(DEMO_ROOM).await.expect("A joins");
    a.close().await;

    let dormant = harness
        .coordinator
        .inspect(|s| {
            s.registry
                .room(&RoomName::from(DEMO_ROOM))
                .map(|r| (r.router.id, r.peers.len()))
        })
        .await;
    let (router, peers) = dormant.expect("room kept");
    assert_eq!(peers, 0);

    let mut b = TestClient::new(&harness.coordinator);
    let second = b.join(DEMO_ROOM).await.expect("B joins");

    assert_eq!(first, second);
    assert_eq!(harness.engine.router_count(), 1);
    let current = harness
        .coordinator
        .inspect(|s| s.registry.room_of(&b.peer_id).map(|r| r.router.id).ok())
        .await;
    assert_eq!(current, Some(router));
}
