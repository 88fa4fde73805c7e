use roomcast_core::{PeerDetails, RoomName};

use crate::integration::{create_test_coordinator, init_tracing};
use crate::utils::{DEMO_ROOM, TestClient};

#[tokio::test]
async fn test_peers_in_same_room_share_router() {
    init_tracing();

    let harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);

    let caps_a = a.join(DEMO_ROOM).await.expect("A joins");
    let caps_b = b.join(DEMO_ROOM).await.expect("B joins");

    assert_eq!(caps_a, caps_b);
    assert_eq!(harness.engine.router_count(), 1);

    let (peers, a_room, b_room) = harness
        .coordinator
        .inspect(|s| {
            let room = RoomName::from(DEMO_ROOM);
            (
                s.registry.room(&room).map(|r| r.peers.clone()),
                s.registry.room_of(&a.peer_id).map(|r| r.router.id).ok(),
                s.registry.room_of(&b.peer_id).map(|r| r.router.id).ok(),
            )
        })
        .await;

    assert_eq!(peers, Some(vec![a.peer_id, b.peer_id]));
    assert!(a_room.is_some());
    assert_eq!(a_room, b_room);
}

#[tokio::test]
async fn test_separate_rooms_get_separate_routers() {
    init_tracing();

    let harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);
    let mut b = TestClient::new(&harness.coordinator);

    a.join("one").await.expect("A joins");
    b.join("two").await.expect("B joins");

    assert_eq!(harness.engine.router_count(), 2);
}

#[tokio::test]
async fn test_join_records_default_details_and_advertises_codecs() {
    init_tracing();

    let harness = create_test_coordinator();
    let mut a = TestClient::new(&harness.coordinator);

    let caps = a.join(DEMO_ROOM).await.expect("A joins");

    let mimes: Vec<String> = caps.codecs.iter().map(|c| c.mime_type.clone()).collect();
    assert_eq!(mimes, vec!["audio/opus".to_owned(), "video/VP8".to_owned()]);
    assert!(caps.codecs.iter().all(|c| c.preferred_payload_type.is_some()));

    let details = harness
        .coordinator
        .inspect(|s| s.registry.peer(&a.peer_id).map(|p| p.details.clone()))
        .await;
    assert_eq!(details, Some(PeerDetails::default()));
}
