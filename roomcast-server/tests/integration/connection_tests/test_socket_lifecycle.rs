use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomcast_core::PeerId;
use roomcast_server::{SessionCoordinator, SignalingService, SignalingState, signaling_router};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::integration::{create_test_coordinator, init_tracing};
use crate::utils::{DEMO_ROOM, ENGINE_LATENCY_MS};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serves the signaling route on an ephemeral port.
async fn serve(coordinator: SessionCoordinator) -> (String, SignalingService) {
    let service = SignalingService::new();
    let app = signaling_router(SignalingState {
        coordinator,
        service: service.clone(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("ws://{addr}/ws"), service)
}

async fn next_frame(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("frame read");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().expect("utf-8")).expect("json frame");
        }
    }
}

async fn send_frame(ws: &mut Client, frame: Value) {
    ws.send(Message::text(frame.to_string()))
        .await
        .expect("frame sent");
}

/// Connects and returns the server-assigned peer id.
async fn connect(url: &str) -> (Client, PeerId) {
    let (mut ws, _) = connect_async(url).await.expect("websocket handshake");

    let hello = next_frame(&mut ws).await;
    assert_eq!(hello["op"], "connection-success");
    let peer_id = serde_json::from_value(hello["d"]["peerId"].clone()).expect("peer id");
    (ws, peer_id)
}

async fn wait_until_released(
    coordinator: &SessionCoordinator,
    service: &SignalingService,
    peer_id: PeerId,
) {
    for _ in 0..100 {
        let registered = coordinator
            .inspect(|s| s.registry.peer(&peer_id).is_some())
            .await;
        if !registered && !service.is_connected(&peer_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("peer {peer_id} still registered after disconnect");
}

#[tokio::test]
async fn test_socket_join_and_disconnect() {
    init_tracing();

    let harness = create_test_coordinator();
    let (url, service) = serve(harness.coordinator.clone()).await;
    let (mut ws, peer_id) = connect(&url).await;
    assert!(service.is_connected(&peer_id));

    send_frame(
        &mut ws,
        json!({ "id": 1, "op": "joinRoom", "d": { "roomName": DEMO_ROOM } }),
    )
    .await;
    let ack = next_frame(&mut ws).await;
    assert_eq!(ack["op"], "ack");
    assert_eq!(ack["d"]["id"], 1);
    assert!(ack["d"]["result"]["rtpCapabilities"]["codecs"].is_array());

    let joined = harness
        .coordinator
        .inspect(|s| s.registry.peer(&peer_id).is_some())
        .await;
    assert!(joined);

    ws.close(None).await.expect("close handshake");
    wait_until_released(&harness.coordinator, &service, peer_id).await;
    assert_eq!(harness.engine.router_count(), 0, "last peer out");
}

/// The socket drops while a request is inside the engine. The request still
/// completes first; cleanup then releases what it created.
#[tokio::test]
async fn test_socket_drop_with_request_in_flight() {
    init_tracing();

    let harness = create_test_coordinator();
    let (url, service) = serve(harness.coordinator.clone()).await;
    let (mut ws, peer_id) = connect(&url).await;

    send_frame(
        &mut ws,
        json!({ "id": 1, "op": "joinRoom", "d": { "roomName": DEMO_ROOM } }),
    )
    .await;
    next_frame(&mut ws).await;

    harness
        .engine
        .set_latency(Duration::from_millis(ENGINE_LATENCY_MS));
    send_frame(
        &mut ws,
        json!({ "id": 2, "op": "createWebRtcTransport", "d": { "consumer": false } }),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(ENGINE_LATENCY_MS / 5)).await;
    drop(ws);

    wait_until_released(&harness.coordinator, &service, peer_id).await;
    assert_eq!(harness.engine.transport_count(), 0);
    assert_eq!(harness.engine.router_count(), 0);
}
