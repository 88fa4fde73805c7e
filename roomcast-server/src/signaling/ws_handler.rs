use crate::session::SessionCoordinator;
use crate::signaling::{SignalingService, SignalingSession};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use roomcast_core::{PeerId, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// Shared state behind the signaling route.
#[derive(Clone)]
pub struct SignalingState {
    pub coordinator: SessionCoordinator,
    pub service: SignalingService,
}

/// `GET /ws` upgrades to a signaling connection.
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SignalingState>,
) -> impl IntoResponse {
    let peer_id = PeerId::new();
    ws.on_upgrade(move |socket| handle_socket(socket, peer_id, state))
}

async fn handle_socket(socket: WebSocket, peer_id: PeerId, state: SignalingState) {
    info!("New WebSocket connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let service = state.service.clone();

    service.add_peer(peer_id, tx);
    service.send_message(peer_id, &ServerMessage::ConnectionSuccess { peer_id });

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Stops the receive loop between two messages, never inside one.
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

    let mut recv_task = tokio::spawn({
        let service = service.clone();
        let mut session = SignalingSession::new(peer_id, state.coordinator.clone());

        async move {
            loop {
                let msg = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    msg = receiver.next() => msg,
                };

                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = session.handle_text(text.as_str()).await {
                            service.send_message(peer_id, &reply);
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }

            session.close().await;
        }
    });

    let recv_finished = tokio::select! {
        _ = (&mut send_task) => false,
        _ = (&mut recv_task) => true,
    };

    if recv_finished {
        send_task.abort();
    } else {
        let _ = shutdown_tx.send(());
        if let Err(e) = recv_task.await {
            error!("Receive loop of {} failed: {}", peer_id, e);
        }
    }

    service.remove_peer(&peer_id);
    info!("WebSocket disconnected: {}", peer_id);
}
