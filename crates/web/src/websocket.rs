//! Websocket fan-out.
//!
//! One upgrade endpoint; each client gets its own broadcast receiver and a
//! forward loop. Slow clients skip messages rather than back-pressuring the
//! producers; a failed send drops the client.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast;

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let events_rx = state.events_tx.subscribe();
    ws.on_upgrade(move |socket| client_loop(socket, events_rx))
}

async fn client_loop(mut socket: WebSocket, mut events_rx: broadcast::Receiver<String>) {
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                match event {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    tracing::debug!("websocket client disconnected");
}
