//! WebSocket transport for the gateway.
//!
//! Thin adapter: text frames in, [`Gateway::handle_text`]; outbound
//! [`ServerEvent`]s out as JSON text frames. Closing the socket is the
//! disconnect signal.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use fuente_shared::protocol::ServerEvent;

use crate::api::AppState;
use crate::gateway::Gateway;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.gateway))
}

async fn handle_socket(socket: WebSocket, gateway: Gateway) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let id = gateway.connect(tx).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                Message::Text(text) => recv_gateway.handle_text(id, &text).await,
                Message::Binary(_) => {
                    recv_gateway
                        .reject(id, "binary frames are not supported")
                        .await
                }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    // Whichever side finishes first tears down the other.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.disconnect(id).await;
    debug!(connection = %id, "WebSocket closed");
}
