use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use chat_relay_core::{protocol, ConnectionId, OutboundEvent};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::AppState;

/// WebSocket upgrade handler for `/chat`.
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, remote_addr: SocketAddr) {
    let connection_id = ConnectionId::new();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<OutboundEvent>(state.outbound_buffer);

    if state.engine.open(connection_id, tx).is_err() {
        warn!(connection_id = %connection_id, "session engine stopped; refusing connection");
        return;
    }
    counter!("chat_relay_connections_total", 1);
    info!(connection_id = %connection_id, remote_addr = %remote_addr, "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => forward_frame(&state, connection_id, &text),
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => forward_frame(&state, connection_id, text),
                Err(_) => {
                    counter!("chat_relay_malformed_frames_total", 1, "reason" => "binary");
                    debug!(
                        connection_id = %connection_id,
                        len = bytes.len(),
                        "dropping non-UTF-8 binary frame"
                    );
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket receive error");
                break;
            }
        }
    }

    if state.engine.close(connection_id).is_err() {
        debug!(connection_id = %connection_id, "session engine already stopped");
    }
    writer.abort();

    info!(connection_id = %connection_id, "websocket disconnected");
}

/// Decode one frame and hand it to the engine; anything malformed is dropped here.
fn forward_frame(state: &AppState, connection_id: ConnectionId, text: &str) {
    match protocol::decode(text) {
        Ok(event) => {
            if state.engine.inbound(connection_id, event).is_err() {
                warn!(connection_id = %connection_id, "session engine stopped; frame dropped");
            }
        }
        Err(err) => {
            counter!("chat_relay_malformed_frames_total", 1, "reason" => err.metric_label());
            debug!(connection_id = %connection_id, error = %err, "dropping malformed frame");
        }
    }
}
