//! WebSocket endpoints for store and table rooms.
//!
//! `/ws/store/{store_id}` and `/ws/table/{store_id}/{table_id}`. Inbound
//! `"ping"` text frames are answered with `"pong"`; everything else from
//! the client is ignored. Server pushes are JSON `{event, data, timestamp}`.

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
    routing::any,
};

use super::Room;
use crate::server::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/ws/store/{store_id}", any(ws_store))
        .route("/ws/table/{store_id}/{table_id}", any(ws_table))
}

async fn ws_store(
    State(state): State<ServerState>,
    Path(store_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_room(state, Room::store(store_id), socket))
}

async fn ws_table(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_room(state, Room::table(store_id, table_id), socket))
}

/// Pump one connection: register, forward room frames out, answer pings,
/// unregister on close or send failure.
async fn serve_room(state: ServerState, room: Room, mut socket: WebSocket) {
    let (conn_id, mut frames) = state.rooms.register(room.clone());
    tracing::debug!(?room, conn_id, "WebSocket connected");

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
                        if socket.send(Message::Text("pong".into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Other frames ignored
                    Some(Err(e)) => {
                        tracing::debug!(conn_id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
        }
    }

    state.rooms.unregister(&room, conn_id);
    tracing::debug!(?room, conn_id, "WebSocket disconnected");
}
