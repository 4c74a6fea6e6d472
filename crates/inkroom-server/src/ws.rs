//! WebSocket endpoint of the action channel.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use inkroom_core::{Action, ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::registry::RoomRegistry;
use crate::room::Outbox;

/// One connected client.
pub struct Connection {
    pub peer_id: String,
    pub room: Option<String>,
    outbox: Outbox,
}

impl Connection {
    pub fn new(peer_id: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            peer_id: peer_id.into(),
            room: None,
            outbox,
        }
    }

    fn send_error(&self, message: impl Into<String>) {
        let _ = self.outbox.send(ServerMessage::Error {
            message: message.into(),
        });
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerMessage>();
    let mut conn = Connection::new(peer_id, outbox);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => dispatch(&state.registry, &mut conn, client_msg).await,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn.peer_id, e);
                                conn.send_error(format!("Invalid message: {}", e));
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        conn.send_error("Binary frames are not supported");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn.peer_id, e);
                        break;
                    }
                }
            }

            Some(out) = inbox.recv() => {
                let json = match serde_json::to_string(&out) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode message for {}: {}", conn.peer_id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(room) = conn.room.take() {
        state.registry.leave(&room, &conn.peer_id).await;
    }
    info!("Connection closed: {}", conn.peer_id);
}

/// Route one client message to its handler.
pub async fn dispatch(registry: &RoomRegistry, conn: &mut Connection, msg: ClientMessage) {
    match msg {
        ClientMessage::Join { room } => handle_join(registry, conn, room).await,
        ClientMessage::Leave => handle_leave(registry, conn).await,
        ClientMessage::Action { action } => handle_action(registry, conn, action),
        ClientMessage::Batch { actions } => handle_batch(registry, conn, actions),
        ClientMessage::Undo => handle_undo(registry, conn),
        ClientMessage::Clear => handle_clear(registry, conn),
        ClientMessage::Snapshot => handle_snapshot(registry, conn),
    }
}

/// The joined room, or an error to the client.
fn joined_room(conn: &Connection) -> Option<&str> {
    if conn.room.is_none() {
        conn.send_error("Join a room first");
    }
    conn.room.as_deref()
}

async fn handle_join(registry: &RoomRegistry, conn: &mut Connection, room: String) {
    // The old room must be done with our outbox before the new one uses it
    if let Some(old_room) = conn.room.take() {
        if old_room != room {
            registry.leave(&old_room, &conn.peer_id).await;
        }
    }

    match registry.join(&room, &conn.peer_id, conn.outbox.clone()).await {
        Ok(snapshot) => {
            debug!(
                "Peer {} got {} actions from room {}",
                conn.peer_id,
                snapshot.log.len(),
                room
            );
            conn.room = Some(room);
        }
        Err(e) => {
            warn!("Peer {} could not join {}: {}", conn.peer_id, room, e);
            conn.send_error(e.to_string());
        }
    }
}

async fn handle_leave(registry: &RoomRegistry, conn: &mut Connection) {
    if let Some(room) = conn.room.take() {
        registry.leave(&room, &conn.peer_id).await;
    }
}

fn handle_action(registry: &RoomRegistry, conn: &Connection, action: Action) {
    if let Some(room) = joined_room(conn) {
        registry.append(room, &conn.peer_id, action);
    }
}

fn handle_batch(registry: &RoomRegistry, conn: &Connection, actions: Vec<Action>) {
    if let Some(room) = joined_room(conn) {
        registry.append_batch(room, &conn.peer_id, actions);
    }
}

fn handle_undo(registry: &RoomRegistry, conn: &Connection) {
    if let Some(room) = joined_room(conn) {
        registry.undo(room);
    }
}

fn handle_clear(registry: &RoomRegistry, conn: &Connection) {
    if let Some(room) = joined_room(conn) {
        registry.clear(room);
    }
}

fn handle_snapshot(registry: &RoomRegistry, conn: &Connection) {
    if let Some(room) = joined_room(conn) {
        registry.snapshot(room, &conn.peer_id);
    }
}
