//! InkRoom WebSocket Relay Server
//!
//! Keeps one authoritative action log per room and relays every accepted
//! action to the room's other participants.
//!
//! ## Protocol
//!
//! Messages are JSON text frames on `/ws`:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "action", "action": { "type": "start", "x": 10.0, "y": 10.0, "color": "#ffffff", "brushSize": 5.0 } }
//! { "type": "undo" }
//! ```

pub mod config;
pub mod registry;
pub mod room;
pub mod ws;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::{ConfigError, ServerConfig};
pub use registry::RoomRegistry;
pub use room::{Room, RoomError, RoomSettings, Snapshot};

/// Shared application state
#[derive(Clone, Default)]
pub struct AppState {
    pub registry: RoomRegistry,
}

impl AppState {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            registry: RoomRegistry::new(settings),
        }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    rooms: usize,
}

/// Build the HTTP and WebSocket routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the relay on an already bound listener until the process stops.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

/// Index page
async fn index() -> &'static str {
    "InkRoom Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        rooms: state.registry.room_count(),
    })
}
