//! Test server harness for integration tests.
//!
//! Spins up the real router on an ephemeral port and provides small JSON
//! helpers for WebSocket clients.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use inkroom_server::{AppState, RoomRegistry, RoomSettings, router};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A test server instance with control handles.
pub struct TestServer {
    addr: SocketAddr,
    registry: RoomRegistry,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_settings(RoomSettings::default()).await
    }

    pub async fn with_settings(settings: RoomSettings) -> Self {
        let state = AppState::new(settings);
        let registry = state.registry.clone();
        let app = router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
        let addr = listener.local_addr().expect("failed to get local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server error");
        });

        Self {
            addr,
            registry,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    #[allow(dead_code)]
    pub fn http_addr(&self) -> SocketAddr {
        self.addr
    }

    #[allow(dead_code)]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// One WebSocket client.
pub struct Client {
    write: SplitSink<Socket, Message>,
    read: SplitStream<Socket>,
}

impl Client {
    pub async fn connect(server: &TestServer) -> Self {
        let (ws, _) = connect_async(server.ws_url())
            .await
            .expect("failed to connect");
        let (write, read) = ws.split();
        Self { write, read }
    }

    /// Connect and join `room`, returning the `joined` message.
    pub async fn join(server: &TestServer, room: &str) -> (Self, Value) {
        let mut client = Self::connect(server).await;
        client
            .send(&serde_json::json!({ "type": "join", "room": room }))
            .await;
        let joined = client.recv_type("joined").await;
        (client, joined)
    }

    pub async fn send(&mut self, value: &Value) {
        self.send_text(&value.to_string()).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.write
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send failed");
    }

    /// Next JSON message, or `None` after a second of silence.
    pub async fn recv(&mut self) -> Option<Value> {
        let msg = timeout(Duration::from_secs(1), self.read.next())
            .await
            .ok()??
            .ok()?;
        match msg {
            Message::Text(text) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// Skip messages until one of type `msg_type` arrives.
    pub async fn recv_type(&mut self, msg_type: &str) -> Value {
        for _ in 0..16 {
            match self.recv().await {
                Some(msg) if msg["type"] == msg_type => return msg,
                Some(_) => continue,
                None => break,
            }
        }
        panic!("no {msg_type} message received");
    }

    pub async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}
