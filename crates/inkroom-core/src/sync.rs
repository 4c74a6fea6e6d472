//! Action channel protocol and WebSocket client.
//!
//! Messages are JSON text frames tagged by `type`:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "action", "action": { "type": "draw", "x": 11.0, "y": 10.5 } }
//! { "type": "history_replaced", "log": [ { "type": "clear" } ] }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::Action;
use crate::compact::Limits;

/// Protocol and transport errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid WebSocket URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, receiving its full log.
    Join { room: String },
    /// Leave the current room.
    Leave,
    /// Append one action; relayed to everyone else.
    Action { action: Action },
    /// Append several actions; draw runs are simplified by the server.
    Batch { actions: Vec<Action> },
    /// Remove the last log entry.
    Undo,
    /// Replace the log with a single `Clear`.
    Clear,
    /// Ask for the current log (sent to the requester only).
    Snapshot,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with the current log.
    Joined {
        room: String,
        /// Id the server stamps on this connection's actions.
        peer_id: String,
        participants: Vec<String>,
        log: Vec<Action>,
        #[serde(default)]
        limits: Limits,
    },
    /// Peer joined the room.
    PeerJoined { peer_id: String },
    /// Peer left the room.
    PeerLeft { peer_id: String },
    /// One action from another peer.
    Action { from: String, action: Action },
    /// A compacted batch from another peer.
    Batch { from: String, actions: Vec<Action> },
    /// The whole log changed (undo or clear); replay it.
    HistoryReplaced { log: Vec<Action> },
    /// Reply to [`ClientMessage::Snapshot`].
    Snapshot { log: Vec<Action> },
    /// Error message.
    Error { message: String },
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the WebSocket client
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connected to server
    Connected,
    /// Disconnected from server
    Disconnected,
    /// A decoded server message
    Message(ServerMessage),
    /// Error occurred
    Error { message: String },
}

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::io::ErrorKind;
    use std::net::TcpStream;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::stream::MaybeTlsStream;
    use tungstenite::{Message, WebSocket, connect};
    use url::Url;

    type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

    const READ_TIMEOUT: Duration = Duration::from_millis(50);
    const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    enum WsCommand {
        Send(String),
        Close,
    }

    /// What one read from the socket produced.
    enum Inbound {
        Idle,
        Frame(ServerMessage),
        Closed,
    }

    /// Check that `url` is a `ws://` or `wss://` URL.
    pub fn validate_url(url: &str) -> Result<Url, ProtocolError> {
        let parsed = Url::parse(url).map_err(|e| ProtocolError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(parsed),
            other => Err(ProtocolError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Owns the socket on the worker thread.
    struct Pump {
        socket: Socket,
        commands: Receiver<WsCommand>,
        events: Sender<ChannelEvent>,
    }

    impl Pump {
        fn open(url: &str, commands: Receiver<WsCommand>, events: Sender<ChannelEvent>) {
            let socket = match connect(url) {
                Ok((socket, response)) => {
                    log::info!("Connected to {} ({})", url, response.status());
                    socket
                }
                Err(e) => {
                    log::error!("Could not connect to {}: {}", url, e);
                    let _ = events.send(ChannelEvent::Error {
                        message: format!("Connection failed: {}", e),
                    });
                    return;
                }
            };
            let mut pump = Pump {
                socket,
                commands,
                events,
            };
            pump.set_timeouts();
            let _ = pump.events.send(ChannelEvent::Connected);
            pump.run();
            let _ = pump.events.send(ChannelEvent::Disconnected);
        }

        /// Reads must time out or queued sends would wait on the peer.
        fn set_timeouts(&mut self) {
            if let MaybeTlsStream::Plain(tcp) = self.socket.get_mut() {
                let _ = tcp.set_read_timeout(Some(READ_TIMEOUT));
                let _ = tcp.set_write_timeout(Some(WRITE_TIMEOUT));
            } else {
                log::debug!("Non-plain stream, reads may block until a frame arrives");
            }
        }

        fn run(&mut self) {
            while self.flush_commands() {
                match self.read_one() {
                    Inbound::Idle => {}
                    Inbound::Frame(msg) => {
                        if self.events.send(ChannelEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Inbound::Closed => break,
                }
            }
            log::debug!("Socket worker stopped");
        }

        /// Send everything queued. False once the connection should end.
        fn flush_commands(&mut self) -> bool {
            loop {
                match self.commands.try_recv() {
                    Ok(WsCommand::Send(text)) => {
                        if let Err(e) = self.socket.send(Message::Text(text)) {
                            log::error!("Send failed: {}", e);
                            return false;
                        }
                    }
                    Ok(WsCommand::Close) => {
                        let _ = self.socket.close(None);
                        return false;
                    }
                    Err(TryRecvError::Disconnected) => return false,
                    Err(TryRecvError::Empty) => return true,
                }
            }
        }

        fn read_one(&mut self) -> Inbound {
            match self.socket.read() {
                Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                    Ok(msg) => Inbound::Frame(msg),
                    Err(e) => {
                        log::warn!("Dropping server frame: {}", e);
                        Inbound::Idle
                    }
                },
                Ok(Message::Ping(data)) => {
                    let _ = self.socket.send(Message::Pong(data));
                    Inbound::Idle
                }
                Ok(Message::Close(_)) => Inbound::Closed,
                Ok(_) => Inbound::Idle,
                Err(tungstenite::Error::Io(e))
                    if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    Inbound::Idle
                }
                Err(e) => {
                    log::error!("Read failed: {}", e);
                    Inbound::Closed
                }
            }
        }
    }

    /// Blocking tungstenite client driven from a worker thread.
    ///
    /// [`send`](Self::send) only queues, and [`poll_events`](Self::poll_events)
    /// never waits, so a drawing loop can call both every frame.
    pub struct NativeWebSocket {
        state: ConnectionState,
        commands: Option<Sender<WsCommand>>,
        events: Option<Receiver<ChannelEvent>>,
        worker: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                commands: None,
                events: None,
                worker: None,
            }
        }

        /// Start connecting. The outcome arrives through [`poll_events`](Self::poll_events).
        pub fn connect(&mut self, url: &str) -> Result<(), ProtocolError> {
            if self.commands.is_some() {
                return Err(ProtocolError::AlreadyConnected);
            }
            let url = validate_url(url)?.to_string();

            let (cmd_tx, cmd_rx) = channel();
            let (event_tx, event_rx) = channel();
            let worker = thread::spawn(move || Pump::open(&url, cmd_rx, event_tx));

            self.state = ConnectionState::Connecting;
            self.commands = Some(cmd_tx);
            self.events = Some(event_rx);
            self.worker = Some(worker);
            Ok(())
        }

        /// Ask the worker to close the socket. Does not wait for it.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.commands.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.events = None;
            self.worker = None;
            self.state = ConnectionState::Disconnected;
        }

        /// Queue a text frame.
        pub fn send(&self, msg: &str) -> Result<(), ProtocolError> {
            let tx = self.commands.as_ref().ok_or(ProtocolError::NotConnected)?;
            tx.send(WsCommand::Send(msg.to_string()))
                .map_err(|e| ProtocolError::SendFailed(e.to_string()))
        }

        pub fn send_message(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
            self.send(&msg.to_json()?)
        }

        /// Everything the worker reported since the last call.
        pub fn poll_events(&mut self) -> Vec<ChannelEvent> {
            let Some(rx) = self.events.as_ref() else {
                return Vec::new();
            };
            let events: Vec<ChannelEvent> = rx.try_iter().collect();
            for event in &events {
                self.state = match event {
                    ChannelEvent::Connected => ConnectionState::Connected,
                    ChannelEvent::Disconnected => ConnectionState::Disconnected,
                    ChannelEvent::Error { .. } => ConnectionState::Error,
                    ChannelEvent::Message(_) => continue,
                };
            }
            events
        }

        pub fn state(&self) -> ConnectionState {
            self.state
        }

        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::{NativeWebSocket, validate_url};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{BrushStyle, Point, Tool};

    #[test]
    fn test_client_message_serialize() {
        let msg = ClientMessage::Join {
            room: "test-room".to_string(),
        };
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"type":"join","room":"test-room"}"#);

        let undo = ClientMessage::Undo.to_json().unwrap();
        assert_eq!(undo, r#"{"type":"undo"}"#);
    }

    #[test]
    fn test_action_message_nests_action() {
        let msg = ClientMessage::Action {
            action: Action::draw(Point::new(11.0, 10.5)),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "action");
        assert_eq!(value["action"]["type"], "draw");
        assert_eq!(value["action"]["y"], 10.5);
    }

    #[test]
    fn test_server_message_deserialize() {
        let json = r##"{"type":"joined","room":"test","peer_id":"p1","participants":["p1"],
            "log":[{"type":"start","x":10,"y":10,"color":"#ffffff","brushSize":5,"tool":"pen"}]}"##;
        match ServerMessage::from_json(json).unwrap() {
            ServerMessage::Joined {
                room,
                peer_id,
                log,
                limits,
                ..
            } => {
                assert_eq!(room, "test");
                assert_eq!(peer_id, "p1");
                assert_eq!(
                    log,
                    vec![Action::start(
                        Point::new(10.0, 10.0),
                        &BrushStyle::new("#ffffff", 5.0, Tool::Pen)
                    )]
                );
                assert_eq!(limits, Limits::default());
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_history_replaced_roundtrip() {
        let msg = ServerMessage::HistoryReplaced {
            log: vec![Action::clear()],
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains("history_replaced"));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_unknown_message_is_error() {
        assert!(matches!(
            ServerMessage::from_json(r#"{"type":"teleport"}"#),
            Err(ProtocolError::Json(_))
        ));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_url_validation() {
        assert!(validate_url("ws://localhost:3030/ws").is_ok());
        assert!(matches!(
            validate_url("http://localhost:3030/ws"),
            Err(ProtocolError::UnsupportedScheme(s)) if s == "http"
        ));
        assert!(matches!(validate_url("not a url"), Err(ProtocolError::InvalidUrl(_))));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_send_requires_connection() {
        let client = NativeWebSocket::new();
        assert!(matches!(client.send("{}"), Err(ProtocolError::NotConnected)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn test_refused_connection_reports_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut client = NativeWebSocket::new();
        client.connect(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(matches!(
            client.connect("ws://127.0.0.1:1/ws"),
            Err(ProtocolError::AlreadyConnected)
        ));

        let mut events = Vec::new();
        for _ in 0..200 {
            events.extend(client.poll_events());
            if !events.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(matches!(events.as_slice(), [ChannelEvent::Error { .. }]));
        assert_eq!(client.state(), ConnectionState::Error);
    }
}
