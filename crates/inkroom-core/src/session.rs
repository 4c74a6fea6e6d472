//! Client-side drawing session.
//!
//! Ties capture, the local log mirror and replay to the action channel.
//! Outgoing messages are queued and drained by the transport with
//! [`DrawingSession::take_outgoing`], so drawing never waits on the network.

use crate::action::{Action, BrushStyle, Point};
use crate::capture::{CaptureConfig, CaptureError, StrokeCapture};
use crate::compact::Limits;
use crate::replay::{Replayer, Surface};
use crate::sync::{ClientMessage, ServerMessage};

/// What a handled server message did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Joined a room and replayed its log.
    Joined {
        room: String,
        peer_id: String,
        peer_count: usize,
    },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    /// Remote actions were drawn incrementally.
    ActionsApplied { from: String, count: usize },
    /// The log was replaced and fully replayed.
    HistoryReplaced { len: usize },
    Error { message: String },
}

/// Local view of one shared canvas.
pub struct DrawingSession {
    capture: StrokeCapture,
    replayer: Replayer,
    /// Mirror of the room log.
    log: Vec<Action>,
    limits: Limits,
    /// Peer id assigned by the server.
    peer_id: Option<String>,
    /// Current room ID (if joined).
    current_room: Option<String>,
    /// Coalesce consecutive actions into one batch when draining.
    batch_actions: bool,
    /// Pending outgoing messages.
    outgoing: Vec<ClientMessage>,
}

impl Default for DrawingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingSession {
    pub fn new() -> Self {
        Self {
            capture: StrokeCapture::new(),
            replayer: Replayer::default(),
            log: Vec::new(),
            limits: Limits::default(),
            peer_id: None,
            current_room: None,
            batch_actions: false,
            outgoing: Vec::new(),
        }
    }

    pub fn with_capture(config: CaptureConfig) -> Result<Self, CaptureError> {
        Ok(Self {
            capture: StrokeCapture::with_config(config)?,
            ..Self::new()
        })
    }

    /// Replace the replayer, e.g. to change the background.
    pub fn with_replayer(mut self, replayer: Replayer) -> Self {
        self.replayer = replayer;
        self
    }

    /// Send queued actions as server-compacted batches.
    ///
    /// The server stores the simplified batch but never echoes it to the
    /// sender, so the local mirror keeps the raw draws. Its length and trim
    /// point differ from the room's until the next history replacement or
    /// [`resync`](Self::resync).
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batch_actions = enabled;
        self
    }

    pub fn log(&self) -> &[Action] {
        &self.log
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.current_room.is_some()
    }

    pub fn set_brush(&mut self, style: BrushStyle) {
        self.capture.set_style(style);
    }

    // --- Room/Connection Management ---

    /// Request to join a room. Queues the join message.
    pub fn join_room(&mut self, room: &str) {
        self.outgoing.push(ClientMessage::Join {
            room: room.to_string(),
        });
    }

    /// Leave the current room and forget its log.
    pub fn leave_room(&mut self) {
        if self.current_room.take().is_some() {
            self.outgoing.push(ClientMessage::Leave);
        }
        self.peer_id = None;
        self.log.clear();
        self.capture.pointer_up();
    }

    /// The transport dropped. Local state is kept until the next join replaces it.
    pub fn connection_lost(&mut self) {
        self.current_room = None;
        self.outgoing.clear();
        self.capture.pointer_up();
    }

    // --- Local drawing ---

    fn commit_local<S: Surface + ?Sized>(&mut self, surface: &mut S, mut action: Action) {
        if let Some(peer) = &self.peer_id {
            action.set_peer(peer);
        }
        self.replayer.apply(surface, &action);
        if self.current_room.is_some() {
            self.outgoing.push(ClientMessage::Action {
                action: action.clone(),
            });
        }
        self.push_log(action);
    }

    /// Pointer pressed: start a stroke and draw its first dot.
    pub fn pointer_down<S: Surface + ?Sized>(&mut self, surface: &mut S, position: Point) {
        let start = self.capture.pointer_down(position);
        self.commit_local(surface, start);
    }

    /// Pointer moved: emit and draw one smoothed segment.
    pub fn pointer_move<S: Surface + ?Sized>(&mut self, surface: &mut S, position: Point) {
        if let Some(draw) = self.capture.pointer_move(position) {
            self.commit_local(surface, draw);
        }
    }

    /// Pointer released.
    pub fn pointer_up(&mut self) {
        self.capture.pointer_up();
    }

    /// Ask the server to drop the last log entry. The result arrives as a
    /// history replacement.
    pub fn undo(&mut self) {
        if self.current_room.is_some() {
            self.outgoing.push(ClientMessage::Undo);
        }
    }

    /// Ask the server to clear the canvas for everyone.
    pub fn clear(&mut self) {
        if self.current_room.is_some() {
            self.outgoing.push(ClientMessage::Clear);
        }
    }

    /// The surface changed size. Replays locally right away and asks the
    /// server for an authoritative snapshot.
    pub fn resize<S: Surface + ?Sized>(&mut self, surface: &mut S, width: u32, height: u32) -> bool {
        if !surface.resize(width, height) {
            return false;
        }
        self.replayer.render(surface, &self.log);
        if self.current_room.is_some() {
            self.outgoing.push(ClientMessage::Snapshot);
        }
        true
    }

    /// Ask for the room's log to replace the local mirror.
    pub fn resync(&mut self) {
        if self.current_room.is_some() {
            self.outgoing.push(ClientMessage::Snapshot);
        }
    }

    /// Full replay of the local mirror.
    pub fn redraw<S: Surface + ?Sized>(&mut self, surface: &mut S) {
        self.replayer.render(surface, &self.log);
    }

    fn push_log(&mut self, action: Action) {
        self.log.push(action);
        if self.log.len() > self.limits.max_log_size {
            let log = std::mem::take(&mut self.log);
            self.log = self.limits.trim(log);
        }
    }

    fn replace_log<S: Surface + ?Sized>(&mut self, surface: &mut S, log: Vec<Action>) {
        self.log = self.limits.trim(log);
        self.replayer.render(surface, &self.log);
    }

    // --- Outgoing ---

    /// Take pending outgoing messages as JSON frames (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        let messages = std::mem::take(&mut self.outgoing);
        let messages = if self.batch_actions {
            coalesce_actions(messages)
        } else {
            messages
        };
        messages
            .iter()
            .filter_map(|msg| match msg.to_json() {
                Ok(json) => Some(json),
                Err(e) => {
                    log::error!("Failed to encode {:?}: {}", msg, e);
                    None
                }
            })
            .collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    // --- Incoming Message Handling ---

    /// Decode and handle one JSON frame.
    pub fn handle_message<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        json: &str,
    ) -> Option<SessionEvent> {
        match ServerMessage::from_json(json) {
            Ok(msg) => Some(self.handle_server_message(surface, msg)),
            Err(e) => {
                log::warn!("Ignoring server frame: {}", e);
                None
            }
        }
    }

    /// Handle a decoded server message.
    pub fn handle_server_message<S: Surface + ?Sized>(
        &mut self,
        surface: &mut S,
        msg: ServerMessage,
    ) -> SessionEvent {
        match msg {
            ServerMessage::Joined {
                room,
                peer_id,
                participants,
                log,
                limits,
            } => {
                self.current_room = Some(room.clone());
                self.peer_id = Some(peer_id.clone());
                self.limits = limits;
                self.replace_log(surface, log);
                log::info!("Joined room {} as {} ({} actions)", room, peer_id, self.log.len());
                SessionEvent::Joined {
                    room,
                    peer_id,
                    peer_count: participants.len(),
                }
            }
            ServerMessage::PeerJoined { peer_id } => SessionEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SessionEvent::PeerLeft { peer_id },
            ServerMessage::Action { from, action } => {
                self.apply_remote(surface, vec![action]);
                SessionEvent::ActionsApplied { from, count: 1 }
            }
            ServerMessage::Batch { from, actions } => {
                let count = actions.len();
                self.apply_remote(surface, actions);
                SessionEvent::ActionsApplied { from, count }
            }
            ServerMessage::HistoryReplaced { log } | ServerMessage::Snapshot { log } => {
                let len = log.len();
                self.replace_log(surface, log);
                SessionEvent::HistoryReplaced { len }
            }
            ServerMessage::Error { message } => {
                log::warn!("Server error: {}", message);
                SessionEvent::Error { message }
            }
        }
    }

    fn apply_remote<S: Surface + ?Sized>(&mut self, surface: &mut S, actions: Vec<Action>) {
        for action in actions {
            self.replayer.apply(surface, &action);
            self.push_log(action);
        }
    }
}

/// Merge runs of consecutive single-action messages into batches.
fn coalesce_actions(messages: Vec<ClientMessage>) -> Vec<ClientMessage> {
    let mut out: Vec<ClientMessage> = Vec::with_capacity(messages.len());
    for msg in messages {
        let ClientMessage::Action { action } = msg else {
            out.push(msg);
            continue;
        };
        match out.last_mut() {
            Some(ClientMessage::Batch { actions }) => actions.push(action),
            Some(last @ ClientMessage::Action { .. }) => {
                let previous = std::mem::replace(last, ClientMessage::Batch { actions: Vec::new() });
                if let (ClientMessage::Action { action: first }, ClientMessage::Batch { actions }) =
                    (previous, last)
                {
                    actions.push(first);
                    actions.push(action);
                }
            }
            _ => out.push(ClientMessage::Action { action }),
        }
    }
    out
}
