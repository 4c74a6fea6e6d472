//! State of one room: the authoritative action log and its participants.
//!
//! A `Room` is owned by exactly one actor task (see [`crate::registry`]), so
//! nothing here locks. Every broadcast is pushed onto the participants'
//! outboxes while the room is being mutated, which keeps delivery order equal
//! to log order.

use std::collections::BTreeMap;

use inkroom_core::{Action, Limits, ServerMessage, compact_batch};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outbound queue of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Room errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    /// The room was torn down while the command was queued.
    #[error("room {0} is closed")]
    Closed(String),
    #[error("a batch may not contain clear; send clear on its own")]
    ClearInBatch,
    #[error("room {0} is unavailable")]
    Unavailable(String),
}

/// Per-room tunables shared by every room of a server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomSettings {
    pub limits: Limits,
    /// Simplification tolerance for batched draw runs.
    pub epsilon: f64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            epsilon: inkroom_core::DEFAULT_EPSILON,
        }
    }
}

/// Room contents handed to a joiner.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub log: Vec<Action>,
    pub participants: Vec<String>,
}

pub struct Room {
    id: String,
    log: Vec<Action>,
    participants: BTreeMap<String, Outbox>,
    settings: RoomSettings,
}

impl Room {
    pub fn new(id: impl Into<String>, settings: RoomSettings) -> Self {
        Self {
            id: id.into(),
            log: Vec::new(),
            participants: BTreeMap::new(),
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn log(&self) -> &[Action] {
        &self.log
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }

    /// Register `peer_id` and send it the full log.
    ///
    /// Joining again with the same id swaps the outbox and resends the log
    /// without announcing the peer twice.
    pub fn join(&mut self, peer_id: &str, outbox: Outbox) -> Snapshot {
        let rejoin = self.participants.insert(peer_id.to_string(), outbox).is_some();
        if !rejoin {
            self.broadcast_except(
                peer_id,
                ServerMessage::PeerJoined {
                    peer_id: peer_id.to_string(),
                },
            );
        }

        let snapshot = Snapshot {
            log: self.log.clone(),
            participants: self.participant_ids(),
        };
        self.send_to(
            peer_id,
            ServerMessage::Joined {
                room: self.id.clone(),
                peer_id: peer_id.to_string(),
                participants: snapshot.participants.clone(),
                log: snapshot.log.clone(),
                limits: self.settings.limits,
            },
        );
        info!(
            "Peer {} joined room {} ({} participants, {} actions)",
            peer_id,
            self.id,
            self.participants.len(),
            self.log.len()
        );
        snapshot
    }

    /// Remove `peer_id`. Returns whether the room is now empty.
    pub fn leave(&mut self, peer_id: &str) -> bool {
        if self.participants.remove(peer_id).is_some() {
            info!("Peer {} left room {}", peer_id, self.id);
            self.broadcast_except(
                peer_id,
                ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                },
            );
        }
        self.is_empty()
    }

    /// Append one action from `from` and relay it to everyone else.
    ///
    /// A `Clear` arriving as a plain action is handled as [`Room::clear`].
    pub fn append(&mut self, from: &str, mut action: Action) {
        if action.is_clear() {
            self.clear();
            return;
        }
        action.set_peer(from);
        self.log.push(action.clone());
        self.enforce_bound();
        self.broadcast_except(
            from,
            ServerMessage::Action {
                from: from.to_string(),
                action,
            },
        );
    }

    /// Append a batch, simplifying its draw runs first. Returns the number of
    /// actions that made it into the log.
    pub fn append_batch(&mut self, from: &str, actions: Vec<Action>) -> Result<usize, RoomError> {
        if actions.iter().any(Action::is_clear) {
            warn!("Rejecting batch with clear from {} in room {}", from, self.id);
            return Err(RoomError::ClearInBatch);
        }
        if actions.is_empty() {
            return Ok(0);
        }

        let stamped: Vec<Action> = actions
            .into_iter()
            .map(|action| action.with_peer(from))
            .collect();
        let compacted = compact_batch(stamped, self.settings.epsilon);
        let appended = compacted.len();

        self.log.extend(compacted.iter().cloned());
        self.enforce_bound();
        self.broadcast_except(
            from,
            ServerMessage::Batch {
                from: from.to_string(),
                actions: compacted,
            },
        );
        Ok(appended)
    }

    /// Drop the last action. No-op on an empty log.
    pub fn undo(&mut self) -> bool {
        if self.log.pop().is_none() {
            return false;
        }
        debug!("Undo in room {}, {} actions left", self.id, self.log.len());
        self.broadcast_history();
        true
    }

    /// Replace the log with a single `Clear`. No-op on an empty log.
    pub fn clear(&mut self) -> bool {
        if self.log.is_empty() {
            return false;
        }
        self.log = vec![Action::clear()];
        debug!("Cleared room {}", self.id);
        self.broadcast_history();
        true
    }

    /// Send the current log to `peer_id` only.
    pub fn snapshot(&self, peer_id: &str) {
        self.send_to(
            peer_id,
            ServerMessage::Snapshot {
                log: self.log.clone(),
            },
        );
    }

    /// Tell `peer_id` something went wrong with its request.
    pub fn reject(&self, peer_id: &str, error: &RoomError) {
        self.send_to(
            peer_id,
            ServerMessage::Error {
                message: error.to_string(),
            },
        );
    }

    fn enforce_bound(&mut self) {
        let limits = self.settings.limits;
        if self.log.len() > limits.max_log_size {
            let log = std::mem::take(&mut self.log);
            self.log = limits.trim(log);
            info!(
                "Trimmed room {} log to its last {} actions",
                self.id,
                self.log.len()
            );
        }
    }

    fn broadcast_history(&self) {
        self.broadcast(ServerMessage::HistoryReplaced {
            log: self.log.clone(),
        });
    }

    fn send_to(&self, peer_id: &str, msg: ServerMessage) {
        if let Some(outbox) = self.participants.get(peer_id) {
            // A closed outbox means the connection is going away and will leave.
            let _ = outbox.send(msg);
        }
    }

    fn broadcast(&self, msg: ServerMessage) {
        for outbox in self.participants.values() {
            let _ = outbox.send(msg.clone());
        }
    }

    fn broadcast_except(&self, except: &str, msg: ServerMessage) {
        for (peer_id, outbox) in &self.participants {
            if peer_id != except {
                let _ = outbox.send(msg.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkroom_core::{BrushStyle, Point, Tool};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn peer(room: &mut Room, id: &str) -> UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        room.join(id, tx);
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn start(x: f64, y: f64) -> Action {
        Action::start(Point::new(x, y), &BrushStyle::new("#ffffff", 5.0, Tool::Pen))
    }

    fn draw(x: f64, y: f64) -> Action {
        Action::draw(Point::new(x, y))
    }

    #[test]
    fn test_join_returns_log_and_announces() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        room.append("a", start(1.0, 1.0));

        let (tx, mut b) = mpsc::unbounded_channel();
        let snapshot = room.join("b", tx);
        assert_eq!(snapshot.log.len(), 1);
        assert_eq!(snapshot.participants, vec!["a".to_string(), "b".to_string()]);

        let joined = drain(&mut b);
        assert!(matches!(&joined[0], ServerMessage::Joined { log, .. } if log.len() == 1));
        let seen_by_a = drain(&mut a);
        assert!(seen_by_a.contains(&ServerMessage::PeerJoined {
            peer_id: "b".into()
        }));
    }

    #[test]
    fn test_append_excludes_sender_and_stamps_peer() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        let mut b = peer(&mut room, "b");
        drain(&mut a);
        drain(&mut b);

        room.append("a", start(10.0, 10.0).with_peer("spoofed"));

        assert!(drain(&mut a).is_empty());
        let expected = start(10.0, 10.0).with_peer("a");
        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::Action {
                from: "a".into(),
                action: expected.clone()
            }]
        );
        assert_eq!(room.log(), &[expected]);
    }

    #[test]
    fn test_order_preserved() {
        let mut room = Room::new("r", RoomSettings::default());
        let _a = peer(&mut room, "a");
        room.append("a", start(0.0, 0.0));
        room.append("a", draw(1.0, 0.0));
        room.append("a", draw(2.0, 0.0));
        let points: Vec<_> = room.log().iter().filter_map(Action::point).map(|p| p.x).collect();
        assert_eq!(points, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_undo_broadcasts_new_log_to_everyone() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        let mut b = peer(&mut room, "b");
        room.append("a", start(0.0, 0.0));
        room.append("a", draw(1.0, 1.0));
        room.append("a", draw(2.0, 2.0));
        drain(&mut a);
        drain(&mut b);

        assert!(room.undo());
        assert_eq!(room.log().len(), 2);
        assert!(room.log()[1].point().is_some_and(|p| p.x == 1.0));

        let expected = ServerMessage::HistoryReplaced {
            log: room.log().to_vec(),
        };
        assert_eq!(drain(&mut a), vec![expected.clone()]);
        assert_eq!(drain(&mut b), vec![expected]);
    }

    #[test]
    fn test_undo_and_clear_on_empty_log_are_noops() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        drain(&mut a);
        assert!(!room.undo());
        assert!(!room.clear());
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn test_clear_replaces_log() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        room.append("a", start(0.0, 0.0));
        room.append("a", draw(1.0, 1.0));
        drain(&mut a);

        assert!(room.clear());
        assert_eq!(room.log(), &[Action::clear()]);
        assert_eq!(
            drain(&mut a),
            vec![ServerMessage::HistoryReplaced {
                log: vec![Action::clear()]
            }]
        );
    }

    #[test]
    fn test_clear_as_action_replaces_log() {
        let mut room = Room::new("r", RoomSettings::default());
        let _a = peer(&mut room, "a");
        room.append("a", start(0.0, 0.0));
        room.append("a", Action::clear());
        assert_eq!(room.log(), &[Action::clear()]);
    }

    #[test]
    fn test_trim_bound() {
        let settings = RoomSettings {
            limits: Limits::new(10, 4).unwrap(),
            ..RoomSettings::default()
        };
        let mut room = Room::new("r", settings);
        let _a = peer(&mut room, "a");
        room.append("a", start(0.0, 0.0));
        for i in 1..=10 {
            room.append("a", draw(i as f64, 0.0));
        }
        assert_eq!(room.log().len(), 4);
        assert!(room.log()[3].point().is_some_and(|p| p.x == 10.0));
    }

    #[test]
    fn test_batch_is_compacted_and_relayed_once() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        let mut b = peer(&mut room, "b");
        drain(&mut a);
        drain(&mut b);

        let mut batch = vec![start(0.0, 0.0)];
        batch.extend((1..=20).map(|i| draw(i as f64, 0.0)));
        assert_eq!(room.append_batch("a", batch), Ok(3));

        let relayed = drain(&mut b);
        assert_eq!(relayed.len(), 1);
        match &relayed[0] {
            ServerMessage::Batch { from, actions } => {
                assert_eq!(from, "a");
                assert_eq!(actions.as_slice(), room.log());
                assert!(actions.iter().all(|a| a.peer() == Some("a")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn test_batch_with_clear_rejected() {
        let mut room = Room::new("r", RoomSettings::default());
        let _a = peer(&mut room, "a");
        let batch = vec![start(0.0, 0.0), Action::clear()];
        assert_eq!(room.append_batch("a", batch), Err(RoomError::ClearInBatch));
        assert!(room.log().is_empty());
    }

    #[test]
    fn test_snapshot_goes_to_requester_only() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        let mut b = peer(&mut room, "b");
        room.append("a", start(0.0, 0.0));
        drain(&mut a);
        drain(&mut b);

        room.snapshot("b");
        assert!(drain(&mut a).is_empty());
        assert_eq!(
            drain(&mut b),
            vec![ServerMessage::Snapshot {
                log: room.log().to_vec()
            }]
        );
    }

    #[test]
    fn test_leave_reports_empty() {
        let mut room = Room::new("r", RoomSettings::default());
        let mut a = peer(&mut room, "a");
        let _b = peer(&mut room, "b");
        drain(&mut a);

        assert!(!room.leave("b"));
        assert_eq!(
            drain(&mut a),
            vec![ServerMessage::PeerLeft {
                peer_id: "b".into()
            }]
        );
        assert!(room.leave("a"));
        assert!(room.leave("ghost"));
    }
}
