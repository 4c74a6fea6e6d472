//! Room directory and per-room actors.
//!
//! Each room is owned by one tokio task that processes commands in arrival
//! order from an unbounded queue. The directory maps room ids to the queue
//! handles and is only touched to find, create or retire a room.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use inkroom_core::Action;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::room::{Outbox, Room, RoomError, RoomSettings, Snapshot};

/// How often a command is re-sent after hitting a room that just shut down.
const MAX_ATTEMPTS: usize = 3;

enum RoomCommand {
    Join {
        peer_id: String,
        outbox: Outbox,
        reply: oneshot::Sender<Result<Snapshot, RoomError>>,
    },
    Leave {
        peer_id: String,
        done: oneshot::Sender<()>,
    },
    Append {
        from: String,
        action: Action,
    },
    AppendBatch {
        from: String,
        actions: Vec<Action>,
    },
    Undo,
    Clear,
    Snapshot {
        peer_id: String,
    },
    #[cfg(test)]
    Fail,
}

#[derive(Clone)]
struct RoomHandle {
    /// Distinguishes this actor from a later one serving the same room id.
    generation: u64,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

/// All live rooms of one server.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, RoomHandle>>,
    generation: Arc<AtomicU64>,
    settings: RoomSettings,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(RoomSettings::default())
    }
}

impl RoomRegistry {
    pub fn new(settings: RoomSettings) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            settings,
        }
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Join `room_id`, creating it if needed. The joiner's outbox receives
    /// `joined` before anything else from the room.
    pub async fn join(
        &self,
        room_id: &str,
        peer_id: &str,
        outbox: Outbox,
    ) -> Result<Snapshot, RoomError> {
        for _ in 0..MAX_ATTEMPTS {
            let handle = self.handle_for(room_id);
            let (reply, response) = oneshot::channel();
            let cmd = RoomCommand::Join {
                peer_id: peer_id.to_string(),
                outbox: outbox.clone(),
                reply,
            };
            if handle.tx.send(cmd).is_err() {
                self.prune(room_id, &handle);
                continue;
            }
            match response.await {
                Ok(Err(RoomError::Closed(_))) => {
                    debug!("Room {} closed during join, retrying", room_id);
                }
                Ok(result) => return result,
                Err(_) => {
                    warn!("Room {} dropped a join without answering", room_id);
                }
            }
        }
        Err(RoomError::Unavailable(room_id.to_string()))
    }

    /// Remove `peer_id` from `room_id`. The room goes away with its last participant.
    ///
    /// Resolves once the room has processed the leave, so nothing more from
    /// it reaches the peer's outbox afterwards.
    pub async fn leave(&self, room_id: &str, peer_id: &str) {
        let (done, left) = oneshot::channel();
        let cmd = RoomCommand::Leave {
            peer_id: peer_id.to_string(),
            done,
        };
        if self.dispatch(room_id, cmd, false) {
            // A dropped sender means the room shut down, which also ends delivery.
            let _ = left.await;
        }
    }

    /// Append one action and relay it to the other participants.
    pub fn append(&self, room_id: &str, from: &str, action: Action) {
        self.dispatch(
            room_id,
            RoomCommand::Append {
                from: from.to_string(),
                action,
            },
            true,
        );
    }

    /// Append a batch; draw runs are simplified before they are stored.
    pub fn append_batch(&self, room_id: &str, from: &str, actions: Vec<Action>) {
        self.dispatch(
            room_id,
            RoomCommand::AppendBatch {
                from: from.to_string(),
                actions,
            },
            true,
        );
    }

    pub fn undo(&self, room_id: &str) {
        self.dispatch(room_id, RoomCommand::Undo, false);
    }

    pub fn clear(&self, room_id: &str) {
        self.dispatch(room_id, RoomCommand::Clear, false);
    }

    /// Send the current log to `peer_id` only.
    pub fn snapshot(&self, room_id: &str, peer_id: &str) {
        self.dispatch(
            room_id,
            RoomCommand::Snapshot {
                peer_id: peer_id.to_string(),
            },
            false,
        );
    }

    /// Queue `cmd` on the room's actor. False if no actor took it.
    fn dispatch(&self, room_id: &str, mut cmd: RoomCommand, create: bool) -> bool {
        for _ in 0..MAX_ATTEMPTS {
            let handle = if create {
                self.handle_for(room_id)
            } else {
                match self.rooms.get(room_id) {
                    Some(handle) => handle.clone(),
                    None => return false,
                }
            };
            match handle.tx.send(cmd) {
                Ok(()) => return true,
                Err(mpsc::error::SendError(returned)) => {
                    self.prune(room_id, &handle);
                    cmd = returned;
                }
            }
        }
        warn!("Dropping command for unavailable room {}", room_id);
        false
    }

    /// Find the live handle for `room_id`, spawning its actor on first use.
    fn handle_for(&self, room_id: &str) -> RoomHandle {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| self.spawn_room(room_id))
            .clone()
    }

    fn spawn_room(&self, room_id: &str) -> RoomHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let room = Room::new(room_id, self.settings);
        tokio::spawn(run_room(room, generation, rx, Arc::clone(&self.rooms)));
        info!("Created room {}", room_id);
        RoomHandle { generation, tx }
    }

    /// Forget a dead handle unless it was already replaced.
    fn prune(&self, room_id: &str, handle: &RoomHandle) {
        if self
            .rooms
            .remove_if(room_id, |_, current| current.generation == handle.generation)
            .is_some()
        {
            warn!("Pruned dead room {}", room_id);
        }
    }
}

async fn run_room(
    mut room: Room,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<RoomCommand>,
    rooms: Arc<DashMap<String, RoomHandle>>,
) {
    while let Some(cmd) = rx.recv().await {
        // Panics stay inside the command that raised them.
        if catch_unwind(AssertUnwindSafe(|| apply(&mut room, cmd))).is_err() {
            error!("Room {} failed to process a command", room.id());
        }
        if room.is_empty() {
            break;
        }
    }

    rooms.remove_if(room.id(), |_, current| current.generation == generation);
    rx.close();
    // Commands that raced the teardown
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join { reply, .. } => {
                let _ = reply.send(Err(RoomError::Closed(room.id().to_string())));
            }
            _ => debug!("Discarding command for closed room {}", room.id()),
        }
    }
    info!("Room {} destroyed", room.id());
}

fn apply(room: &mut Room, cmd: RoomCommand) {
    match cmd {
        RoomCommand::Join {
            peer_id,
            outbox,
            reply,
        } => {
            let snapshot = room.join(&peer_id, outbox);
            let _ = reply.send(Ok(snapshot));
        }
        RoomCommand::Leave { peer_id, done } => {
            room.leave(&peer_id);
            let _ = done.send(());
        }
        RoomCommand::Append { from, action } => room.append(&from, action),
        RoomCommand::AppendBatch { from, actions } => {
            if let Err(e) = room.append_batch(&from, actions) {
                room.reject(&from, &e);
            }
        }
        RoomCommand::Undo => {
            room.undo();
        }
        RoomCommand::Clear => {
            room.clear();
        }
        RoomCommand::Snapshot { peer_id } => room.snapshot(&peer_id),
        #[cfg(test)]
        RoomCommand::Fail => panic!("room {} failed on purpose", room.id()),
    }
}
