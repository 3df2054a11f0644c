use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use codeshare_core::net::messages::{
    ClientMessage, CodeBroadcastMsg, EmptyMsg, RoleAssignedMsg, RoomStateMsg, ServerMessage,
    StudentCountMsg,
};
use codeshare_core::room::{ConnectionId, Role};
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionHandle, OutboundSender};
use crate::dispatch;
use crate::reconcile::reconcile_departure;
use crate::registry::{RoomRegistry, lock_session};
use crate::session::{Session, SessionError};

/// Supplies the text a room starts from before anyone has edited it.
pub trait StarterSource: Send + Sync {
    fn starter_code(&self, room_key: &str) -> Option<String>;
}

/// Receives accepted snapshots. Best-effort: implementations log their own
/// failures.
pub trait SnapshotSink: Send + Sync {
    fn persist(&self, room_key: &str, code: &str);
}

/// A connection's membership in a room, owned by the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub room_key: String,
    pub role: Role,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("malformed event: {0}")]
    Malformed(String),
    #[error("not a member of room {0}")]
    UnknownRoom(String),
    #[error("connection is closing")]
    Closing,
}

/// Applies client events to rooms.
pub struct Coordinator {
    registry: RoomRegistry,
    starters: Arc<dyn StarterSource>,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    /// Sequence of the newest snapshot written per room key. Holding the
    /// lock serializes writes.
    written: Arc<Mutex<HashMap<String, u64>>>,
    next_write_seq: AtomicU64,
    next_connection_id: AtomicU64,
    max_code_bytes: usize,
}

impl Coordinator {
    /// `snapshots` of `None` disables persistence.
    pub fn new(
        starters: Arc<dyn StarterSource>,
        snapshots: Option<Arc<dyn SnapshotSink>>,
        max_code_bytes: usize,
    ) -> Self {
        Self {
            registry: RoomRegistry::new(),
            starters,
            snapshots,
            written: Arc::new(Mutex::new(HashMap::new())),
            next_write_seq: AtomicU64::new(0),
            next_connection_id: AtomicU64::new(1),
            max_code_bytes,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Allocate an identity for a new socket.
    pub fn connect(&self, tx: OutboundSender, shutdown: CancellationToken) -> ConnectionHandle {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        ConnectionHandle::new(id, tx, shutdown)
    }

    /// Route one decoded event from `handle`. `participant` is the
    /// connection's current membership and is updated by joins and leaves.
    /// A connection the server has started closing applies nothing more.
    pub fn handle_event(
        &self,
        handle: &ConnectionHandle,
        participant: &mut Option<Participant>,
        msg: ClientMessage,
    ) -> Result<(), CoordinatorError> {
        if handle.is_closing() {
            return Err(CoordinatorError::Closing);
        }
        match msg {
            ClientMessage::JoinRoom(join) => {
                self.join(handle, participant, &join.room_key);
                Ok(())
            },
            ClientMessage::LeaveRoom(leave) => self.leave(participant, &leave.room_key),
            ClientMessage::CodeUpdate(update) => {
                self.code_update(participant.as_ref(), &update.room_key, update.code)
            },
            ClientMessage::SolutionSuccess(success) => {
                self.solution_success(participant.as_ref(), &success.room_key)
            },
        }
    }

    /// Join `room_key`, leaving any other room first. Joining the room the
    /// connection is already in replays its role and state.
    pub fn join(
        &self,
        handle: &ConnectionHandle,
        participant: &mut Option<Participant>,
        room_key: &str,
    ) -> Role {
        if let Some(previous) = participant.take_if(|p| p.room_key != room_key) {
            reconcile_departure(&self.registry, previous);
        }

        let role = loop {
            let (shared, created) = self.registry.get_or_create(room_key);
            let mut session = lock_session(&shared);
            let (role, newly_joined) = match session.join(handle.clone()) {
                Ok(role) => (role, true),
                Err(SessionError::AlreadyJoined(role)) => (role, false),
                // Torn down between lookup and lock
                Err(SessionError::Closed) => continue,
            };
            if created {
                tracing::info!(room = room_key, "Room created");
            }
            self.announce_join(&session, handle, role, newly_joined);
            break role;
        };

        tracing::info!(
            connection_id = handle.id(),
            room = room_key,
            role = %role,
            "Joined room"
        );
        *participant = Some(Participant {
            connection_id: handle.id(),
            room_key: room_key.to_string(),
            role,
        });
        role
    }

    fn announce_join(
        &self,
        session: &Session,
        handle: &ConnectionHandle,
        role: Role,
        newly_joined: bool,
    ) {
        dispatch::send_to_connection(handle, ServerMessage::RoleAssigned(RoleAssignedMsg { role }));
        if role == Role::Mentor {
            return;
        }

        let student_count = session.student_count();
        let current_code = match session.snapshot() {
            Some(code) => code.to_string(),
            None => self
                .starters
                .starter_code(session.key())
                .unwrap_or_default(),
        };
        dispatch::send_to_connection(
            handle,
            ServerMessage::RoomState(RoomStateMsg {
                current_code,
                student_count,
            }),
        );
        if newly_joined {
            dispatch::send_to_room(
                session,
                ServerMessage::StudentCount(StudentCountMsg {
                    count: student_count,
                }),
                Some(handle.id()),
            );
        }
    }

    /// Explicit leave. The socket stays open and may join again.
    pub fn leave(
        &self,
        participant: &mut Option<Participant>,
        room_key: &str,
    ) -> Result<(), CoordinatorError> {
        let Some(current) = participant.take_if(|p| p.room_key == room_key) else {
            return Err(CoordinatorError::UnknownRoom(room_key.to_string()));
        };
        reconcile_departure(&self.registry, current);
        Ok(())
    }

    /// Replace the room's snapshot and relay it to everyone but the sender.
    pub fn code_update(
        &self,
        participant: Option<&Participant>,
        room_key: &str,
        code: String,
    ) -> Result<(), CoordinatorError> {
        if code.len() > self.max_code_bytes {
            return Err(CoordinatorError::Malformed(format!(
                "code is {} bytes, limit is {}",
                code.len(),
                self.max_code_bytes
            )));
        }
        let sender = self.member_of(participant, room_key)?;
        let shared = self
            .registry
            .get(room_key)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_key.to_string()))?;

        let pending_write = {
            let mut session = lock_session(&shared);
            if session.role_of(sender).is_none() {
                return Err(CoordinatorError::UnknownRoom(room_key.to_string()));
            }
            session.set_snapshot(code.clone());
            // Numbered under the room lock so sequence order is snapshot order
            let pending_write = self.snapshots.as_ref().map(|sink| {
                let seq = self.next_write_seq.fetch_add(1, Ordering::Relaxed);
                (Arc::clone(sink), seq, code.clone())
            });
            dispatch::send_to_room(
                &session,
                ServerMessage::CodeUpdate(CodeBroadcastMsg { code }),
                Some(sender),
            );
            pending_write
        };

        if let Some((sink, seq, code)) = pending_write {
            let written = Arc::clone(&self.written);
            let room_key = room_key.to_string();
            tokio::task::spawn_blocking(move || {
                write_snapshot(&written, sink.as_ref(), room_key, seq, &code);
            });
        }
        Ok(())
    }

    /// Relay a solved notification to the whole room, sender included.
    pub fn solution_success(
        &self,
        participant: Option<&Participant>,
        room_key: &str,
    ) -> Result<(), CoordinatorError> {
        let sender = self.member_of(participant, room_key)?;
        let shared = self
            .registry
            .get(room_key)
            .ok_or_else(|| CoordinatorError::UnknownRoom(room_key.to_string()))?;
        let session = lock_session(&shared);
        if session.role_of(sender).is_none() {
            return Err(CoordinatorError::UnknownRoom(room_key.to_string()));
        }
        dispatch::send_to_room(
            &session,
            ServerMessage::SolutionSuccess(EmptyMsg::default()),
            None,
        );
        tracing::info!(connection_id = sender, room = room_key, "Solution reported");
        Ok(())
    }

    /// Socket is gone. Safe to call more than once.
    pub fn disconnect(&self, participant: &mut Option<Participant>) {
        if let Some(current) = participant.take() {
            reconcile_departure(&self.registry, current);
        }
    }

    fn member_of(
        &self,
        participant: Option<&Participant>,
        room_key: &str,
    ) -> Result<ConnectionId, CoordinatorError> {
        match participant {
            Some(p) if p.room_key == room_key => Ok(p.connection_id),
            _ => Err(CoordinatorError::UnknownRoom(room_key.to_string())),
        }
    }
}

/// Persist `code` unless a newer snapshot for the same key was already
/// written. Returns true if the sink was called.
fn write_snapshot(
    written: &Mutex<HashMap<String, u64>>,
    sink: &dyn SnapshotSink,
    room_key: String,
    seq: u64,
    code: &str,
) -> bool {
    let mut written = written.lock().unwrap_or_else(PoisonError::into_inner);
    if written.get(&room_key).is_some_and(|&last| last > seq) {
        tracing::debug!(room = %room_key, seq, "Skipping stale snapshot write");
        return false;
    }
    sink.persist(&room_key, code);
    written.insert(room_key, seq);
    true
}
