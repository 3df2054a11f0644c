use codeshare_core::room::{ConnectionId, Role};

use crate::connection::ConnectionHandle;

/// Lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, nobody has joined yet.
    Unassigned,
    /// Has a mentor.
    Active,
    /// Torn down. Never reopened; the registry replaces it.
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("connection already joined as {0}")]
    AlreadyJoined(Role),
}

/// Outcome of removing a connection from a session.
#[derive(Debug)]
pub enum Departure {
    NotMember,
    Student { remaining: usize },
    /// The session is now closed. `students` are the connections that were
    /// still attached and must be told and disconnected.
    Mentor { students: Vec<ConnectionHandle> },
}

/// Membership and shared buffer of one room.
#[derive(Debug)]
pub struct Session {
    key: String,
    phase: SessionPhase,
    mentor: Option<ConnectionHandle>,
    /// Join order.
    students: Vec<ConnectionHandle>,
    snapshot: Option<String>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            phase: SessionPhase::Unassigned,
            mentor: None,
            students: Vec::new(),
            snapshot: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_closed(&self) -> bool {
        self.phase == SessionPhase::Closed
    }

    /// Add a connection. The first joiner of a fresh session becomes mentor,
    /// everyone after is a student.
    pub fn join(&mut self, handle: ConnectionHandle) -> Result<Role, SessionError> {
        if let Some(role) = self.role_of(handle.id()) {
            return Err(SessionError::AlreadyJoined(role));
        }
        match self.phase {
            SessionPhase::Closed => Err(SessionError::Closed),
            SessionPhase::Unassigned => {
                self.mentor = Some(handle);
                self.phase = SessionPhase::Active;
                Ok(Role::Mentor)
            },
            SessionPhase::Active => {
                self.students.push(handle);
                Ok(Role::Student)
            },
        }
    }

    /// Remove a connection. A departing mentor closes the session and hands
    /// back the students still attached.
    pub fn leave(&mut self, id: ConnectionId) -> Departure {
        if self.mentor.as_ref().is_some_and(|m| m.id() == id) {
            self.mentor = None;
            return Departure::Mentor {
                students: self.close(),
            };
        }
        let Some(pos) = self.students.iter().position(|s| s.id() == id) else {
            return Departure::NotMember;
        };
        self.students.remove(pos);
        Departure::Student {
            remaining: self.students.len(),
        }
    }

    /// Mark closed and detach every member.
    pub fn close(&mut self) -> Vec<ConnectionHandle> {
        self.phase = SessionPhase::Closed;
        let mut detached: Vec<ConnectionHandle> = self.mentor.take().into_iter().collect();
        detached.append(&mut self.students);
        detached
    }

    pub fn role_of(&self, id: ConnectionId) -> Option<Role> {
        if self.mentor.as_ref().is_some_and(|m| m.id() == id) {
            Some(Role::Mentor)
        } else if self.students.iter().any(|s| s.id() == id) {
            Some(Role::Student)
        } else {
            None
        }
    }

    pub fn mentor_id(&self) -> Option<ConnectionId> {
        self.mentor.as_ref().map(ConnectionHandle::id)
    }

    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    pub fn member_count(&self) -> usize {
        self.students.len() + usize::from(self.mentor.is_some())
    }

    /// Mentor first, then students in join order.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.mentor.iter().chain(self.students.iter())
    }

    pub fn snapshot(&self) -> Option<&str> {
        self.snapshot.as_deref()
    }

    /// Last writer wins.
    pub fn set_snapshot(&mut self, code: String) {
        self.snapshot = Some(code);
    }
}
