use serde::{Deserialize, Serialize};

/// Identity of one WebSocket connection for the lifetime of its socket.
pub type ConnectionId = u64;

/// Longest room key accepted from a client.
pub const MAX_ROOM_KEY_LEN: usize = 128;

/// Role held by a participant in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// First connection to join the room.
    Mentor,
    /// Everyone who joins after the mentor.
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mentor => "mentor",
            Self::Student => "student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room keys are externally supplied (usually an exercise id), so only
/// length and control characters are checked.
pub fn is_valid_room_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_ROOM_KEY_LEN && !key.chars().any(char::is_control)
}
