use serde::{Deserialize, Serialize};

use crate::room::Role;

// Every frame is an envelope `{"event": "<name>", "data": {...}}`. Event
// names are kebab-case and payload fields camelCase, so browser clients can
// keep their socket-style handlers keyed by event name.

/// Events a client sends to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinRoom(JoinRoomMsg),
    LeaveRoom(LeaveRoomMsg),
    CodeUpdate(CodeUpdateMsg),
    SolutionSuccess(SolutionSuccessMsg),
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom(_) => "leave-room",
            Self::CodeUpdate(_) => "code-update",
            Self::SolutionSuccess(_) => "solution-success",
        }
    }

    /// Room the event refers to.
    pub fn room_key(&self) -> &str {
        match self {
            Self::JoinRoom(m) => &m.room_key,
            Self::LeaveRoom(m) => &m.room_key,
            Self::CodeUpdate(m) => &m.room_key,
            Self::SolutionSuccess(m) => &m.room_key,
        }
    }
}

/// Events the coordinator sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    RoleAssigned(RoleAssignedMsg),
    RoomState(RoomStateMsg),
    CodeUpdate(CodeBroadcastMsg),
    StudentCount(StudentCountMsg),
    SolutionSuccess(EmptyMsg),
    MentorLeft(EmptyMsg),
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RoleAssigned(_) => "role-assigned",
            Self::RoomState(_) => "room-state",
            Self::CodeUpdate(_) => "code-update",
            Self::StudentCount(_) => "student-count",
            Self::SolutionSuccess(_) => "solution-success",
            Self::MentorLeft(_) => "mentor-left",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    /// Older clients send `roomId`.
    #[serde(alias = "roomId")]
    pub room_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomMsg {
    #[serde(alias = "roomId")]
    pub room_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdateMsg {
    #[serde(alias = "roomId")]
    pub room_key: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolutionSuccessMsg {
    #[serde(alias = "roomId")]
    pub room_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignedMsg {
    pub role: Role,
}

/// Replayed to a student right after its role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateMsg {
    pub current_code: String,
    pub student_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBroadcastMsg {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentCountMsg {
    pub count: usize,
}

/// Payload of events that carry nothing beyond their name. Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyMsg {}
