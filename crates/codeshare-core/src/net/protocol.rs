use serde::Serialize;
use serde::de::DeserializeOwned;

use super::messages::{ClientMessage, ServerMessage};
use crate::room::is_valid_room_key;

/// Maximum frame size in bytes, either direction.
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024; // 512 KiB

/// Encoding of frames on one connection. Text frames carry JSON, binary
/// frames carry MessagePack with named fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    MessagePack,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty message")]
    EmptyMessage,
    #[error("payload too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    PayloadTooLarge(usize),
    #[error("serialize error: {0}")]
    SerializeError(String),
    #[error("deserialize error: {0}")]
    DeserializeError(String),
    #[error("invalid room key")]
    InvalidRoomKey,
}

fn encode<T: Serialize>(msg: &T, format: WireFormat) -> Result<Vec<u8>, ProtocolError> {
    let bytes = match format {
        WireFormat::Json => {
            serde_json::to_vec(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))?
        },
        WireFormat::MessagePack => rmp_serde::to_vec_named(msg)
            .map_err(|e| ProtocolError::SerializeError(e.to_string()))?,
    };
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(bytes.len()));
    }
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(data: &[u8], format: WireFormat) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    match format {
        WireFormat::Json => {
            serde_json::from_slice(data).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
        },
        WireFormat::MessagePack => {
            rmp_serde::from_slice(data).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
        },
    }
}

/// Encode a `ServerMessage` to wire format.
pub fn encode_server_message(
    msg: &ServerMessage,
    format: WireFormat,
) -> Result<Vec<u8>, ProtocolError> {
    encode(msg, format)
}

/// Encode a `ClientMessage` to wire format.
pub fn encode_client_message(
    msg: &ClientMessage,
    format: WireFormat,
) -> Result<Vec<u8>, ProtocolError> {
    encode(msg, format)
}

/// Decode raw wire data into a `ClientMessage`, rejecting events whose room
/// key is empty or malformed.
pub fn decode_client_message(
    data: &[u8],
    format: WireFormat,
) -> Result<ClientMessage, ProtocolError> {
    let msg: ClientMessage = decode(data, format)?;
    if !is_valid_room_key(msg.room_key()) {
        return Err(ProtocolError::InvalidRoomKey);
    }
    Ok(msg)
}

/// Decode raw wire data into a `ServerMessage`.
pub fn decode_server_message(
    data: &[u8],
    format: WireFormat,
) -> Result<ServerMessage, ProtocolError> {
    decode(data, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::messages::{
        CodeBroadcastMsg, CodeUpdateMsg, EmptyMsg, JoinRoomMsg, RoleAssignedMsg, RoomStateMsg,
    };
    use crate::room::Role;

    #[test]
    fn decode_join_room_from_browser_json() {
        let wire = br#"{"event":"join-room","data":{"roomKey":"r1"}}"#;
        let msg = decode_client_message(wire, WireFormat::Json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::JoinRoom(JoinRoomMsg {
                room_key: "r1".to_string()
            })
        );
    }

    #[test]
    fn legacy_room_id_field_is_accepted() {
        let wire = br#"{"event":"code-update","data":{"roomId":"r1","code":"x=1"}}"#;
        let msg = decode_client_message(wire, WireFormat::Json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::CodeUpdate(CodeUpdateMsg {
                room_key: "r1".to_string(),
                code: "x=1".to_string(),
            })
        );
    }

    #[test]
    fn missing_field_is_rejected() {
        let wire = br#"{"event":"code-update","data":{"roomKey":"r1"}}"#;
        let err = decode_client_message(wire, WireFormat::Json).unwrap_err();
        assert!(matches!(err, ProtocolError::DeserializeError(_)));
    }

    #[test]
    fn unknown_event_is_rejected() {
        let wire = br#"{"event":"delete-room","data":{"roomKey":"r1"}}"#;
        assert!(decode_client_message(wire, WireFormat::Json).is_err());
    }

    #[test]
    fn empty_room_key_is_rejected() {
        let wire = br#"{"event":"join-room","data":{"roomKey":""}}"#;
        let err = decode_client_message(wire, WireFormat::Json).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRoomKey));
    }

    #[test]
    fn empty_and_oversized_frames_are_rejected() {
        assert!(matches!(
            decode_client_message(&[], WireFormat::Json),
            Err(ProtocolError::EmptyMessage)
        ));
        let big = vec![b' '; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode_client_message(&big, WireFormat::Json),
            Err(ProtocolError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn server_events_use_envelope_shape() {
        let role = ServerMessage::RoleAssigned(RoleAssignedMsg {
            role: Role::Mentor,
        });
        let json: serde_json::Value =
            serde_json::from_slice(&encode_server_message(&role, WireFormat::Json).unwrap())
                .unwrap();
        assert_eq!(json["event"], "role-assigned");
        assert_eq!(json["data"]["role"], "mentor");

        let state = ServerMessage::RoomState(RoomStateMsg {
            current_code: "let a;".to_string(),
            student_count: 2,
        });
        let json: serde_json::Value =
            serde_json::from_slice(&encode_server_message(&state, WireFormat::Json).unwrap())
                .unwrap();
        assert_eq!(json["event"], "room-state");
        assert_eq!(json["data"]["currentCode"], "let a;");
        assert_eq!(json["data"]["studentCount"], 2);
    }

    #[test]
    fn payloadless_events_carry_empty_object() {
        let msg = ServerMessage::MentorLeft(EmptyMsg::default());
        let encoded = encode_server_message(&msg, WireFormat::Json).unwrap();
        assert_eq!(encoded, br#"{"event":"mentor-left","data":{}}"#);
    }

    #[test]
    fn messagepack_frames_decode_with_named_fields() {
        let msg = ServerMessage::CodeUpdate(CodeBroadcastMsg {
            code: "fn main() {}".to_string(),
        });
        let encoded = encode_server_message(&msg, WireFormat::MessagePack).unwrap();
        // fixmap(2) with "event" key first
        assert_eq!(encoded[0], 0x82);
        assert_eq!(
            decode_server_message(&encoded, WireFormat::MessagePack).unwrap(),
            msg
        );

        let join = ClientMessage::JoinRoom(JoinRoomMsg {
            room_key: "r9".to_string(),
        });
        let encoded = encode_client_message(&join, WireFormat::MessagePack).unwrap();
        assert_eq!(
            decode_client_message(&encoded, WireFormat::MessagePack).unwrap(),
            join
        );
    }
}
