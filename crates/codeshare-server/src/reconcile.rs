use codeshare_core::net::messages::{EmptyMsg, ServerMessage, StudentCountMsg};

use crate::connection::CloseReason;
use crate::coordinator::Participant;
use crate::dispatch;
use crate::registry::{RoomRegistry, lock_session};
use crate::session::Departure;

/// Apply the room-side consequences of `participant` going away.
///
/// Takes the participant by value so a connection can only reconcile it
/// once. A connection that is no longer a member (already removed by a
/// mentor teardown, or the room was replaced) is a no-op.
pub fn reconcile_departure(registry: &RoomRegistry, participant: Participant) {
    let Some(shared) = registry.get(&participant.room_key) else {
        tracing::debug!(
            connection_id = participant.connection_id,
            room = %participant.room_key,
            "Room already gone, nothing to reconcile"
        );
        return;
    };

    let mut session = lock_session(&shared);
    match session.leave(participant.connection_id) {
        Departure::NotMember => {
            tracing::debug!(
                connection_id = participant.connection_id,
                room = %participant.room_key,
                "Connection no longer in room"
            );
        },
        Departure::Student { remaining } => {
            dispatch::send_to_room(
                &session,
                ServerMessage::StudentCount(StudentCountMsg { count: remaining }),
                None,
            );
            drop(session);
            tracing::info!(
                connection_id = participant.connection_id,
                room = %participant.room_key,
                role = %participant.role,
                students = remaining,
                "Left room"
            );
        },
        Departure::Mentor { students } => {
            shared.mark_closed();
            drop(session);
            // Queue order guarantees mentor-left is written before the close
            dispatch::send_to_all(&students, ServerMessage::MentorLeft(EmptyMsg::default()));
            for student in &students {
                student.terminate(CloseReason::MentorLeft);
            }
            registry.remove_if_empty(&participant.room_key);
            tracing::info!(
                connection_id = participant.connection_id,
                room = %participant.room_key,
                role = %participant.role,
                disconnected = students.len(),
                "Mentor left, room closed"
            );
        },
    }
}
