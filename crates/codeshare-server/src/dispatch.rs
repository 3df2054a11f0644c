//! Best-effort fan-out of server events.
//!
//! Delivery never waits: each recipient's bounded queue either accepts the
//! event or the event is dropped for that recipient alone.

use std::sync::Arc;

use codeshare_core::net::messages::ServerMessage;
use codeshare_core::room::ConnectionId;

use crate::connection::ConnectionHandle;
use crate::session::Session;

/// Deliver to one connection. Returns false if it was dropped.
pub fn send_to_connection(handle: &ConnectionHandle, msg: ServerMessage) -> bool {
    deliver(handle, &Arc::new(msg), None)
}

/// Deliver to every member of `session`, optionally skipping the originator.
/// Returns how many recipients accepted the event.
pub fn send_to_room(session: &Session, msg: ServerMessage, exclude: Option<ConnectionId>) -> usize {
    let msg = Arc::new(msg);
    session
        .members()
        .filter(|m| Some(m.id()) != exclude)
        .filter(|m| deliver(m, &msg, Some(session.key())))
        .count()
}

/// Deliver to connections already detached from their room.
pub fn send_to_all(handles: &[ConnectionHandle], msg: ServerMessage) -> usize {
    let msg = Arc::new(msg);
    handles.iter().filter(|h| deliver(h, &msg, None)).count()
}

fn deliver(handle: &ConnectionHandle, msg: &Arc<ServerMessage>, room: Option<&str>) -> bool {
    match handle.deliver(Arc::clone(msg)) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(
                connection_id = handle.id(),
                room,
                event = msg.event_name(),
                error = %e,
                "Skipping delivery to connection"
            );
            false
        },
    }
}
