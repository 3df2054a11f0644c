use std::sync::Arc;

use axum::extract::ws::close_code;
use codeshare_core::net::messages::ServerMessage;
use codeshare_core::room::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Item queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<ServerMessage>),
    /// Write a close frame for this reason, then stop the connection.
    Close(CloseReason),
}

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    MentorLeft,
    RateLimited,
}

impl CloseReason {
    pub fn code(self) -> u16 {
        match self {
            Self::MentorLeft => close_code::NORMAL,
            Self::RateLimited => close_code::POLICY,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MentorLeft => "mentor left",
            Self::RateLimited => "rate limit exceeded",
        }
    }
}

pub type OutboundSender = mpsc::Sender<Outbound>;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    QueueFull,
    #[error("connection closed")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for DeliveryError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

/// Addressable half of a live connection, held by the room it joined.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: OutboundSender,
    shutdown: CancellationToken,
    /// Cancelled once the server decides to close this connection. Shared by
    /// every clone, so the room's copy can stop the reader.
    closing: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: OutboundSender, shutdown: CancellationToken) -> Self {
        Self {
            id,
            tx,
            shutdown,
            closing: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event without waiting. Fails if the queue is full or the
    /// writer is gone.
    pub fn deliver(&self, msg: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        self.tx.try_send(Outbound::Event(msg))?;
        Ok(())
    }

    /// Ask the connection to close after whatever is already queued. From
    /// here on the connection applies no further events. If the close cannot
    /// be queued the connection is cancelled directly.
    pub fn terminate(&self, reason: CloseReason) {
        self.closing.cancel();
        if let Err(e) = self.tx.try_send(Outbound::Close(reason)) {
            tracing::debug!(
                connection_id = self.id,
                reason = reason.as_str(),
                error = %DeliveryError::from(e),
                "Close not queued, cancelling connection"
            );
            self.shutdown.cancel();
        }
    }

    /// True once `terminate` has been called on any clone.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Resolves when `terminate` is called on any clone.
    pub async fn closing(&self) {
        self.closing.cancelled().await;
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_cancelled() || self.tx.is_closed()
    }
}


#[cfg(test)]
mod tests {
    use codeshare_core::net::messages::EmptyMsg;

    use super::test_support::*;
    use super::*;

    #[test]
    fn deliver_reports_full_queue() {
        let (handle, _rx) = make_handle_with_capacity(1, 1);
        let msg = Arc::new(ServerMessage::SolutionSuccess(EmptyMsg::default()));
        assert!(handle.deliver(Arc::clone(&msg)).is_ok());
        assert!(matches!(handle.deliver(msg), Err(DeliveryError::QueueFull)));
    }

    #[test]
    fn deliver_reports_closed_writer() {
        let (handle, rx) = make_handle(1);
        drop(rx);
        let msg = Arc::new(ServerMessage::MentorLeft(EmptyMsg::default()));
        assert!(matches!(handle.deliver(msg), Err(DeliveryError::Closed)));
        assert!(handle.is_terminated());
    }

    #[test]
    fn terminate_queues_close_after_pending_events() {
        let (handle, mut rx) = make_handle(7);
        handle
            .deliver(Arc::new(ServerMessage::MentorLeft(EmptyMsg::default())))
            .unwrap();
        handle.terminate(CloseReason::MentorLeft);
        assert_eq!(drain_names(&mut rx), vec!["mentor-left", "close"]);
        assert!(!handle.shutdown.is_cancelled());
    }

    #[test]
    fn terminate_marks_every_clone_closing() {
        let (handle, _rx) = make_handle(4);
        let held_by_room = handle.clone();
        assert!(!handle.is_closing());
        held_by_room.terminate(CloseReason::MentorLeft);
        assert!(handle.is_closing());
        assert!(!handle.is_terminated());
    }

    #[test]
    fn close_reasons_map_to_close_codes() {
        assert_eq!(CloseReason::MentorLeft.code(), 1000);
        assert_eq!(CloseReason::MentorLeft.as_str(), "mentor left");
        assert_eq!(CloseReason::RateLimited.code(), 1008);
    }

    #[test]
    fn terminate_cancels_when_queue_is_full() {
        let (handle, _rx) = make_handle_with_capacity(3, 1);
        handle
            .deliver(Arc::new(ServerMessage::MentorLeft(EmptyMsg::default())))
            .unwrap();
        handle.terminate(CloseReason::MentorLeft);
        assert!(handle.shutdown.is_cancelled());
    }
}
