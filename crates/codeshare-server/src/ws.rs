use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use codeshare_core::net::messages::{ClientMessage, ServerMessage};
use codeshare_core::net::protocol::{
    MAX_MESSAGE_SIZE, ProtocolError, WireFormat, decode_client_message, encode_server_message,
};
use codeshare_core::room::ConnectionId;

use crate::connection::{CloseReason, ConnectionHandle, Outbound};
use crate::coordinator::{CoordinatorError, Participant};
use crate::state::{AppState, ConnectionGuard};

/// Most rate-limited events a connection may have waiting before it is
/// closed.
const MAX_DEFERRED_EVENTS: usize = 16;

/// How long a server-closed connection gets to flush its close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Result<Response, StatusCode> {
    let max_ws = state.config.limits.max_ws_connections;
    let current = state.ws_connection_count.load(Ordering::Relaxed);
    if current >= max_ws {
        tracing::warn!(current, max = max_ws, "WS connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state)))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = ConnectionGuard::new(Arc::clone(&state.ws_connection_count));
    let (ws_sender, mut ws_receiver) = socket.split();

    let (tx, rx) = mpsc::channel(state.config.limits.connection_message_buffer);
    let shutdown = CancellationToken::new();
    let handle = state.coordinator.connect(tx, shutdown.clone());
    let connection_id = handle.id();

    // Fixed by the first data frame the client sends
    let format = Arc::new(OnceLock::new());
    let mut writer = spawn_writer(
        ws_sender,
        rx,
        shutdown.clone(),
        Arc::clone(&format),
        connection_id,
    );
    tracing::info!(connection_id, "Connection opened");

    let mut participant: Option<Participant> = None;
    read_loop(
        &mut ws_receiver,
        &state,
        &handle,
        &mut participant,
        &format,
        &shutdown,
    )
    .await;

    state.coordinator.disconnect(&mut participant);
    let closing = handle.is_closing();
    drop(handle);

    // A server-side close is already queued; let the writer send it
    let flushed = if closing {
        tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer)
            .await
            .ok()
    } else {
        None
    };
    shutdown.cancel();
    let result = match flushed {
        Some(result) => result,
        None => writer.await,
    };
    if let Err(e) = result {
        tracing::warn!(connection_id, error = %e, "Writer task failed");
    }
    tracing::info!(connection_id, "Connection closed");
}

fn spawn_writer(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    shutdown: CancellationToken,
    format: Arc<OnceLock<WireFormat>>,
    connection_id: ConnectionId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let outbound = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                item = rx.recv() => item,
            };
            match outbound {
                Some(Outbound::Event(msg)) => {
                    let wire = format.get().copied().unwrap_or(WireFormat::Json);
                    let frame = match encode_frame(&msg, wire) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::warn!(
                                connection_id,
                                event = msg.event_name(),
                                error = %e,
                                "Failed to encode event"
                            );
                            continue;
                        },
                    };
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                },
                Some(Outbound::Close(reason)) => {
                    let frame = Message::Close(Some(CloseFrame {
                        code: reason.code(),
                        reason: reason.as_str().into(),
                    }));
                    if let Err(e) = ws_sender.send(frame).await {
                        tracing::debug!(connection_id, error = %e, "Failed to send close frame");
                    }
                    break;
                },
                None => break,
            }
        }
        // Stops the reader when the writer ends first
        shutdown.cancel();
    })
}

fn encode_frame(msg: &ServerMessage, format: WireFormat) -> Result<Message, ProtocolError> {
    let data = encode_server_message(msg, format)?;
    Ok(match format {
        WireFormat::Json => {
            let text =
                String::from_utf8(data).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
            Message::Text(text.into())
        },
        WireFormat::MessagePack => Message::Binary(data.into()),
    })
}

/// Per-connection rate limiter (token bucket).
struct RateLimiter {
    tokens: f64,
    last_refill: tokio::time::Instant,
    max_tokens: f64,
    refill_rate: f64, // tokens per second
}

impl RateLimiter {
    fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: tokio::time::Instant::now(),
            max_tokens,
            refill_rate,
        }
    }

    /// Returns true if the event is allowed; false if rate-limited.
    fn allow(&mut self) -> bool {
        let now = tokio::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until `allow` would next succeed.
    fn next_token_in(&self) -> Duration {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        let tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        let missing = (1.0 - tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_rate)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("more than {} events waiting on the rate limit", MAX_DEFERRED_EVENTS)]
struct ThrottleOverflow;

/// Rate limit that delays events instead of dropping them.
///
/// Joins and leaves are never limited. Code updates and solution notices
/// spend a token; without one they wait, in arrival order. A waiting update
/// is replaced by a newer one for the same room, and a repeated solution
/// notice for the same room is folded into the waiting one.
struct EventThrottle {
    limiter: RateLimiter,
    deferred: VecDeque<ClientMessage>,
}

impl EventThrottle {
    fn new(rate: f64) -> Self {
        Self {
            limiter: RateLimiter::new(rate, rate),
            deferred: VecDeque::new(),
        }
    }

    /// Accept a decoded event and return what may be applied now, in order.
    fn admit(&mut self, msg: ClientMessage) -> Result<Vec<ClientMessage>, ThrottleOverflow> {
        if matches!(msg, ClientMessage::JoinRoom(_) | ClientMessage::LeaveRoom(_)) {
            // Anything still waiting was sent first
            let mut ready: Vec<ClientMessage> = self.deferred.drain(..).collect();
            ready.push(msg);
            return Ok(ready);
        }
        if self.deferred.is_empty() && self.limiter.allow() {
            return Ok(vec![msg]);
        }
        self.defer(msg);
        if self.deferred.len() > MAX_DEFERRED_EVENTS {
            return Err(ThrottleOverflow);
        }
        Ok(Vec::new())
    }

    fn defer(&mut self, msg: ClientMessage) {
        let same_as_last = self.deferred.back().is_some_and(|last| {
            last.event_name() == msg.event_name() && last.room_key() == msg.room_key()
        });
        match self.deferred.back_mut() {
            Some(last) if same_as_last && matches!(msg, ClientMessage::CodeUpdate(_)) => {
                *last = msg;
            },
            Some(_) if same_as_last => {},
            _ => self.deferred.push_back(msg),
        }
    }

    /// Waiting events that tokens now cover.
    fn release(&mut self) -> Vec<ClientMessage> {
        let mut ready = Vec::new();
        while !self.deferred.is_empty() && self.limiter.allow() {
            ready.extend(self.deferred.pop_front());
        }
        ready
    }

    /// When to call `release` next, if anything is waiting.
    fn retry_after(&self) -> Option<Duration> {
        (!self.deferred.is_empty()).then(|| self.limiter.next_token_in())
    }
}

async fn read_loop(
    ws_receiver: &mut SplitStream<WebSocket>,
    state: &AppState,
    handle: &ConnectionHandle,
    participant: &mut Option<Participant>,
    format: &OnceLock<WireFormat>,
    shutdown: &CancellationToken,
) {
    let connection_id = handle.id();
    let mut throttle = EventThrottle::new(state.config.limits.ws_rate_limit_per_sec);

    loop {
        let retry = throttle.retry_after();
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            () = handle.closing() => break,
            () = tokio::time::sleep(retry.unwrap_or_default()), if retry.is_some() => {
                if !apply_events(state, handle, participant, throttle.release()) {
                    break;
                }
                continue;
            },
            frame = ws_receiver.next() => frame,
        };
        let Some(Ok(frame)) = frame else {
            break;
        };

        let (data, frame_format) = match &frame {
            Message::Text(text) => (text.as_str().as_bytes(), WireFormat::Json),
            Message::Binary(bytes) => (&bytes[..], WireFormat::MessagePack),
            Message::Close(_) => break,
            // Ping/pong are answered by the socket itself
            _ => continue,
        };

        if format.set(frame_format).is_ok() {
            tracing::debug!(connection_id, format = ?frame_format, "Wire format fixed");
        }

        let msg = match decode_client_message(data, frame_format) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "Discarding malformed event");
                continue;
            },
        };

        let ready = match throttle.admit(msg) {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(connection_id, error = %e, "Rate limited, closing connection");
                handle.terminate(CloseReason::RateLimited);
                break;
            },
        };
        if !apply_events(state, handle, participant, ready) {
            break;
        }
    }
}

/// Apply events in order. Returns false once the connection is closing.
fn apply_events(
    state: &AppState,
    handle: &ConnectionHandle,
    participant: &mut Option<Participant>,
    events: Vec<ClientMessage>,
) -> bool {
    let connection_id = handle.id();
    for msg in events {
        let event = msg.event_name();
        match state.coordinator.handle_event(handle, participant, msg) {
            Ok(()) => {},
            Err(CoordinatorError::Closing) => return false,
            Err(e @ CoordinatorError::Malformed(_)) => {
                tracing::warn!(connection_id, event, error = %e, "Discarding malformed event");
            },
            Err(e @ CoordinatorError::UnknownRoom(_)) => {
                tracing::debug!(connection_id, event, error = %e, "Discarding event");
            },
        }
    }
    true
}
