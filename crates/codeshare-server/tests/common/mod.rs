use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use codeshare_core::net::messages::{
    ClientMessage, CodeUpdateMsg, JoinRoomMsg, LeaveRoomMsg, ServerMessage, SolutionSuccessMsg,
};
use codeshare_core::net::protocol::{WireFormat, decode_server_message, encode_client_message};
use codeshare_core::room::Role;

use codeshare_server::build_app;
use codeshare_server::config::ServerConfig;
use codeshare_server::state::AppState;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a test server with default config and the built-in exercises.
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    pub async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (app, state) = build_app(config);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn has_room(&self, room_key: &str) -> bool {
        self.state.coordinator.registry().contains(room_key)
    }

    /// Poll until `room_key` is absent, since teardown finishes after the
    /// last frames are written.
    pub async fn wait_room_gone(&self, room_key: &str) -> bool {
        for _ in 0..100 {
            if !self.has_room(room_key) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// Connect a WebSocket client to the given URL.
pub async fn ws_connect(url: &str) -> WsStream {
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

/// Send a ClientMessage as a JSON text frame.
pub async fn ws_send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg, WireFormat::Json).unwrap();
    let text = String::from_utf8(encoded).unwrap();
    stream.send(Message::text(text)).await.unwrap();
}

/// Send a ClientMessage as a MessagePack binary frame.
pub async fn ws_send_msgpack(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = encode_client_message(msg, WireFormat::MessagePack).unwrap();
    stream.send(Message::binary(encoded)).await.unwrap();
}

pub async fn ws_send_raw_text(stream: &mut WsStream, text: &str) {
    stream.send(Message::text(text.to_string())).await.unwrap();
}

pub fn join_msg(room_key: &str) -> ClientMessage {
    ClientMessage::JoinRoom(JoinRoomMsg {
        room_key: room_key.to_string(),
    })
}

pub fn leave_msg(room_key: &str) -> ClientMessage {
    ClientMessage::LeaveRoom(LeaveRoomMsg {
        room_key: room_key.to_string(),
    })
}

pub fn code_msg(room_key: &str, code: &str) -> ClientMessage {
    ClientMessage::CodeUpdate(CodeUpdateMsg {
        room_key: room_key.to_string(),
        code: code.to_string(),
    })
}

pub fn solved_msg(room_key: &str) -> ClientMessage {
    ClientMessage::SolutionSuccess(SolutionSuccessMsg {
        room_key: room_key.to_string(),
    })
}

/// Join a room over JSON and return the assigned role. Leaves any
/// following `room-state` unread.
pub async fn ws_join(stream: &mut WsStream, room_key: &str) -> Role {
    ws_send(stream, &join_msg(room_key)).await;
    match ws_read_event(stream).await {
        ServerMessage::RoleAssigned(assigned) => assigned.role,
        other => panic!("Expected role-assigned, got: {other:?}"),
    }
}

fn decode_frame(msg: Message) -> Option<ServerMessage> {
    match msg {
        Message::Text(text) => {
            Some(decode_server_message(text.as_bytes(), WireFormat::Json).unwrap())
        },
        Message::Binary(data) => {
            Some(decode_server_message(&data, WireFormat::MessagePack).unwrap())
        },
        _ => None,
    }
}

/// Read the next server event (5s timeout).
pub async fn ws_read_event(stream: &mut WsStream) -> ServerMessage {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(frame))) => {
                    panic!("WebSocket closed unexpectedly: {frame:?}")
                },
                Some(Ok(msg)) => {
                    if let Some(event) = decode_frame(msg) {
                        return event;
                    }
                },
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket message")
}

/// Try to read a server event, returning None on timeout.
pub async fn ws_try_read_event(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    panic!("WebSocket error or closed")
                },
                Some(Ok(msg)) => {
                    if let Some(event) = decode_frame(msg) {
                        return event;
                    }
                },
            }
        }
    })
    .await
    .ok()
}

/// Read the raw next data frame, for checking the wire encoding.
pub async fn ws_read_frame(stream: &mut WsStream) -> Message {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => return msg,
                Some(Ok(Message::Close(frame))) => {
                    panic!("WebSocket closed unexpectedly: {frame:?}")
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("WebSocket error: {e}"),
                None => panic!("WebSocket stream ended"),
            }
        }
    })
    .await
    .expect("Timed out waiting for WebSocket frame")
}

/// Wait for the server to close the socket. Returns the close code and
/// reason. Panics if a data frame arrives first.
pub async fn ws_expect_close(stream: &mut WsStream) -> (u16, String) {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Close(Some(frame)))) => {
                    return (u16::from(frame.code), frame.reason.as_str().to_string());
                },
                Some(Ok(Message::Close(None))) | None => return (0, String::new()),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => panic!("Expected close, got: {other:?}"),
                Some(Err(e)) => panic!("WebSocket error: {e}"),
            }
        }
    })
    .await
    .expect("Timed out waiting for close")
}
