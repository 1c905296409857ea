//! WebSocket Mock Server for the Watson recognize endpoint
//!
//! Acknowledges the start frame with `{"state":"listening"}`, answers every audio
//! frame with an interim result and the stop frame with a final result followed by a
//! second acknowledgement. Behaviors cover rejected upgrades, server-side closes and
//! connections dropped mid-handshake.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// What the mock does once the upgrade request arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockBehavior {
    /// Normal recognition
    #[default]
    Transcribe,
    /// Answer the upgrade with this HTTP status
    RejectUpgrade(u16),
    /// Acknowledge the start frame, then close with this code
    CloseAfterListening(u16),
}

/// Frames the mock received, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ReceivedFrame {
    Text(String),
    Binary(usize),
}

/// Watson mock server state
#[derive(Default)]
pub struct WatsonMockState {
    pub behavior: MockBehavior,
    /// Connections to drop before completing the upgrade
    pub drop_handshakes: AtomicU64,
    pub connection_count: AtomicU64,
    pub frames: Mutex<Vec<ReceivedFrame>>,
    pub request_uris: Mutex<Vec<String>>,
    pub metadata_headers: Mutex<Vec<String>>,
}

impl WatsonMockState {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub fn dropping_handshakes(count: u64) -> Self {
        Self {
            drop_handshakes: AtomicU64::new(count),
            ..Default::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| match f {
                ReceivedFrame::Text(text) => Some(text.clone()),
                ReceivedFrame::Binary(_) => None,
            })
            .collect()
    }

    pub fn binary_count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, ReceivedFrame::Binary(_)))
            .count()
    }
}

fn listening() -> Message {
    Message::Text(json!({"state": "listening"}).to_string().into())
}

/// Read the upgrade request, then close the TCP stream without answering
async fn drop_handshake(mut stream: TcpStream) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    stream.shutdown().await
}

/// Handle a single recognize connection
async fn handle_recognize_connection(
    stream: TcpStream,
    state: Arc<WatsonMockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let connection = state.connection_count.fetch_add(1, Ordering::SeqCst);
    if connection < state.drop_handshakes.load(Ordering::SeqCst) {
        drop_handshake(stream).await?;
        return Ok(());
    }

    let behavior = state.behavior;
    let callback_state = state.clone();
    let ws_stream = accept_hdr_async(stream, move |request: &Request, response: Response| {
        callback_state
            .request_uris
            .lock()
            .push(request.uri().to_string());
        if let Some(value) = request.headers().get("x-watson-metadata") {
            if let Ok(value) = value.to_str() {
                callback_state.metadata_headers.lock().push(value.to_string());
            }
        }

        match behavior {
            MockBehavior::RejectUpgrade(status) => {
                let mut error = ErrorResponse::new(Some("Unauthorized".to_string()));
                *error.status_mut() =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::UNAUTHORIZED);
                Err(error)
            }
            _ => Ok(response),
        }
    })
    .await?;
    let (mut write, mut read) = ws_stream.split();

    let mut audio_frames = 0u64;

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                state
                    .frames
                    .lock()
                    .push(ReceivedFrame::Text(text.to_string()));

                let request: Value = serde_json::from_str(text.as_str())?;
                match request.get("action").and_then(|a| a.as_str()) {
                    Some("start") => {
                        write.send(listening()).await?;
                        if let MockBehavior::CloseAfterListening(code) = behavior {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "mock failure".into(),
                            };
                            write.send(Message::Close(Some(frame))).await?;
                        }
                    }
                    Some("stop") => {
                        let result = json!({
                            "result_index": 0,
                            "results": [{
                                "final": true,
                                "alternatives": [{
                                    "transcript": "mock transcript ",
                                    "confidence": 0.92
                                }]
                            }]
                        });
                        write.send(Message::Text(result.to_string().into())).await?;
                        write.send(listening()).await?;
                    }
                    _ => {
                        let error = json!({"error": "unknown action"});
                        write.send(Message::Text(error.to_string().into())).await?;
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                audio_frames += 1;
                state.frames.lock().push(ReceivedFrame::Binary(data.len()));

                let interim = json!({
                    "result_index": 0,
                    "results": [{
                        "final": false,
                        "alternatives": [{"transcript": format!("chunk {audio_frames}")}]
                    }]
                });
                write.send(Message::Text(interim.to_string().into())).await?;
            }
            Ok(Message::Ping(data)) => {
                write.send(Message::Pong(data)).await?;
            }
            // Keep polling after a close so the reply goes out.
            Ok(_) => {}
            Err(_) => break,
        }
    }

    Ok(())
}

/// Spawn the mock on an ephemeral port and return its address
pub async fn spawn_watson_mock(state: Arc<WatsonMockState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock server");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let state = state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_recognize_connection(stream, state).await {
                    eprintln!("Watson mock connection error: {}", e);
                }
            });
        }
    });

    addr
}
