//! Transport socket for the Watson recognize endpoint.
//!
//! A [`TransportSocket`] owns exactly one network connection. Lifecycle events and
//! inbound text frames are pushed to a single [`SocketListener`]. Reconnecting means
//! asking the [`SocketFactory`] for a fresh socket; there is no reset in place.
//!
//! ```text
//! send_text() / send_binary() ──▶ outbound (mpsc) ──▶ ┐
//!                                                     │  socket task ◀──▶ WebSocket
//! listener.on_open / on_text_message / on_close  ◀─── ┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use super::config::{TRANSIENT_CLOSE_CODE, WatsonSocketConfig};
use crate::core::stt::base::STTError;

/// Frames queued for the socket task before writes start failing back-pressure.
const OUTBOUND_QUEUE: usize = 64;

/// How long to wait for the peer's close frame after we sent ours.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Contract
// =============================================================================

/// Why a socket closed abnormally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseError {
    /// WebSocket close code, HTTP status of a rejected upgrade, or
    /// [`TRANSIENT_CLOSE_CODE`] for a failed protocol upgrade. `None` for I/O failures.
    pub code: Option<u16>,
    pub reason: String,
}

impl CloseError {
    pub fn new(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Receiver of socket lifecycle events.
///
/// `on_close(None)` is a clean close; it fires at most once per socket and nothing
/// follows it.
#[async_trait]
pub trait SocketListener: Send + Sync {
    async fn on_open(&self);
    async fn on_close(&self, error: Option<CloseError>);
    async fn on_text_message(&self, text: String);
}

/// A single full-duplex connection to the recognize endpoint.
#[async_trait]
pub trait TransportSocket: Send {
    /// Start opening the connection. Completion is reported through `on_open` or
    /// `on_close`. Calling it again while connecting or open is a no-op.
    async fn connect(&mut self) -> Result<(), STTError>;

    /// Close the connection without flushing frames that were never queued.
    async fn disconnect(&mut self);

    /// Write a text frame. Fails with [`STTError::NotConnected`] before `on_open`.
    async fn send_text(&mut self, text: String) -> Result<(), STTError>;

    /// Write a binary frame. Fails with [`STTError::NotConnected`] before `on_open`.
    async fn send_binary(&mut self, data: Bytes) -> Result<(), STTError>;
}

/// Builds a fresh socket bound to `listener` for every connection attempt.
pub trait SocketFactory: Send + Sync {
    fn create(&self, listener: Arc<dyn SocketListener>) -> Box<dyn TransportSocket>;
}

// =============================================================================
// tokio-tungstenite implementation
// =============================================================================

enum Outbound {
    Frame(Message),
    Close,
}

/// [`TransportSocket`] over `tokio-tungstenite`.
pub struct WatsonWebSocket {
    url: String,
    headers: Vec<(&'static str, String)>,
    connect_timeout: Duration,
    listener: Arc<dyn SocketListener>,
    /// Set by the socket task once the upgrade completed.
    writer: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,
    task: Option<JoinHandle<()>>,
}

impl WatsonWebSocket {
    pub fn new(
        url: String,
        headers: Vec<(&'static str, String)>,
        connect_timeout: Duration,
        listener: Arc<dyn SocketListener>,
    ) -> Self {
        Self {
            url,
            headers,
            connect_timeout,
            listener,
            writer: Arc::new(Mutex::new(None)),
            task: None,
        }
    }

    fn writer(&self) -> Result<mpsc::Sender<Outbound>, STTError> {
        self.writer.lock().clone().ok_or(STTError::NotConnected)
    }

    async fn enqueue(&self, message: Message) -> Result<(), STTError> {
        self.writer()?
            .send(Outbound::Frame(message))
            .await
            .map_err(|_| STTError::NetworkError("WebSocket writer is closed".to_string()))
    }
}

#[async_trait]
impl TransportSocket for WatsonWebSocket {
    async fn connect(&mut self) -> Result<(), STTError> {
        if self.task.is_some() {
            return Ok(());
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| STTError::ConnectionFailed(format!("Invalid WebSocket URL: {e}")))?;
        for (name, value) in &self.headers {
            let header = name.parse::<HeaderName>().map_err(|e| {
                STTError::ConnectionFailed(format!("Invalid header name {name}: {e}"))
            })?;
            let value = value.parse::<HeaderValue>().map_err(|e| {
                STTError::ConnectionFailed(format!("Invalid value for header {name}: {e}"))
            })?;
            request.headers_mut().insert(header, value);
        }

        let listener = self.listener.clone();
        let writer_slot = self.writer.clone();
        let connect_timeout = self.connect_timeout;

        self.task = Some(tokio::spawn(async move {
            let ws_stream = match timeout(connect_timeout, connect_async(request)).await {
                Ok(Ok((ws_stream, _response))) => ws_stream,
                Ok(Err(e)) => {
                    let close = close_error_from_handshake(&e);
                    warn!(code = ?close.code, "WebSocket handshake failed: {}", close.reason);
                    listener.on_close(Some(close)).await;
                    return;
                }
                Err(_) => {
                    listener
                        .on_close(Some(CloseError::new(
                            None,
                            format!("Connection timed out after {connect_timeout:?}"),
                        )))
                        .await;
                    return;
                }
            };

            info!("Connected to Watson Speech-to-Text WebSocket");

            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
            *writer_slot.lock() = Some(out_tx);

            listener.on_open().await;

            let outcome = loop {
                tokio::select! {
                    biased;

                    outbound = out_rx.recv() => match outbound {
                        Some(Outbound::Frame(message)) => {
                            if let Err(e) = ws_sink.send(message).await {
                                break Some(CloseError::new(None, format!("WebSocket write failed: {e}")));
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "".into(),
                            };
                            if let Err(e) = ws_sink.send(Message::Close(Some(frame))).await {
                                debug!("Failed to send close frame: {}", e);
                            }
                            drain_until_closed(&mut ws_stream).await;
                            break None;
                        }
                    },

                    inbound = ws_stream.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            listener.on_text_message(text.as_str().to_string()).await;
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Ignoring binary frame from Watson: {} bytes", data.len());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!("Watson WebSocket closed by peer: {:?}", frame);
                            break close_error_from_frame(frame);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            break Some(close_error_from_stream(&e));
                        }
                        None => {
                            break Some(CloseError::new(None, "WebSocket stream ended"));
                        }
                    },
                }
            };

            writer_slot.lock().take();
            listener.on_close(outcome).await;
        }));

        Ok(())
    }

    async fn disconnect(&mut self) {
        let writer = self.writer.lock().take();
        match writer {
            Some(writer) => {
                // Detach: the task finishes the close handshake, then reports on_close.
                self.task.take();
                if writer.send(Outbound::Close).await.is_err() {
                    debug!("WebSocket task already finished");
                }
            }
            None => {
                if let Some(task) = self.task.take() {
                    task.abort();
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), STTError> {
        self.enqueue(Message::Text(text.into())).await
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<(), STTError> {
        self.enqueue(Message::Binary(data)).await
    }
}

impl Drop for WatsonWebSocket {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn drain_until_closed<S>(stream: &mut S)
where
    S: futures::Stream<Item = Result<Message, WsError>> + Unpin,
{
    let drained = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        debug!("Peer did not complete the close handshake");
    }
}

/// Map a failed connect to a close error.
///
/// A rejected upgrade carries its HTTP status. A protocol-level upgrade failure is
/// reported with [`TRANSIENT_CLOSE_CODE`].
pub(crate) fn close_error_from_handshake(error: &WsError) -> CloseError {
    match error {
        WsError::Http(response) => {
            let status = response.status();
            CloseError::new(
                Some(status.as_u16()),
                format!("WebSocket upgrade rejected: {status}"),
            )
        }
        WsError::Protocol(e) => CloseError::new(
            Some(TRANSIENT_CLOSE_CODE),
            format!("WebSocket upgrade failed: {e}"),
        ),
        other => CloseError::new(None, format!("Failed to connect: {other}")),
    }
}

fn close_error_from_stream(error: &WsError) -> CloseError {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            CloseError::new(None, "WebSocket connection closed")
        }
        other => CloseError::new(None, format!("WebSocket error: {other}")),
    }
}

/// A normal closure, or one without a status, is clean.
pub(crate) fn close_error_from_frame(frame: Option<CloseFrame>) -> Option<CloseError> {
    let frame = frame?;
    match frame.code {
        CloseCode::Normal | CloseCode::Status => None,
        code => Some(CloseError::new(Some(u16::from(code)), frame.reason.as_str())),
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Creates [`WatsonWebSocket`]s for one recognize endpoint.
#[derive(Debug, Clone)]
pub struct WatsonWebSocketFactory {
    url: String,
    headers: Vec<(&'static str, String)>,
    connect_timeout: Duration,
}

impl WatsonWebSocketFactory {
    /// Resolve the endpoint URL and headers once; every socket reuses them.
    pub fn new(config: &WatsonSocketConfig) -> Result<Self, STTError> {
        config.validate()?;
        Ok(Self {
            url: config.build_websocket_url()?,
            headers: config.request_headers(),
            connect_timeout: config.connect_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SocketFactory for WatsonWebSocketFactory {
    fn create(&self, listener: Arc<dyn SocketListener>) -> Box<dyn TransportSocket> {
        Box::new(WatsonWebSocket::new(
            self.url.clone(),
            self.headers.clone(),
            self.connect_timeout,
            listener,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::error::ProtocolError;

    struct NullListener;

    #[async_trait]
    impl SocketListener for NullListener {
        async fn on_open(&self) {}
        async fn on_close(&self, _error: Option<CloseError>) {}
        async fn on_text_message(&self, _text: String) {}
    }

    #[tokio::test]
    async fn test_send_before_open_is_not_connected() {
        let mut socket = WatsonWebSocket::new(
            "ws://127.0.0.1:9/v1/recognize".to_string(),
            Vec::new(),
            Duration::from_secs(1),
            Arc::new(NullListener),
        );
        assert_eq!(
            socket.send_binary(Bytes::from_static(&[0, 1])).await,
            Err(STTError::NotConnected)
        );
        assert_eq!(
            socket.send_text("{}".to_string()).await,
            Err(STTError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let mut socket = WatsonWebSocket::new(
            "not a url".to_string(),
            Vec::new(),
            Duration::from_secs(1),
            Arc::new(NullListener),
        );
        assert!(matches!(
            socket.connect().await,
            Err(STTError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_handshake_protocol_failure_is_transient_code() {
        let close = close_error_from_handshake(&WsError::Protocol(ProtocolError::HandshakeIncomplete));
        assert_eq!(close.code, Some(TRANSIENT_CLOSE_CODE));
    }

    #[test]
    fn test_handshake_io_failure_has_no_code() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let close = close_error_from_handshake(&WsError::Io(io));
        assert_eq!(close.code, None);
        assert!(close.reason.contains("refused"));
    }

    #[test]
    fn test_close_frame_mapping() {
        assert_eq!(close_error_from_frame(None), None);
        assert_eq!(
            close_error_from_frame(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "done".into(),
            })),
            None
        );

        let abnormal = close_error_from_frame(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "internal".into(),
        }))
        .unwrap();
        assert_eq!(abnormal.code, Some(1011));
        assert_eq!(abnormal.reason, "internal");
    }

    #[test]
    fn test_factory_requires_endpoint() {
        assert!(WatsonWebSocketFactory::new(&WatsonSocketConfig::default()).is_err());

        let factory =
            WatsonWebSocketFactory::new(&WatsonSocketConfig::with_url("ws://127.0.0.1:1/v1/recognize"))
                .unwrap();
        assert!(factory.url().starts_with("ws://127.0.0.1:1/v1/recognize"));
    }
}
