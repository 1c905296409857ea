//! Streaming recognition session controller.
//!
//! One task owns the session state and the active socket. Socket events, audio
//! chunks and stop/cancel requests all arrive on channels and are handled one at a
//! time, so no lock guards the state machine itself.
//!
//! ```text
//! Idle ──start──▶ Connecting ──on_open──▶ Listening ──stop──▶ Stopping ──on_close──▶ Closed
//!                    ▲                        │
//!                    └──── transient close ───┘            (any) ──error──▶ Failed
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::config::{RecognitionSettings, WatsonSocketConfig};
use super::messages::{SpeakerLabel, TranscriptionResult, WatsonMessage, encode_start, encode_stop};
use super::socket::{CloseError, SocketFactory, SocketListener, TransportSocket};
use crate::core::audio::AudioSink;
use crate::core::stt::base::{AsyncCallback, STTError, STTErrorCallback};

/// Audio chunks queued between the caller and the session task.
const AUDIO_QUEUE: usize = 512;

// =============================================================================
// Public types
// =============================================================================

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Listening,
    Stopping,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Caller hooks for a session.
///
/// `on_failure` fires at most once and nothing fires after it.
#[derive(Clone)]
pub struct SessionCallbacks {
    pub on_result: AsyncCallback<TranscriptionResult>,
    pub on_failure: Option<STTErrorCallback>,
    pub on_speaker_labels: Option<AsyncCallback<Vec<SpeakerLabel>>>,
}

impl SessionCallbacks {
    pub fn new(on_result: AsyncCallback<TranscriptionResult>) -> Self {
        Self {
            on_result,
            on_failure: None,
            on_speaker_labels: None,
        }
    }

    pub fn with_failure(mut self, on_failure: STTErrorCallback) -> Self {
        self.on_failure = Some(on_failure);
        self
    }

    pub fn with_speaker_labels(mut self, on_labels: AsyncCallback<Vec<SpeakerLabel>>) -> Self {
        self.on_speaker_labels = Some(on_labels);
        self
    }
}

enum Control {
    Stop,
    Cancel,
}

/// Ends the session gracefully. Clones share the same one-shot flag.
#[derive(Clone)]
pub struct StopHandle {
    fired: Arc<AtomicBool>,
    control: mpsc::UnboundedSender<Control>,
}

impl StopHandle {
    /// Send the stop frame and disconnect. Only the first call has any effect.
    pub fn stop(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.control.send(Control::Stop).is_err() {
            debug!("Stop requested after the session ended");
        }
    }
}

/// Caller-side handle of a running session.
pub struct SessionHandle {
    id: Uuid,
    audio: AudioSink,
    stop: StopHandle,
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<SessionState>,
    failure: Arc<Mutex<Option<STTError>>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn audio_sink(&self) -> AudioSink {
        self.audio.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Hard abort: disconnect without a stop frame. The session ends `Closed`.
    pub fn cancel(&self) {
        if self.control.send(Control::Cancel).is_err() {
            debug!("Cancel requested after the session ended");
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the session to end. `Err` carries the error that failed it.
    pub async fn closed(&self) -> Result<(), STTError> {
        let mut state = self.state.clone();
        let terminal = match state.wait_for(|s| s.is_terminal()).await {
            Ok(s) => *s,
            Err(_) => SessionState::Failed,
        };
        match terminal {
            SessionState::Failed => Err(self.failure.lock().clone().unwrap_or_else(|| {
                STTError::NetworkError("Session task ended unexpectedly".to_string())
            })),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// Socket listener
// =============================================================================

#[derive(Debug)]
enum SocketEvent {
    Open,
    Close(Option<CloseError>),
    Text(String),
}

/// Forwards socket callbacks into the session task, tagged with the socket generation.
struct ChannelListener {
    generation: u64,
    events: mpsc::UnboundedSender<(u64, SocketEvent)>,
}

impl ChannelListener {
    fn forward(&self, event: SocketEvent) {
        if self.events.send((self.generation, event)).is_err() {
            debug!(generation = self.generation, "Session gone, dropping socket event");
        }
    }
}

#[async_trait]
impl SocketListener for ChannelListener {
    async fn on_open(&self) {
        self.forward(SocketEvent::Open);
    }

    async fn on_close(&self, error: Option<CloseError>) {
        self.forward(SocketEvent::Close(error));
    }

    async fn on_text_message(&self, text: String) {
        self.forward(SocketEvent::Text(text));
    }
}

// =============================================================================
// Controller
// =============================================================================

/// The session state machine. Lives inside its own task; callers talk to it through
/// a [`SessionHandle`].
pub struct StreamingSession {
    id: Uuid,
    factory: Arc<dyn SocketFactory>,
    config: WatsonSocketConfig,
    start_frame: String,
    callbacks: SessionCallbacks,

    socket: Option<Box<dyn TransportSocket>>,
    /// Incremented per socket; events from older sockets are ignored.
    generation: u64,
    events_tx: mpsc::UnboundedSender<(u64, SocketEvent)>,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    failure: Arc<Mutex<Option<STTError>>>,

    /// Audio received before the start frame went out.
    pending: VecDeque<Bytes>,
    consecutive_transient: u32,
    /// The service acknowledged the current socket with `{"state":"listening"}`.
    acknowledged: bool,
    service_error: Option<String>,
    disconnect_requested: bool,
    deadline: Option<Instant>,
}

impl StreamingSession {
    /// Validate settings, open the first socket and spawn the session task.
    pub async fn start(
        factory: Arc<dyn SocketFactory>,
        config: WatsonSocketConfig,
        settings: RecognitionSettings,
        callbacks: SessionCallbacks,
    ) -> Result<SessionHandle, STTError> {
        settings.validate()?;
        let start_frame = encode_start(&settings)?;

        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_QUEUE);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let failure = Arc::new(Mutex::new(None));

        let mut session = Self {
            id,
            factory,
            config,
            start_frame,
            callbacks,
            socket: None,
            generation: 0,
            events_tx,
            state: SessionState::Idle,
            state_tx,
            failure: failure.clone(),
            pending: VecDeque::new(),
            consecutive_transient: 0,
            acknowledged: false,
            service_error: None,
            disconnect_requested: false,
            deadline: None,
        };

        let span = info_span!("watson_session", session_id = %id);
        session.open_socket().instrument(span.clone()).await?;

        tokio::spawn(
            session
                .run(control_rx, events_rx, audio_rx)
                .instrument(span),
        );

        Ok(SessionHandle {
            id,
            audio: AudioSink::new(audio_tx),
            stop: StopHandle {
                fired: Arc::new(AtomicBool::new(false)),
                control: control_tx.clone(),
            },
            control: control_tx,
            state: state_rx,
            failure,
        })
    }

    async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut events_rx: mpsc::UnboundedReceiver<(u64, SocketEvent)>,
        mut audio_rx: mpsc::Receiver<Bytes>,
    ) {
        while !self.state.is_terminal() {
            let deadline = self.deadline;
            let accepts_audio = self.accepts_audio();

            tokio::select! {
                biased;

                Some(control) = control_rx.recv() => {
                    self.handle_control(control, &mut audio_rx).await;
                }

                Some((generation, event)) = events_rx.recv() => {
                    if generation == self.generation {
                        self.handle_event(event).await;
                    } else {
                        debug!(generation, current = self.generation, "Ignoring event from a replaced socket");
                    }
                }

                Some(chunk) = audio_rx.recv(), if accepts_audio => {
                    self.handle_audio(chunk).await;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_deadline().await;
                }

                else => break,
            }
        }

        self.socket = None;
        debug!(session_id = %self.id, state = ?self.state, "Session task finished");
    }

    fn accepts_audio(&self) -> bool {
        matches!(self.state, SessionState::Connecting | SessionState::Listening)
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        info!(from = ?self.state, to = ?next, "Session state changed");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    /// Build a fresh socket and start connecting it.
    async fn open_socket(&mut self) -> Result<(), STTError> {
        self.generation += 1;
        self.acknowledged = false;

        let listener: Arc<dyn SocketListener> = Arc::new(ChannelListener {
            generation: self.generation,
            events: self.events_tx.clone(),
        });
        let mut socket = self.factory.create(listener);
        self.set_state(SessionState::Connecting);
        socket.connect().await?;
        self.socket = Some(socket);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Caller requests
    // -------------------------------------------------------------------------

    async fn handle_control(&mut self, control: Control, audio_rx: &mut mpsc::Receiver<Bytes>) {
        match (control, self.state) {
            (Control::Stop, SessionState::Idle | SessionState::Connecting) => {
                // The start frame was never written, so there is nothing to stop.
                info!("Stop requested before the socket opened");
                self.pending.clear();
                self.disconnect().await;
                self.set_state(SessionState::Closed);
            }
            (Control::Stop, SessionState::Listening) => {
                while let Ok(chunk) = audio_rx.try_recv() {
                    self.send_audio(chunk).await;
                }
                self.send_stop_frame().await;
            }
            (Control::Cancel, state) if !state.is_terminal() => {
                info!("Session cancelled");
                self.pending.clear();
                self.disconnect().await;
                self.set_state(SessionState::Closed);
            }
            _ => {}
        }
    }

    async fn send_stop_frame(&mut self) {
        let result = match self.socket.as_mut() {
            Some(socket) => socket.send_text(encode_stop().to_string()).await,
            None => Err(STTError::NotConnected),
        };
        if let Err(e) = result {
            warn!("Failed to send stop frame: {}", e);
        }
        self.set_state(SessionState::Stopping);

        if self.config.await_final_results {
            debug!("Waiting for final results before disconnecting");
            self.deadline = Some(Instant::now() + self.config.stop_timeout);
        } else {
            self.disconnect().await;
        }
    }

    /// Ask the socket to close; the session ends once it reports `on_close`.
    async fn disconnect(&mut self) {
        if self.disconnect_requested {
            return;
        }
        self.disconnect_requested = true;
        if let Some(socket) = self.socket.as_mut() {
            socket.disconnect().await;
        }
        self.deadline = Some(Instant::now() + self.config.stop_timeout);
    }

    async fn handle_deadline(&mut self) {
        self.deadline = None;
        if self.disconnect_requested {
            info!("Socket did not report close in time");
            self.set_state(SessionState::Closed);
        } else {
            warn!(
                "No final acknowledgement within {:?}, disconnecting",
                self.config.stop_timeout
            );
            self.disconnect().await;
        }
    }

    // -------------------------------------------------------------------------
    // Audio
    // -------------------------------------------------------------------------

    async fn handle_audio(&mut self, chunk: Bytes) {
        match self.state {
            SessionState::Listening => self.send_audio(chunk).await,
            SessionState::Connecting => {
                if self.pending.len() >= self.config.pending_audio_limit {
                    self.pending.pop_front();
                    warn!(
                        limit = self.config.pending_audio_limit,
                        "Pending audio buffer full, dropping oldest chunk"
                    );
                }
                self.pending.push_back(chunk);
            }
            _ => {}
        }
    }

    async fn send_audio(&mut self, chunk: Bytes) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        if let Err(e) = socket.send_binary(chunk).await {
            // A dead socket reports on_close; the close decides the outcome.
            warn!("Failed to send audio chunk: {}", e);
        }
    }

    // -------------------------------------------------------------------------
    // Socket events
    // -------------------------------------------------------------------------

    async fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Open => self.handle_open().await,
            SocketEvent::Text(text) => self.handle_text(&text).await,
            SocketEvent::Close(error) => self.handle_close(error).await,
        }
    }

    async fn handle_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "Ignoring open event");
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        info!("Socket open, sending start frame");
        if let Err(e) = socket.send_text(self.start_frame.clone()).await {
            self.fail(STTError::ConnectionFailed(format!(
                "Failed to send start frame: {e}"
            )))
            .await;
            return;
        }

        self.consecutive_transient = 0;
        self.set_state(SessionState::Listening);

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!("Flushing {} buffered audio chunks", pending.len());
        }
        for chunk in pending {
            self.send_audio(chunk).await;
        }
    }

    async fn handle_text(&mut self, text: &str) {
        if !matches!(self.state, SessionState::Listening | SessionState::Stopping) {
            debug!(state = ?self.state, "Ignoring text frame");
            return;
        }

        let message = match WatsonMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping inbound frame: {} - raw: {}", e, text);
                return;
            }
        };

        match message {
            WatsonMessage::State(state) if state.is_listening() => {
                self.handle_listening_ack().await;
            }
            WatsonMessage::State(state) => {
                debug!("Watson state change: {}", state.state);
            }
            WatsonMessage::Results(message) => {
                for result in message.results {
                    (self.callbacks.on_result)(result).await;
                }
                if let Some(labels) = message.speaker_labels {
                    self.dispatch_speaker_labels(labels).await;
                }
            }
            WatsonMessage::SpeakerLabels(message) => {
                self.dispatch_speaker_labels(message.speaker_labels).await;
            }
            WatsonMessage::Error(message) => {
                if message.is_inactivity_timeout() {
                    warn!("Watson inactivity timeout: {}", message.error);
                } else {
                    error!("Watson error: {}", message.error);
                }
                self.service_error = Some(message.error);
            }
        }
    }

    async fn handle_listening_ack(&mut self) {
        let first = !self.acknowledged;
        self.acknowledged = true;

        if first {
            info!("Watson is listening");
        }
        // After a stop frame the service acknowledges again once every final result is out.
        if self.state == SessionState::Stopping && !first && !self.disconnect_requested {
            debug!("Final results received");
            self.disconnect().await;
        }
    }

    async fn dispatch_speaker_labels(&mut self, labels: Vec<SpeakerLabel>) {
        match &self.callbacks.on_speaker_labels {
            Some(callback) => callback(labels).await,
            None => debug!("Received {} speaker labels (no callback)", labels.len()),
        }
    }

    async fn handle_close(&mut self, error: Option<CloseError>) {
        let Some(close) = error else {
            self.handle_clean_close().await;
            return;
        };

        let transient = self.config.is_transient_close(close.code);
        match self.state {
            SessionState::Stopping if transient => {
                info!(code = ?close.code, "Transient close after stop, ending session");
                self.set_state(SessionState::Closed);
            }
            SessionState::Connecting | SessionState::Listening if transient => {
                self.handle_transient_close(close).await;
            }
            SessionState::Connecting => {
                let reason = self.service_error.take().unwrap_or(close.reason);
                self.fail(STTError::ConnectionFailed(format!(
                    "{reason} (code {:?})",
                    close.code
                )))
                .await;
            }
            SessionState::Listening | SessionState::Stopping => {
                let err = match self.service_error.take() {
                    Some(message) if self.state != SessionState::Stopping => {
                        STTError::ProviderError(message)
                    }
                    _ => STTError::FatalDisconnect {
                        code: close.code,
                        reason: close.reason,
                    },
                };
                self.fail(err).await;
            }
            _ => {}
        }
    }

    async fn handle_clean_close(&mut self) {
        match self.state {
            SessionState::Stopping => {
                info!("Socket closed");
                self.set_state(SessionState::Closed);
            }
            SessionState::Listening => match self.service_error.take() {
                Some(message) => self.fail(STTError::ProviderError(message)).await,
                None => {
                    info!("Socket closed by the service");
                    self.set_state(SessionState::Closed);
                }
            },
            SessionState::Connecting => {
                self.fail(STTError::ConnectionFailed(
                    "Socket closed before it opened".to_string(),
                ))
                .await;
            }
            _ => {}
        }
    }

    async fn handle_transient_close(&mut self, close: CloseError) {
        if self.consecutive_transient >= self.config.max_transient_reconnects {
            self.fail(STTError::FatalDisconnect {
                code: close.code,
                reason: format!(
                    "{} (after {} reconnect attempt(s))",
                    close.reason, self.consecutive_transient
                ),
            })
            .await;
            return;
        }

        self.consecutive_transient += 1;
        warn!(
            code = ?close.code,
            attempt = self.consecutive_transient,
            "Transient disconnect, reconnecting: {}",
            close.reason
        );

        // The old socket already closed; audio it carried is not replayed.
        self.socket = None;
        if let Err(e) = self.open_socket().await {
            self.fail(STTError::TransientDisconnect {
                code: close.code,
                reason: format!("{}; reconnect failed: {e}", close.reason),
            })
            .await;
        }
    }

    async fn fail(&mut self, err: STTError) {
        if self.state.is_terminal() {
            return;
        }
        error!("Session failed: {}", err);

        self.socket = None;
        self.pending.clear();
        *self.failure.lock() = Some(err.clone());

        if let Some(callback) = &self.callbacks.on_failure {
            callback(err).await;
        }
        self.set_state(SessionState::Failed);
    }
}
