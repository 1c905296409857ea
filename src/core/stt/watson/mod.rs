//! Watson Speech-to-Text streaming over the WebSocket recognize interface.
//!
//! A session opens one socket, writes a JSON `start` frame built from
//! [`RecognitionSettings`], streams raw audio as binary frames and ends with a
//! `{"action":"stop"}` frame. Inbound text frames carry `{"state":"listening"}`
//! acknowledgements, incremental [`TranscriptionResult`]s, speaker labels and
//! service errors.
//!
//! # Reconnects
//!
//! A close with a transient code (`101` by default) replaces the socket once and
//! resends the start frame. Audio already written to the old socket is not
//! replayed. Any other abnormal close, or a second transient close in a row, fails
//! the session.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watson_stt_stream::core::stt::CallbackFuture;
//! use watson_stt_stream::core::stt::watson::{
//!     RecognitionSettings, SessionCallbacks, StreamingSession, TranscriptionResult,
//!     WatsonSocketConfig, WatsonWebSocketFactory,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WatsonSocketConfig {
//!         instance_id: Some("my-instance".to_string()),
//!         ..Default::default()
//!     };
//!     let factory = Arc::new(WatsonWebSocketFactory::new(&config)?);
//!
//!     let mut settings = RecognitionSettings::new("audio/l16;rate=16000");
//!     settings.interim_results = Some(true);
//!
//!     let callbacks = SessionCallbacks::new(Arc::new(|result: TranscriptionResult| -> CallbackFuture {
//!         Box::pin(async move {
//!             println!("{} (final: {})", result.transcript(), result.is_final);
//!         })
//!     }));
//!
//!     let session = StreamingSession::start(factory, config, settings, callbacks).await?;
//!     session.audio_sink().push(vec![0u8; 3200])?;
//!     session.stop();
//!     session.closed().await?;
//!     Ok(())
//! }
//! ```

mod accumulator;
mod config;
mod messages;
mod session;
mod socket;


pub use accumulator::ResultsAccumulator;
pub use config::{
    AudioEncoding, DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_TRANSIENT_RECONNECTS,
    DEFAULT_PENDING_AUDIO_LIMIT, DEFAULT_STOP_TIMEOUT, RecognitionSettings, TRANSIENT_CLOSE_CODE,
    WatsonRegion, WatsonSocketConfig,
};
pub use messages::{
    Alternative, ErrorMessage, KeywordMatch, ResultsMessage, STOP_FRAME, SpeakerLabel,
    SpeakerLabelsMessage, StateMessage, TranscriptionResult, WatsonMessage, WordAlternative,
    WordAlternativeSet, WordConfidence, WordTimestamp, encode_start, encode_stop,
};
pub use session::{SessionCallbacks, SessionHandle, SessionState, StopHandle, StreamingSession};
pub use socket::{
    CloseError, SocketFactory, SocketListener, TransportSocket, WatsonWebSocket,
    WatsonWebSocketFactory,
};
