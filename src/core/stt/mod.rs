mod base;
pub mod watson;

// Re-export public types
pub use base::{AsyncCallback, CallbackFuture, STTError, STTErrorCallback};

// Re-export Watson implementation
pub use watson::{
    RecognitionSettings, ResultsAccumulator, SessionCallbacks, SessionHandle, SessionState,
    StopHandle, StreamingSession, TranscriptionResult, WatsonSocketConfig, WatsonWebSocketFactory,
};
