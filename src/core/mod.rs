pub mod audio;
pub mod stt;

// Re-export commonly used types for convenience
pub use audio::{AudioSink, AudioSourceError, BufferSource, WavFileSource};
pub use stt::{
    RecognitionSettings, STTError, SessionCallbacks, SessionHandle, SessionState, StopHandle,
    StreamingSession, TranscriptionResult, WatsonSocketConfig, WatsonWebSocketFactory,
};
