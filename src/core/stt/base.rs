//! Shared error and callback types for streaming speech-to-text sessions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by a streaming recognition session.
///
/// `MalformedResponse` is recovered inside the session (the frame is dropped) and
/// never reaches the failure callback. Every other variant is delivered at most once.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum STTError {
    /// The socket could not be opened.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The socket closed with a retryable code, but the replacement socket could not
    /// be started.
    #[error("Transient disconnect (code {code:?}): {reason}")]
    TransientDisconnect { code: Option<u16>, reason: String },

    /// The socket closed with a non-retryable code, or transient closes kept repeating.
    #[error("Fatal disconnect (code {code:?}): {reason}")]
    FatalDisconnect { code: Option<u16>, reason: String },

    /// An inbound frame could not be decoded.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A frame was written before the socket opened, or after the session ended.
    #[error("Not connected")]
    NotConnected,

    /// Invalid recognition settings or client configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The service reported an error and then ended the session.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Writing to an open socket failed.
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl STTError {
    /// Close code carried by a disconnect error, if any.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::TransientDisconnect { code, .. } | Self::FatalDisconnect { code, .. } => *code,
            _ => None,
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Boxed future returned by session callbacks.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Async callback invoked for every dispatched value of type `T`.
pub type AsyncCallback<T> = Arc<dyn Fn(T) -> CallbackFuture + Send + Sync>;

/// Terminal failure callback.
pub type STTErrorCallback = AsyncCallback<STTError>;
