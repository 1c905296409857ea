//! Audio capture sources.
//!
//! A session consumes raw audio as a sequence of byte chunks pushed through an
//! [`AudioSink`]. Live capture pushes from its own thread with [`AudioSink::push`];
//! file-based transcription uses a [`BufferSource`], optionally built from a WAV file.

use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::core::stt::STTError;

/// Default chunk size for file streaming (100 ms of 16 kHz mono L16).
pub const DEFAULT_CHUNK_BYTES: usize = 3200;

// =============================================================================
// Sink
// =============================================================================

/// Cloneable handle for feeding audio into a running session.
#[derive(Debug, Clone)]
pub struct AudioSink {
    tx: mpsc::Sender<Bytes>,
}

impl AudioSink {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Queue a chunk without waiting. Safe to call from a non-async capture thread.
    pub fn push(&self, chunk: impl Into<Bytes>) -> Result<(), STTError> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        match self.tx.try_send(chunk) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(STTError::NetworkError("Audio queue is full".to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(STTError::NotConnected),
        }
    }

    /// Queue a chunk, waiting for room in the queue.
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), STTError> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx.send(chunk).await.map_err(|_| STTError::NotConnected)
    }

    /// The session no longer accepts audio.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// Static buffer
// =============================================================================

/// Splits a static buffer into fixed-size chunks.
#[derive(Debug, Clone)]
pub struct BufferSource {
    data: Bytes,
    chunk_bytes: usize,
    pacing: Option<Duration>,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>, chunk_bytes: usize) -> Self {
        Self {
            data: data.into(),
            chunk_bytes: chunk_bytes.max(1),
            pacing: None,
        }
    }

    /// Wait `interval` between chunks to mimic live capture.
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Zero-copy chunks; the last one may be short.
    pub fn chunks(&self) -> impl Iterator<Item = Bytes> + '_ {
        (0..self.data.len())
            .step_by(self.chunk_bytes)
            .map(|start| self.data.slice(start..(start + self.chunk_bytes).min(self.data.len())))
    }

    /// Push every chunk into `sink`. Returns the number of chunks sent.
    pub async fn stream_into(&self, sink: &AudioSink) -> Result<usize, STTError> {
        let mut sent = 0;
        for chunk in self.chunks() {
            if sent > 0 {
                if let Some(interval) = self.pacing {
                    tokio::time::sleep(interval).await;
                }
            }
            sink.send(chunk).await?;
            sent += 1;
        }
        debug!("Streamed {} bytes in {} chunks", self.data.len(), sent);
        Ok(sent)
    }
}

// =============================================================================
// WAV files
// =============================================================================

#[derive(Debug, Error)]
pub enum AudioSourceError {
    #[error("Failed to read WAV file: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV format: {0}")]
    UnsupportedFormat(String),
}

/// 16-bit PCM WAV file decoded to little-endian L16.
#[derive(Debug, Clone)]
pub struct WavFileSource {
    sample_rate: u32,
    channels: u16,
    data: Bytes,
}

impl WavFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioSourceError> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        debug!("Loading WAV file: {:?}, spec: {:?}", path.as_ref(), spec);

        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(AudioSourceError::UnsupportedFormat(format!(
                "{:?} with {} bits per sample (expected 16-bit PCM)",
                spec.sample_format, spec.bits_per_sample
            )));
        }

        let mut data = Vec::with_capacity(reader.len() as usize * 2);
        for sample in reader.samples::<i16>() {
            data.extend_from_slice(&sample?.to_le_bytes());
        }

        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            data: Bytes::from(data),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration(&self) -> Duration {
        let frames = self.data.len() as u64 / (2 * u64::from(self.channels.max(1)));
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate.max(1)))
    }

    /// Content type announcing the decoded samples.
    pub fn content_type(&self) -> String {
        format!(
            "audio/l16;rate={};channels={};endianness=little-endian",
            self.sample_rate, self.channels
        )
    }

    pub fn into_buffer(self, chunk_bytes: usize) -> BufferSource {
        BufferSource::new(self.data, chunk_bytes)
    }
}
