//! Watson Speech-to-Text WebSocket message types.
//!
//! Outbound, the client only ever writes two text frames: the `start` frame built
//! from [`RecognitionSettings`] and the literal `{"action":"stop"}` frame. Inbound,
//! the service sends state acknowledgements, recognition results, speaker labels
//! and error notifications, all as JSON text frames.

use super::config::RecognitionSettings;
use crate::core::stt::base::STTError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Start/Stop Messages (Client to Server)
// =============================================================================

/// The terminal control frame.
pub const STOP_FRAME: &str = r#"{"action":"stop"}"#;

/// Start frame: the settings with a leading `"action":"start"` field.
#[derive(Serialize)]
struct StartMessage<'a> {
    action: &'static str,
    #[serde(flatten)]
    settings: &'a RecognitionSettings,
}

/// Serialize settings into the single-line `start` text frame.
///
/// Deterministic: equal settings always produce byte-identical output.
pub fn encode_start(settings: &RecognitionSettings) -> Result<String, STTError> {
    serde_json::to_string(&StartMessage {
        action: "start",
        settings,
    })
    .map_err(|e| STTError::ConfigurationError(format!("Failed to encode start frame: {e}")))
}

/// The `stop` text frame.
pub fn encode_stop() -> &'static str {
    STOP_FRAME
}

// =============================================================================
// Main Response Types
// =============================================================================

/// Inbound text frame from the recognize endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WatsonMessage {
    /// Recognition results, possibly with speaker labels attached.
    Results(ResultsMessage),
    /// Service-side error notification.
    Error(ErrorMessage),
    /// Standalone speaker labels.
    SpeakerLabels(SpeakerLabelsMessage),
    /// State notification, e.g. the `listening` acknowledgement.
    State(StateMessage),
}

impl WatsonMessage {
    /// Parse and validate a text frame.
    ///
    /// Non-JSON input, JSON that matches none of the known shapes, and values that
    /// break the result invariants all yield [`STTError::MalformedResponse`].
    pub fn parse(text: &str) -> Result<Self, STTError> {
        let mut message: Self = serde_json::from_str(text)
            .map_err(|e| STTError::MalformedResponse(format!("{e}")))?;

        match &mut message {
            Self::Results(results) => {
                results.validate().map_err(STTError::MalformedResponse)?;
                results
                    .assign_indices()
                    .map_err(STTError::MalformedResponse)?;
            }
            Self::SpeakerLabels(labels) => {
                validate_speaker_labels(&labels.speaker_labels)
                    .map_err(STTError::MalformedResponse)?;
            }
            Self::Error(_) | Self::State(_) => {}
        }

        Ok(message)
    }

    /// Whether this is the `{"state":"listening"}` acknowledgement.
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::State(state) if state.is_listening())
    }
}

// =============================================================================
// Recognition Results
// =============================================================================

/// Recognition results message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResultsMessage {
    pub results: Vec<TranscriptionResult>,
    /// Session-wide index of the first entry in `results`.
    #[serde(default)]
    pub result_index: usize,
    #[serde(default)]
    pub speaker_labels: Option<Vec<SpeakerLabel>>,
}

impl ResultsMessage {
    fn validate(&self) -> Result<(), String> {
        for result in &self.results {
            result.validate()?;
        }
        if let Some(labels) = &self.speaker_labels {
            validate_speaker_labels(labels)?;
        }
        Ok(())
    }

    fn assign_indices(&mut self) -> Result<(), String> {
        let base = self.result_index;
        for (offset, result) in self.results.iter_mut().enumerate() {
            result.result_index = base
                .checked_add(offset)
                .ok_or_else(|| format!("result_index {base} overflows at offset {offset}"))?;
        }
        Ok(())
    }
}

/// One incremental or final recognition event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptionResult {
    /// The service will not revise this segment any further.
    #[serde(rename = "final")]
    pub is_final: bool,

    /// Hypotheses, best first.
    pub alternatives: Vec<Alternative>,

    /// Keyword spotting matches, keyed by the requested keyword.
    #[serde(default, rename = "keywords_result")]
    pub keyword_results: Option<HashMap<String, Vec<KeywordMatch>>>,

    /// Word alternatives (confusion network).
    #[serde(default)]
    pub word_alternatives: Option<Vec<WordAlternativeSet>>,

    /// `end_of_data`, `end_of_utterance`, ... when the service reports why a result ended.
    #[serde(default)]
    pub end_of_utterance: Option<String>,

    /// Position of this result within the session.
    #[serde(skip)]
    pub result_index: usize,
}

impl TranscriptionResult {
    /// The best alternative, if any.
    pub fn best(&self) -> Option<&Alternative> {
        self.alternatives.first()
    }

    /// Transcript of the best alternative, or an empty string.
    pub fn transcript(&self) -> &str {
        self.best().map(|alt| alt.transcript.as_str()).unwrap_or("")
    }

    fn validate(&self) -> Result<(), String> {
        for alternative in &self.alternatives {
            check_confidence("alternative", alternative.confidence)?;
            for stamp in alternative.timestamps.iter().flatten() {
                check_span(&stamp.word, stamp.start_time, stamp.end_time)?;
            }
            for word in alternative.word_confidence.iter().flatten() {
                check_confidence(&word.word, Some(word.confidence))?;
            }
        }
        for (keyword, matches) in self.keyword_results.iter().flatten() {
            for m in matches {
                check_span(keyword, m.start_time, m.end_time)?;
                check_confidence(keyword, Some(m.confidence))?;
            }
        }
        for set in self.word_alternatives.iter().flatten() {
            check_span("word alternatives", set.start_time, set.end_time)?;
            for alt in &set.alternatives {
                check_confidence(&alt.word, Some(alt.confidence))?;
            }
        }
        Ok(())
    }
}

/// Transcription alternative (hypothesis).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    /// Only present on the best alternative of a final result.
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub timestamps: Option<Vec<WordTimestamp>>,
    #[serde(default)]
    pub word_confidence: Option<Vec<WordConfidence>>,
}

/// Word timing, sent as `[word, start_time, end_time]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(String, f64, f64)")]
pub struct WordTimestamp {
    pub word: String,
    pub start_time: f64,
    pub end_time: f64,
}

impl From<(String, f64, f64)> for WordTimestamp {
    fn from((word, start_time, end_time): (String, f64, f64)) -> Self {
        Self {
            word,
            start_time,
            end_time,
        }
    }
}

/// Word confidence, sent as `[word, confidence]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "(String, f64)")]
pub struct WordConfidence {
    pub word: String,
    pub confidence: f64,
}

impl From<(String, f64)> for WordConfidence {
    fn from((word, confidence): (String, f64)) -> Self {
        Self { word, confidence }
    }
}

/// A spotted keyword.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeywordMatch {
    pub normalized_text: String,
    pub start_time: f64,
    pub end_time: f64,
    pub confidence: f64,
}

/// Alternative words for one time span.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WordAlternativeSet {
    pub start_time: f64,
    pub end_time: f64,
    pub alternatives: Vec<WordAlternative>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WordAlternative {
    pub word: String,
    pub confidence: f64,
}

fn check_confidence(what: &str, confidence: Option<f64>) -> Result<(), String> {
    match confidence {
        Some(c) if !(0.0..=1.0).contains(&c) => {
            Err(format!("confidence {c} for '{what}' is outside [0, 1]"))
        }
        _ => Ok(()),
    }
}

fn check_span(what: &str, start: f64, end: f64) -> Result<(), String> {
    if end < start {
        return Err(format!("'{what}' ends ({end}) before it starts ({start})"));
    }
    Ok(())
}

// =============================================================================
// State Messages
// =============================================================================

/// State notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateMessage {
    pub state: String,
}

impl StateMessage {
    pub fn is_listening(&self) -> bool {
        self.state == "listening"
    }
}

// =============================================================================
// Speaker Labels
// =============================================================================

/// Speaker labels message for speaker diarization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeakerLabelsMessage {
    pub speaker_labels: Vec<SpeakerLabel>,
}

/// Individual speaker label entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpeakerLabel {
    /// Start time of the segment in seconds.
    pub from: f64,
    /// End time of the segment in seconds.
    pub to: f64,
    /// Speaker identifier (0, 1, 2, ...).
    pub speaker: i32,
    pub confidence: f64,
    #[serde(rename = "final")]
    pub is_final: bool,
}

fn validate_speaker_labels(labels: &[SpeakerLabel]) -> Result<(), String> {
    for label in labels {
        check_span("speaker label", label.from, label.to)?;
        check_confidence("speaker label", Some(label.confidence))?;
    }
    Ok(())
}

// =============================================================================
// Error Messages
// =============================================================================

/// Error message from the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl ErrorMessage {
    /// Whether the service is about to close the session for lack of audio.
    pub fn is_inactivity_timeout(&self) -> bool {
        self.error.contains("inactivity")
            || self.error.contains("No speech detected")
            || self.code == Some(408)
    }
}

// =============================================================================
// Tests
// =============================================================================
