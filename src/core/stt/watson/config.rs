//! Watson Speech-to-Text streaming configuration.
//!
//! Two kinds of settings live here:
//!
//! - [`RecognitionSettings`]: the per-request parameters serialized into the
//!   `start` control frame.
//! - [`WatsonSocketConfig`]: how to reach the recognize endpoint (URL, query
//!   parameters, headers) and the session's reconnection policy.

use crate::core::stt::base::STTError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use url::form_urlencoded;
use zeroize::Zeroizing;

// =============================================================================
// Constants
// =============================================================================

/// Close code historically reported when the HTTP upgrade could not be completed.
pub const TRANSIENT_CLOSE_CODE: u16 = 101;

/// Default number of reconnect attempts after a transient close.
pub const DEFAULT_MAX_TRANSIENT_RECONNECTS: u32 = 1;

/// Default timeout for opening the socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time to wait for the service to acknowledge a stop frame.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of audio chunks held back until the start frame is written.
pub const DEFAULT_PENDING_AUDIO_LIMIT: usize = 256;

// =============================================================================
// Region Configuration
// =============================================================================

/// Watson Speech-to-Text service regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatsonRegion {
    /// Dallas, Texas (US South)
    #[default]
    UsSouth,
    /// Washington, D.C. (US East)
    UsEast,
    /// Frankfurt, Germany
    EuDe,
    /// London, UK
    EuGb,
    /// Sydney, Australia
    AuSyd,
    /// Tokyo, Japan
    JpTok,
    /// Seoul, South Korea
    KrSeo,
}

impl WatsonRegion {
    /// Speech-to-Text API hostname for this region.
    pub fn stt_hostname(&self) -> &'static str {
        match self {
            Self::UsSouth => "api.us-south.speech-to-text.watson.cloud.ibm.com",
            Self::UsEast => "api.us-east.speech-to-text.watson.cloud.ibm.com",
            Self::EuDe => "api.eu-de.speech-to-text.watson.cloud.ibm.com",
            Self::EuGb => "api.eu-gb.speech-to-text.watson.cloud.ibm.com",
            Self::AuSyd => "api.au-syd.speech-to-text.watson.cloud.ibm.com",
            Self::JpTok => "api.jp-tok.speech-to-text.watson.cloud.ibm.com",
            Self::KrSeo => "api.kr-seo.speech-to-text.watson.cloud.ibm.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UsSouth => "us-south",
            Self::UsEast => "us-east",
            Self::EuDe => "eu-de",
            Self::EuGb => "eu-gb",
            Self::AuSyd => "au-syd",
            Self::JpTok => "jp-tok",
            Self::KrSeo => "kr-seo",
        }
    }
}

impl std::fmt::Display for WatsonRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WatsonRegion {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "us-south" => Ok(Self::UsSouth),
            "us-east" => Ok(Self::UsEast),
            "eu-de" => Ok(Self::EuDe),
            "eu-gb" => Ok(Self::EuGb),
            "au-syd" => Ok(Self::AuSyd),
            "jp-tok" => Ok(Self::JpTok),
            "kr-seo" => Ok(Self::KrSeo),
            other => Err(STTError::ConfigurationError(format!(
                "Unknown Watson region: {other}"
            ))),
        }
    }
}

// =============================================================================
// Audio Encoding
// =============================================================================

/// Audio encodings accepted by the recognize interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioEncoding {
    /// Linear PCM 16-bit little-endian signed integer.
    #[default]
    Linear16,
    Mulaw,
    Alaw,
    Flac,
    /// Opus in an OGG container.
    OggOpus,
    /// Opus in a WebM container.
    WebmOpus,
    Mp3,
    Wav,
}

impl AudioEncoding {
    /// Content-type MIME string for this encoding.
    pub fn content_type(&self, sample_rate: u32) -> String {
        match self {
            Self::Linear16 => format!("audio/l16;rate={};channels=1", sample_rate),
            Self::Mulaw => format!("audio/mulaw;rate={}", sample_rate),
            Self::Alaw => format!("audio/alaw;rate={}", sample_rate),
            Self::Flac => "audio/flac".to_string(),
            Self::OggOpus => "audio/ogg;codecs=opus".to_string(),
            Self::WebmOpus => "audio/webm;codecs=opus".to_string(),
            Self::Mp3 => "audio/mp3".to_string(),
            Self::Wav => "audio/wav".to_string(),
        }
    }
}

impl FromStr for AudioEncoding {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear16" | "pcm" | "l16" => Ok(Self::Linear16),
            "mulaw" | "mu-law" => Ok(Self::Mulaw),
            "alaw" | "a-law" => Ok(Self::Alaw),
            "flac" => Ok(Self::Flac),
            "ogg-opus" | "opus" => Ok(Self::OggOpus),
            "webm-opus" => Ok(Self::WebmOpus),
            "mp3" => Ok(Self::Mp3),
            "wav" => Ok(Self::Wav),
            other => Err(STTError::ConfigurationError(format!(
                "Unsupported audio encoding: {other}"
            ))),
        }
    }
}

// =============================================================================
// Recognition Settings
// =============================================================================

/// Parameters of one recognition request, sent in the `start` frame.
///
/// `None` fields are omitted from the frame and fall back to the service defaults.
/// Settings are cloned into the session when it starts and never change afterwards;
/// the same value is re-sent after a transient reconnect.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Format of the audio data, e.g. `audio/l16;rate=16000`.
    #[serde(rename = "content-type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Weight given to the custom language model, in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customization_weight: Option<f64>,

    /// Seconds of silence before the service closes the connection. `-1` means never.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inactivity_timeout: Option<i32>,

    /// Keywords to spot in the audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,

    /// Minimum confidence for a keyword match, in [0, 1]. Requires `keywords`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords_threshold: Option<f64>,

    /// Maximum number of alternative transcripts per result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_alternatives: Option<u32>,

    /// Receive non-final results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interim_results: Option<bool>,

    /// Minimum confidence for a word alternative, in [0, 1].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_alternatives_threshold: Option<f64>,

    /// Per-word confidence scores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_confidence: Option<bool>,

    /// Per-word start and end times.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<bool>,

    /// Censor profanity in transcripts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profanity_filter: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub smart_formatting: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_labels: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction: Option<bool>,

    /// Keep recognizing across pauses instead of ending at the first one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuous: Option<bool>,
}

impl RecognitionSettings {
    /// Settings with only the content type set.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Default::default()
        }
    }

    /// Settings for raw audio in the given encoding and sample rate.
    pub fn for_encoding(encoding: AudioEncoding, sample_rate: u32) -> Self {
        Self::new(encoding.content_type(sample_rate))
    }

    /// Check the settings before they are sent.
    pub fn validate(&self) -> Result<(), STTError> {
        if let Some(content_type) = &self.content_type {
            if content_type.trim().is_empty() {
                return Err(STTError::ConfigurationError(
                    "content-type must not be empty".to_string(),
                ));
            }
        }

        if self.keywords_threshold.is_some()
            && self.keywords.as_ref().is_none_or(|k| k.is_empty())
        {
            return Err(STTError::ConfigurationError(
                "keywords_threshold requires at least one keyword".to_string(),
            ));
        }

        check_unit_interval("keywords_threshold", self.keywords_threshold)?;
        check_unit_interval(
            "word_alternatives_threshold",
            self.word_alternatives_threshold,
        )?;
        check_unit_interval("customization_weight", self.customization_weight)?;

        if self.max_alternatives == Some(0) {
            return Err(STTError::ConfigurationError(
                "max_alternatives must be at least 1".to_string(),
            ));
        }

        if self.inactivity_timeout.is_some_and(|t| t < -1) {
            return Err(STTError::ConfigurationError(
                "inactivity_timeout must be -1 (infinite) or a non-negative number of seconds"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn check_unit_interval(name: &str, value: Option<f64>) -> Result<(), STTError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(STTError::ConfigurationError(format!(
            "{name} must be between 0 and 1, got {v}"
        ))),
        _ => Ok(()),
    }
}

// =============================================================================
// Socket Configuration
// =============================================================================

/// Endpoint, authentication and reconnection settings for a streaming session.
#[derive(Clone)]
pub struct WatsonSocketConfig {
    /// Full recognize URL. Overrides `region` + `instance_id` when set.
    pub url: Option<String>,

    pub region: WatsonRegion,

    /// Service instance ID, used to build the URL when `url` is not set.
    pub instance_id: Option<String>,

    /// Bearer token passed as the `access_token` query parameter.
    pub access_token: Option<Zeroizing<String>>,

    /// Recognition model, e.g. `en-US_BroadbandModel`.
    pub model: Option<String>,

    pub base_model_version: Option<String>,

    pub language_customization_id: Option<String>,

    pub acoustic_customization_id: Option<String>,

    /// Ask the service not to use this request for training.
    pub learning_opt_out: Option<bool>,

    /// Sent as `X-Watson-Metadata: customer_id=<id>`.
    pub customer_id: Option<String>,

    pub connect_timeout: Duration,

    /// Reconnect attempts allowed after consecutive transient closes.
    pub max_transient_reconnects: u32,

    /// Close codes treated as transient.
    pub transient_close_codes: Vec<u16>,

    /// Audio chunks buffered while the start frame is not yet written.
    /// The oldest chunk is dropped when the limit is reached.
    pub pending_audio_limit: usize,

    /// Keep the socket open after `stop` until the service acknowledges it.
    pub await_final_results: bool,

    /// Upper bound on the wait enabled by `await_final_results`.
    pub stop_timeout: Duration,
}

impl Default for WatsonSocketConfig {
    fn default() -> Self {
        Self {
            url: None,
            region: WatsonRegion::default(),
            instance_id: None,
            access_token: None,
            model: None,
            base_model_version: None,
            language_customization_id: None,
            acoustic_customization_id: None,
            learning_opt_out: None,
            customer_id: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_transient_reconnects: DEFAULT_MAX_TRANSIENT_RECONNECTS,
            transient_close_codes: vec![TRANSIENT_CLOSE_CODE],
            pending_audio_limit: DEFAULT_PENDING_AUDIO_LIMIT,
            await_final_results: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for WatsonSocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatsonSocketConfig")
            .field("url", &self.url)
            .field("region", &self.region)
            .field("instance_id", &self.instance_id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("model", &self.model)
            .field("base_model_version", &self.base_model_version)
            .field("language_customization_id", &self.language_customization_id)
            .field("acoustic_customization_id", &self.acoustic_customization_id)
            .field("learning_opt_out", &self.learning_opt_out)
            .field("customer_id", &self.customer_id)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_transient_reconnects", &self.max_transient_reconnects)
            .field("transient_close_codes", &self.transient_close_codes)
            .field("pending_audio_limit", &self.pending_audio_limit)
            .field("await_final_results", &self.await_final_results)
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

impl WatsonSocketConfig {
    /// Config that connects to an explicit recognize URL.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Whether a close code should trigger a reconnect.
    pub fn is_transient_close(&self, code: Option<u16>) -> bool {
        code.is_some_and(|c| self.transient_close_codes.contains(&c))
    }

    /// Build the WebSocket URL, including query parameters.
    pub fn build_websocket_url(&self) -> Result<String, STTError> {
        let base_url = match (&self.url, &self.instance_id) {
            (Some(url), _) if !url.trim().is_empty() => url.trim().to_string(),
            (_, Some(instance_id)) if !instance_id.trim().is_empty() => format!(
                "wss://{}/instances/{}/v1/recognize",
                self.region.stt_hostname(),
                instance_id.trim()
            ),
            _ => {
                return Err(STTError::ConfigurationError(
                    "Either a recognize url or an instance_id is required".to_string(),
                ));
            }
        };

        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some(token) = &self.access_token {
            query.append_pair("access_token", token.as_str());
        }
        if let Some(model) = &self.model {
            query.append_pair("model", model);
        }
        if let Some(version) = &self.base_model_version {
            query.append_pair("base_model_version", version);
        }
        if let Some(id) = &self.language_customization_id {
            query.append_pair("language_customization_id", id);
        }
        if let Some(id) = &self.acoustic_customization_id {
            query.append_pair("acoustic_customization_id", id);
        }
        if let Some(opt_out) = self.learning_opt_out {
            query.append_pair("x-watson-learning-opt-out", &opt_out.to_string());
        }
        let query = query.finish();

        if query.is_empty() {
            return Ok(base_url);
        }
        let separator = if base_url.contains('?') { '&' } else { '?' };
        Ok(format!("{base_url}{separator}{query}"))
    }

    /// Extra headers for the upgrade request.
    pub fn request_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(customer_id) = &self.customer_id {
            headers.push(("X-Watson-Metadata", format!("customer_id={customer_id}")));
        }
        headers
    }

    /// Check the endpoint can be derived and the policy values make sense.
    pub fn validate(&self) -> Result<(), STTError> {
        self.build_websocket_url()?;
        if self.connect_timeout.is_zero() {
            return Err(STTError::ConfigurationError(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }
        if self.pending_audio_limit == 0 {
            return Err(STTError::ConfigurationError(
                "pending_audio_limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
