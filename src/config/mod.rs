//! Client configuration.
//!
//! Settings come from environment variables and an optional YAML file.
//! Priority: YAML > ENV vars > .env values > defaults. The `.env` file is loaded by
//! the binary at startup, so it simply shows up as environment variables here.
//!
//! # Example
//! ```rust,no_run
//! use watson_stt_stream::config::ClientConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ClientConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ClientConfig::from_file(&PathBuf::from("watson.yaml"))?;
//! println!("Connecting to {}", config.socket.build_websocket_url()?);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

mod yaml;

pub use yaml::{ConnectionYaml, SessionYaml, YamlConfig};

use crate::core::stt::watson::{RecognitionSettings, WatsonRegion, WatsonSocketConfig};

type ConfigResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Everything needed to run a streaming session.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub socket: WatsonSocketConfig,
    pub recognition: RecognitionSettings,
}

impl ClientConfig {
    /// Load configuration from environment variables, with defaults for anything unset.
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self::merge(None)?;
        config.recognition.validate()?;
        Ok(config)
    }

    /// Load a YAML file on top of the environment.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - The merged recognition settings are invalid
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let yaml_config = YamlConfig::from_file(path)?;
        let config = Self::merge(Some(yaml_config))?;
        config.recognition.validate()?;
        Ok(config)
    }

    fn merge(yaml: Option<YamlConfig>) -> ConfigResult<Self> {
        let yaml = yaml.unwrap_or_default();
        let connection = yaml.connection.unwrap_or_default();
        let session = yaml.session.unwrap_or_default();

        let mut socket = WatsonSocketConfig::default();

        socket.url = connection.url.or_else(|| env_var("WATSON_STT_URL"));
        if let Some(region) = connection.region.or_else(|| env_var("WATSON_STT_REGION")) {
            socket.region = WatsonRegion::from_str(&region)?;
        }
        socket.instance_id = connection
            .instance_id
            .or_else(|| env_var("WATSON_STT_INSTANCE_ID"));
        socket.access_token = connection
            .access_token
            .or_else(|| env_var("WATSON_STT_ACCESS_TOKEN"))
            .map(Zeroizing::new);
        socket.model = connection.model.or_else(|| env_var("WATSON_STT_MODEL"));
        socket.base_model_version = connection.base_model_version;
        socket.language_customization_id = connection
            .language_customization_id
            .or_else(|| env_var("WATSON_STT_LANGUAGE_CUSTOMIZATION_ID"));
        socket.acoustic_customization_id = connection
            .acoustic_customization_id
            .or_else(|| env_var("WATSON_STT_ACOUSTIC_CUSTOMIZATION_ID"));
        socket.learning_opt_out = match connection.learning_opt_out {
            Some(value) => Some(value),
            None => env_bool("WATSON_STT_LEARNING_OPT_OUT")?,
        };
        socket.customer_id = connection.customer_id;

        let connect_timeout_secs = match connection.connect_timeout_secs {
            Some(secs) => Some(secs),
            None => env_parse::<u64>("WATSON_STT_CONNECT_TIMEOUT_SECS")?,
        };
        if let Some(secs) = connect_timeout_secs {
            socket.connect_timeout = Duration::from_secs(secs);
        }

        let max_reconnects = match session.max_transient_reconnects {
            Some(n) => Some(n),
            None => env_parse::<u32>("WATSON_STT_MAX_RECONNECTS")?,
        };
        if let Some(n) = max_reconnects {
            socket.max_transient_reconnects = n;
        }
        if let Some(codes) = session.transient_close_codes {
            socket.transient_close_codes = codes;
        }
        if let Some(limit) = session.pending_audio_limit {
            socket.pending_audio_limit = limit;
        }
        if let Some(await_final) = session.await_final_results {
            socket.await_final_results = await_final;
        }
        if let Some(ms) = session.stop_timeout_ms {
            socket.stop_timeout = Duration::from_millis(ms);
        }

        Ok(Self {
            socket,
            recognition: yaml.recognition.unwrap_or_default(),
        })
    }
}

/// Non-empty, trimmed environment variable.
fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {raw} ({e})").into()),
        None => Ok(None),
    }
}

fn env_bool(name: &str) -> ConfigResult<Option<bool>> {
    match env_var(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(None),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(Some(true)),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(Some(false)),
        Some(v) => Err(format!("Invalid value for {name}: {v} (expected true or false)").into()),
    }
}
