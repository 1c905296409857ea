use serde::Deserialize;
use std::path::Path;

use crate::core::stt::watson::RecognitionSettings;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values set here win over
/// environment variables.
///
/// # Example YAML structure
/// ```yaml
/// connection:
///   region: "eu-de"
///   instance_id: "your-instance-id"
///   access_token: "your-bearer-token"
///   model: "en-US_BroadbandModel"
///   learning_opt_out: true
///   customer_id: "acme"
///   connect_timeout_secs: 10
///
/// session:
///   max_transient_reconnects: 1
///   transient_close_codes: [101]
///   pending_audio_limit: 256
///   await_final_results: true
///   stop_timeout_ms: 5000
///
/// recognition:
///   content-type: "audio/l16;rate=16000"
///   interim_results: true
///   inactivity_timeout: -1
///   keywords: ["colorado", "tornado"]
///   keywords_threshold: 0.5
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub connection: Option<ConnectionYaml>,
    pub session: Option<SessionYaml>,
    pub recognition: Option<RecognitionSettings>,
}

/// Endpoint and authentication settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    /// Full recognize URL; takes precedence over region + instance_id
    pub url: Option<String>,
    pub region: Option<String>,
    pub instance_id: Option<String>,
    pub access_token: Option<String>,
    pub model: Option<String>,
    pub base_model_version: Option<String>,
    pub language_customization_id: Option<String>,
    pub acoustic_customization_id: Option<String>,
    pub learning_opt_out: Option<bool>,
    pub customer_id: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

/// Reconnect and shutdown policy from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub max_transient_reconnects: Option<u32>,
    pub transient_close_codes: Option<Vec<u16>>,
    pub pending_audio_limit: Option<usize>,
    pub await_final_results: Option<bool>,
    pub stop_timeout_ms: Option<u64>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
connection:
  url: "wss://stt.example.com/v1/recognize"
  region: "eu-gb"
  instance_id: "abc-123"
  access_token: "token"
  model: "en-GB_Multimedia"
  learning_opt_out: true
  customer_id: "acme"
  connect_timeout_secs: 12

session:
  max_transient_reconnects: 2
  transient_close_codes: [101, 1012]
  pending_audio_limit: 64
  await_final_results: true
  stop_timeout_ms: 2500

recognition:
  content-type: "audio/flac"
  interim_results: true
  max_alternatives: 3
  keywords: ["hello"]
  keywords_threshold: 0.4
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let connection = config.connection.unwrap();
        assert_eq!(connection.region, Some("eu-gb".to_string()));
        assert_eq!(connection.learning_opt_out, Some(true));
        assert_eq!(connection.connect_timeout_secs, Some(12));

        let session = config.session.unwrap();
        assert_eq!(session.transient_close_codes, Some(vec![101, 1012]));
        assert_eq!(session.stop_timeout_ms, Some(2500));

        let recognition = config.recognition.unwrap();
        assert_eq!(recognition.content_type, Some("audio/flac".to_string()));
        assert_eq!(recognition.max_alternatives, Some(3));
        assert_eq!(recognition.keywords, Some(vec!["hello".to_string()]));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
connection:
  instance_id: "only-this"
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.connection.unwrap().instance_id,
            Some("only-this".to_string())
        );
        assert!(config.session.is_none());
        assert!(config.recognition.is_none());
    }

    #[test]
    fn test_yaml_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("watson.yaml");
        fs::write(&config_path, "session:\n  await_final_results: true\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(config.session.unwrap().await_final_results, Some(true));
    }

    #[test]
    fn test_yaml_config_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.yaml");
        fs::write(&config_path, "connection: [not, a, map").unwrap();

        let err = YamlConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse YAML config"));
    }
}
