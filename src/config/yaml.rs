use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional; anything absent falls back to the environment
/// and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// api:
///   key: "sk-..."
///   base_url: "https://api.openai.com/v1"
///   ws_url: "wss://api.openai.com/v1/realtime"
///
/// session:
///   model: "gpt-4o-realtime-preview"
///   voice: "alloy"
///   description: "car"
///
/// capture:
///   sample_rate: 24000
///   ring_capacity: 192
///   drain_interval_ms: 5
///
/// playback:
///   sample_rate: 24000
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct YamlConfig {
    pub api: Option<ApiYaml>,
    pub session: Option<SessionYaml>,
    pub capture: Option<CaptureYaml>,
    pub playback: Option<PlaybackYaml>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ApiYaml {
    pub key: Option<String>,
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    /// What the record describes, e.g. "car"
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CaptureYaml {
    pub sample_rate: Option<u32>,
    pub ring_capacity: Option<usize>,
    pub drain_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlaybackYaml {
    pub sample_rate: Option<u32>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
api:
  key: "sk-yaml"
  base_url: "http://localhost:9000/v1"
  ws_url: "ws://localhost:9000/v1/realtime"
session:
  model: "gpt-4o-mini-realtime-preview"
  voice: "verse"
  description: "motorbike"
capture:
  sample_rate: 16000
  ring_capacity: 64
  drain_interval_ms: 10
playback:
  sample_rate: 24000
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let api = config.api.unwrap();
        assert_eq!(api.key.as_deref(), Some("sk-yaml"));
        assert_eq!(api.ws_url.as_deref(), Some("ws://localhost:9000/v1/realtime"));

        let session = config.session.unwrap();
        assert_eq!(session.voice.as_deref(), Some("verse"));
        assert_eq!(session.description.as_deref(), Some("motorbike"));

        let capture = config.capture.unwrap();
        assert_eq!(capture.sample_rate, Some(16000));
        assert_eq!(capture.ring_capacity, Some(64));
        assert_eq!(capture.drain_interval_ms, Some(10));

        assert_eq!(config.playback.unwrap().sample_rate, Some(24000));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config: YamlConfig = serde_yaml::from_str("session:\n  voice: \"ash\"\n").unwrap();
        assert!(config.api.is_none());
        assert!(config.capture.is_none());
        assert_eq!(config.session.unwrap().voice.as_deref(), Some("ash"));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/config.yaml");
        let result = YamlConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "capture:\n  sample_rate: [fast]\n").unwrap();

        let result = YamlConfig::from_file(&config_path);
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
