//! Client configuration
//!
//! Loaded from .env files, YAML files and environment variables.
//! Priority: YAML > ENV vars > .env values > defaults. The `.env` file is
//! read by `main` at startup, so here it is indistinguishable from the
//! process environment.
//!
//! # Example
//! ```rust,no_run
//! use voice_intake::config::ClientConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Environment only
//! let config = ClientConfig::from_env()?;
//!
//! // YAML file with environment fallback
//! let config = ClientConfig::from_file(Path::new("config.yaml"))?;
//! println!("Using model {}", config.model);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use zeroize::Zeroize;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::audio::{CaptureConfig, PLAYBACK_SAMPLE_RATE};
use crate::core::realtime::config::{OPENAI_API_BASE_URL, OPENAI_REALTIME_URL};
use crate::core::realtime::{RealtimeModel, RealtimeSettings, RealtimeVoice};

/// Default record description used in the session instructions.
pub const DEFAULT_DESCRIPTION: &str = "car";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No API key in YAML or environment
    #[error("Missing API key: set OPENAI_API_KEY or api.key")]
    MissingApiKey,

    /// A value failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Resolved client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_base_url: String,
    pub ws_url: String,
    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
    /// What the extracted record describes
    pub description: String,
    pub capture: CaptureConfig,
    pub playback_sample_rate: u32,
}

impl Drop for ClientConfig {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("ws_url", &self.ws_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("description", &self.description)
            .field("capture", &self.capture)
            .field("playback_sample_rate", &self.playback_sample_rate)
            .finish()
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{key} has invalid value '{raw}'"))),
        None => Ok(None),
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `OPENAI_API_KEY` | required |
    /// | `OPENAI_API_BASE_URL` | `https://api.openai.com/v1` |
    /// | `OPENAI_REALTIME_WS_URL` | `wss://api.openai.com/v1/realtime` |
    /// | `OPENAI_REALTIME_MODEL` | `gpt-4o-realtime-preview` |
    /// | `OPENAI_REALTIME_VOICE` | `alloy` |
    /// | `RECORD_DESCRIPTION` | `car` |
    /// | `CAPTURE_SAMPLE_RATE` | `24000` |
    /// | `PLAYBACK_SAMPLE_RATE` | `24000` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::merge(YamlConfig::default())
    }

    /// Load configuration from a YAML file, falling back to the environment.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an
    /// environment variable is malformed, or validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        Self::merge(yaml)
    }

    fn merge(yaml: YamlConfig) -> Result<Self, ConfigError> {
        let api = yaml.api.unwrap_or_default();
        let session = yaml.session.unwrap_or_default();
        let capture = yaml.capture.unwrap_or_default();
        let playback = yaml.playback.unwrap_or_default();
        let defaults = CaptureConfig::default();

        let config = Self {
            api_key: api
                .key
                .or_else(|| env_string("OPENAI_API_KEY"))
                .unwrap_or_default(),
            api_base_url: api
                .base_url
                .or_else(|| env_string("OPENAI_API_BASE_URL"))
                .unwrap_or_else(|| OPENAI_API_BASE_URL.to_string()),
            ws_url: api
                .ws_url
                .or_else(|| env_string("OPENAI_REALTIME_WS_URL"))
                .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string()),
            model: session
                .model
                .or_else(|| env_string("OPENAI_REALTIME_MODEL"))
                .map(|m| RealtimeModel::from_str_or_default(&m))
                .unwrap_or_default(),
            voice: session
                .voice
                .or_else(|| env_string("OPENAI_REALTIME_VOICE"))
                .map(|v| RealtimeVoice::from_str_or_default(&v))
                .unwrap_or_default(),
            description: session
                .description
                .or_else(|| env_string("RECORD_DESCRIPTION"))
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            capture: CaptureConfig {
                sample_rate: match capture.sample_rate {
                    Some(rate) => rate,
                    None => env_parse("CAPTURE_SAMPLE_RATE")?.unwrap_or(defaults.sample_rate),
                },
                ring_capacity: capture.ring_capacity.unwrap_or(defaults.ring_capacity),
                drain_interval_ms: capture
                    .drain_interval_ms
                    .unwrap_or(defaults.drain_interval_ms),
            },
            playback_sample_rate: match playback.sample_rate {
                Some(rate) => rate,
                None => env_parse("PLAYBACK_SAMPLE_RATE")?.unwrap_or(PLAYBACK_SAMPLE_RATE),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check the merged values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.capture.sample_rate == 0 {
            return Err(ConfigError::Invalid("capture sample rate must be > 0".into()));
        }
        if self.playback_sample_rate == 0 {
            return Err(ConfigError::Invalid("playback sample rate must be > 0".into()));
        }
        if self.capture.ring_capacity == 0 {
            return Err(ConfigError::Invalid("capture ring capacity must be > 0".into()));
        }
        for (name, url) in [("api base url", &self.api_base_url), ("ws url", &self.ws_url)] {
            url::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("{name} '{url}': {e}")))?;
        }
        Ok(())
    }

    /// Settings for the realtime session manager.
    pub fn realtime_settings(&self) -> RealtimeSettings {
        RealtimeSettings {
            api_key: self.api_key.clone(),
            api_base_url: self.api_base_url.clone(),
            ws_url: self.ws_url.clone(),
            model: self.model,
            voice: self.voice,
        }
    }
}
