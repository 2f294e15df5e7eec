//! Realtime API endpoints, model and voice selection.

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// REST base for session creation.
pub const OPENAI_API_BASE_URL: &str = "https://api.openai.com/v1";

/// Realtime WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Beta header value required by both endpoints.
pub const OPENAI_BETA_HEADER: &str = "realtime=v1";

// =============================================================================
// Models
// =============================================================================

/// Supported realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    #[serde(rename = "gpt-4o-realtime-preview-2024-10-01")]
    Gpt4oRealtimePreview20241001,
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    #[serde(rename = "gpt-4o-mini-realtime-preview")]
    Gpt4oMiniRealtimePreview,
}

impl RealtimeModel {
    /// Convert to the API parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oRealtimePreview20241001 => "gpt-4o-realtime-preview-2024-10-01",
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oMiniRealtimePreview => "gpt-4o-mini-realtime-preview",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "gpt-4o-realtime-preview-2024-10-01" => Self::Gpt4oRealtimePreview20241001,
            "gpt-4o-realtime-preview-2024-12-17" => Self::Gpt4oRealtimePreview20241217,
            "gpt-4o-mini-realtime-preview" => Self::Gpt4oMiniRealtimePreview,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Output voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl RealtimeVoice {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        Self::all()
            .iter()
            .copied()
            .find(|v| v.as_str() == s.trim().to_lowercase())
            .unwrap_or_default()
    }

    pub fn all() -> &'static [RealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Session settings
// =============================================================================

/// Everything the session manager needs to reach the service.
#[derive(Clone)]
pub struct RealtimeSettings {
    /// Bearer credential. Zeroized on drop.
    pub api_key: String,
    /// REST base, e.g. `https://api.openai.com/v1`
    pub api_base_url: String,
    /// WebSocket endpoint without query string
    pub ws_url: String,
    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
}

impl RealtimeSettings {
    /// Settings pointing at the public endpoints.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base_url: OPENAI_API_BASE_URL.to_string(),
            ws_url: OPENAI_REALTIME_URL.to_string(),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
        }
    }

    /// `POST` target for session creation.
    pub fn sessions_url(&self) -> String {
        format!("{}/realtime/sessions", self.api_base_url.trim_end_matches('/'))
    }

    /// WebSocket URL including the model query parameter.
    pub fn socket_url(&self) -> String {
        format!("{}?model={}", self.ws_url, self.model.as_str())
    }
}

impl std::fmt::Debug for RealtimeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeSettings")
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("ws_url", &self.ws_url)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .finish()
    }
}

impl Drop for RealtimeSettings {
    fn drop(&mut self) {
        self.api_key.zeroize();
    }
}
