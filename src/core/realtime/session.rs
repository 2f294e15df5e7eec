//! REST session creation.

use serde::Serialize;
use serde_json::Value;

use super::base::{RealtimeError, RealtimeResult};
use super::config::{OPENAI_BETA_HEADER, RealtimeSettings};
use super::messages::ToolDef;
use crate::core::record::tool_parameters_schema;

/// Name of the tool the model calls with the whole record.
pub const SAVE_TOOL_NAME: &str = "Save_ModelData";

/// Response modalities requested for every session.
pub const SESSION_MODALITIES: [&str; 2] = ["text", "audio"];

/// Handle returned by the session-creation call. Never mutated.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub model: Option<String>,
    pub voice: Option<String>,
    /// Full response body
    pub raw: Value,
}

impl Session {
    fn from_response(raw: Value) -> Self {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            id: text("id").unwrap_or_default(),
            model: text("model"),
            voice: text("voice"),
            raw,
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionCreateRequest<'a> {
    model: &'a str,
    voice: &'a str,
    instructions: String,
    modalities: &'a [&'a str],
    tools: Vec<ToolDef>,
}

/// System instruction for a listen-only intake assistant.
pub fn build_instructions(description: &str) -> String {
    format!(
        "You are helping to edit a JSON object that represents a {description}. \
         Listen to the user and collect information from them. Do not reply to them unless \
         they explicitly ask for your input; just listen. \
         Each time they provide information that can be added to the JSON object, add it to \
         the existing object, and then call the tool to save the updated object. Don't stop \
         updating the JSON object. \
         Even if you think the information is incorrect, accept it - do not try to correct \
         mistakes. \
         After each time you have called the JSON updating tool, just reply OK."
    )
}

/// Definition of the record-saving tool.
pub fn save_tool() -> ToolDef {
    ToolDef::function(
        SAVE_TOOL_NAME,
        "Save the updated vehicle data",
        tool_parameters_schema(),
    )
}

/// Create a realtime session over REST.
///
/// # Errors
///
/// [`RealtimeError::SessionCreate`] on a non-2xx status,
/// [`RealtimeError::Http`] on transport or body decode failure.
pub async fn create_session(
    http: &reqwest::Client,
    settings: &RealtimeSettings,
    description: &str,
) -> RealtimeResult<Session> {
    let body = SessionCreateRequest {
        model: settings.model.as_str(),
        voice: settings.voice.as_str(),
        instructions: build_instructions(description),
        modalities: &SESSION_MODALITIES,
        tools: vec![save_tool()],
    };

    let url = settings.sessions_url();
    tracing::debug!(%url, model = body.model, voice = body.voice, "Creating realtime session");

    let response = http
        .post(&url)
        .header("Authorization", format!("Bearer {}", settings.api_key))
        .header("OpenAI-Beta", OPENAI_BETA_HEADER)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RealtimeError::SessionCreate {
            status: status.as_u16(),
            body,
        });
    }

    let session = Session::from_response(response.json::<Value>().await?);
    tracing::info!(session_id = %session.id, "Realtime session created");
    Ok(session)
}
