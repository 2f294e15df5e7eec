//! Realtime speech session.
//!
//! - `session`: REST session creation with the record-saving tool
//! - `client`: [`RealtimeSession`], the socket owner and event dispatcher
//! - `messages`: wire events in both directions
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, base64 in JSON text frames. Playback
//! is at 24kHz.

mod base;
mod client;
pub mod config;
pub mod messages;
mod session;

pub use base::{
    ConnectionState, RealtimeError, RealtimeResult, RecordUpdateCallback, StatusCallback,
};
pub use client::{RealtimeSession, parse_tool_arguments, record_context_message};
pub use config::{RealtimeModel, RealtimeSettings, RealtimeVoice};
pub use session::{
    SAVE_TOOL_NAME, SESSION_MODALITIES, Session, build_instructions, create_session, save_tool,
};
