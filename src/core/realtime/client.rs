//! Realtime session manager.
//!
//! Owns one hosted session and its WebSocket. Outbound events go through
//! an mpsc channel into a single connection task; the same task decodes
//! inbound frames and dispatches them one at a time, in arrival order.
//!
//! # Example
//!
//! ```rust,ignore
//! let session = Arc::new(RealtimeSession::new(settings, player));
//! session
//!     .start_session("car", on_record, on_status)
//!     .await?;
//! session.send_audio(block).await?;
//! session.dispose().await;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::base::{
    ConnectionState, RealtimeError, RealtimeResult, RecordUpdateCallback, StatusCallback,
};
use super::config::{OPENAI_BETA_HEADER, RealtimeSettings};
use super::messages::{ClientEvent, ServerEvent};
use super::session::{SAVE_TOOL_NAME, Session, create_session};
use crate::core::audio::AudioPlayer;
use crate::core::record::VehicleRecord;

/// Channel capacity for outgoing events.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long dispose waits for the close handshake before aborting.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Decode save-tool arguments into a record.
///
/// # Errors
///
/// [`RealtimeError::MalformedToolPayload`] on invalid JSON or a non-object.
pub fn parse_tool_arguments(arguments: &str) -> RealtimeResult<VehicleRecord> {
    Ok(VehicleRecord::from_tool_arguments(arguments)?)
}

/// Text sent by [`RealtimeSession::update_model`].
pub fn record_context_message(record: &VehicleRecord) -> String {
    format!(
        "The current modelData value is {}. When updating this later, include all these same \
         values if they are unchanged (or they will be overwritten with nulls).",
        record.to_wire()
    )
}

/// Realtime session manager.
pub struct RealtimeSession {
    settings: RealtimeSettings,
    http: reqwest::Client,
    player: Arc<AudioPlayer>,

    /// Shared with the connection task
    state: Arc<AtomicU8>,
    session: Mutex<Option<Session>>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl RealtimeSession {
    /// Create a session manager that plays received audio through `player`.
    pub fn new(settings: RealtimeSettings, player: Arc<AudioPlayer>) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
            player,
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected.as_u8())),
            session: Mutex::new(None),
            ws_sender: Arc::new(Mutex::new(None)),
            connection_handle: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Session descriptor from the last successful start.
    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn player(&self) -> &Arc<AudioPlayer> {
        &self.player
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Create the hosted session, open the socket and start dispatching.
    ///
    /// Status strings go to `on_status`; every save-tool call replaces the
    /// record through `on_data_update`. Returns `Ok` immediately if a
    /// session is already connecting or connected.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::SessionCreate`] / [`RealtimeError::Http`] when the
    /// REST call fails, [`RealtimeError::Socket`] when the WebSocket
    /// handshake fails, [`RealtimeError::NotConnected`] after `dispose`.
    pub async fn start_session(
        &self,
        description: &str,
        on_data_update: RecordUpdateCallback,
        on_status: StatusCallback,
    ) -> RealtimeResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        let current = self.connection_state();
        if current != ConnectionState::Disconnected {
            tracing::debug!(state = %current, "Session already started");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        on_status("Connecting to OpenAI...".to_string()).await;

        match self.connect(description, on_data_update, on_status.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if self.disposed.load(Ordering::SeqCst) => {
                tracing::debug!(error = %e, "Session disposed while connecting");
                self.set_state(ConnectionState::Disconnected);
                Err(RealtimeError::NotConnected)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start realtime session");
                self.set_state(ConnectionState::Disconnected);
                on_status(format!("Connection failed: {e}")).await;
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        description: &str,
        on_data_update: RecordUpdateCallback,
        on_status: StatusCallback,
    ) -> RealtimeResult<()> {
        let session = create_session(&self.http, &self.settings, description).await?;
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RealtimeError::NotConnected);
        }
        *self.session.lock() = Some(session);

        let mut request = self.settings.socket_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", self.settings.api_key))
                .map_err(|e| RealtimeError::Socket(e.to_string()))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static(OPENAI_BETA_HEADER));

        let (mut ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;

        // Publish under the sender lock so dispose either sees the sender or
        // makes this fail
        let (tx, rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let published = {
            let mut sender = self.ws_sender.lock();
            let promoted = !self.disposed.load(Ordering::SeqCst)
                && self
                    .state
                    .compare_exchange(
                        ConnectionState::Connecting.as_u8(),
                        ConnectionState::Connected.as_u8(),
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
            if promoted {
                *sender = Some(tx);
            }
            promoted
        };
        if !published {
            if let Err(e) = ws_stream.close(None).await {
                tracing::debug!(error = %e, "Close after dispose failed");
            }
            return Err(RealtimeError::NotConnected);
        }
        tracing::info!(model = %self.settings.model, "Connected to realtime API");

        on_status("WebSocket connected".to_string()).await;
        on_status("Connected successfully".to_string()).await;

        let dispatcher = EventDispatcher {
            player: self.player.clone(),
            on_data_update,
            on_status,
            pending_function_calls: HashMap::new(),
        };
        let handle = tokio::spawn(run_connection(
            ws_stream,
            rx,
            dispatcher,
            self.state.clone(),
            self.ws_sender.clone(),
        ));
        *self.connection_handle.lock() = Some(handle);

        // Disposed after publishing: the task already lost its sender and is
        // closing the socket
        if self.disposed.load(Ordering::SeqCst) {
            let handle = self.connection_handle.lock().take();
            if let Some(handle) = handle {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, handle).await;
            }
            return Err(RealtimeError::NotConnected);
        }

        Ok(())
    }

    /// Send an event to the WebSocket.
    async fn send_event(&self, event: ClientEvent) -> RealtimeResult<()> {
        let sender = self.ws_sender.lock().clone();
        match sender {
            Some(sender) => sender
                .send(event)
                .await
                .map_err(|_| RealtimeError::SocketClosed),
            None => Err(RealtimeError::NotConnected),
        }
    }

    /// Stream one captured PCM16 block.
    ///
    /// # Errors
    ///
    /// [`RealtimeError::NotConnected`] unless the socket is open; nothing
    /// is sent in that case.
    pub async fn send_audio(&self, block: Bytes) -> RealtimeResult<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(RealtimeError::NotConnected);
        }
        self.send_event(ClientEvent::audio_append(&block)).await
    }

    /// Tell the model what the record currently holds.
    ///
    /// The model is asked to repeat unchanged values in later saves; a
    /// field it leaves out still comes back as null. Does nothing when
    /// not connected.
    pub async fn update_model(&self, record: &VehicleRecord) -> RealtimeResult<()> {
        if self.connection_state() != ConnectionState::Connected {
            tracing::debug!("Not connected, skipping record context update");
            return Ok(());
        }
        self.send_event(ClientEvent::user_text(record_context_message(record)))
            .await
    }

    /// Close the socket, stop dispatching and release playback. Idempotent.
    ///
    /// Safe to call while `start_session` is still connecting; that call
    /// then fails with [`RealtimeError::NotConnected`] and leaves no socket.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the sender makes the connection task send a close frame.
        // A connect still in flight sees `disposed` and gives up.
        drop(self.ws_sender.lock().take());
        self.set_state(ConnectionState::Disconnected);

        let handle = self.connection_handle.lock().take();
        if let Some(mut handle) = handle
            && tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err()
        {
            tracing::warn!("Close handshake timed out, aborting connection task");
            handle.abort();
        }

        self.set_state(ConnectionState::Disconnected);
        self.player.close();
        tracing::info!("Realtime session disposed");
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Connection task
// =============================================================================

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn run_connection(
    ws_stream: WsStream,
    mut rx: mpsc::Receiver<ClientEvent>,
    mut dispatcher: EventDispatcher,
    state: Arc<AtomicU8>,
    ws_sender: Arc<Mutex<Option<mpsc::Sender<ClientEvent>>>>,
) {
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut failed = false;

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(event) = outgoing else {
                    // Session disposed
                    let _ = ws_sink.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize event");
                        continue;
                    }
                };
                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    tracing::error!(error = %e, "Failed to send WebSocket message");
                    failed = true;
                    break;
                }
            }

            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => dispatcher.handle_text(&text).await,
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                            tracing::error!(error = %e, "Failed to send pong");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "WebSocket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket error");
                        failed = true;
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.store(ConnectionState::Disconnected.as_u8(), Ordering::SeqCst);
    drop(ws_sender.lock().take());

    if failed {
        dispatcher.status("Connection error occurred").await;
    }
    dispatcher.status("Connection closed").await;
}

// =============================================================================
// Event dispatch
// =============================================================================

/// Per-connection inbound handler. Owned by the connection task, so its
/// state needs no locking.
struct EventDispatcher {
    player: Arc<AudioPlayer>,
    on_data_update: RecordUpdateCallback,
    on_status: StatusCallback,
    /// call_id -> function name, from `response.output_item.added`
    pending_function_calls: HashMap<String, String>,
}

impl EventDispatcher {
    async fn status(&self, message: impl Into<String>) {
        (self.on_status)(message.into()).await;
    }

    async fn handle_text(&mut self, text: &str) {
        match ServerEvent::parse(text) {
            Ok((tag, event)) => self.handle_event(&tag, event).await,
            Err(e) => tracing::warn!(error = %e, "Failed to parse server event"),
        }
    }

    async fn handle_event(&mut self, tag: &str, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                tracing::debug!(
                    session_id = session.get("id").and_then(|v| v.as_str()).unwrap_or_default(),
                    "Session created event"
                );
                self.status("Session created").await;
            }

            ServerEvent::SpeechStarted { audio_start_ms } => {
                // Flush before anything else can await so no queued buffer starts
                self.player.clear();
                tracing::debug!(?audio_start_ms, "Speech started, playback cleared");
                self.status("Speech started").await;
            }

            ServerEvent::SpeechStopped { audio_end_ms } => {
                tracing::debug!(?audio_end_ms, "Speech stopped");
                self.status("Speech stopped").await;
            }

            ServerEvent::AudioDelta { delta } => {
                if delta.is_empty() {
                    return;
                }
                if let Err(e) = self.player.enqueue_base64(&delta) {
                    tracing::warn!(error = %e, "Dropping undecodable audio delta");
                }
            }

            ServerEvent::TextDelta { delta } => {
                if !delta.is_empty() {
                    self.status(delta).await;
                }
            }

            ServerEvent::OutputItemAdded { item } => {
                if item.item_type == "function_call"
                    && let (Some(call_id), Some(name)) = (item.call_id, item.name)
                {
                    tracing::debug!(%call_id, %name, "Function call started");
                    self.pending_function_calls.insert(call_id, name);
                }
            }

            ServerEvent::FunctionCallArgumentsDone {
                name,
                call_id,
                arguments,
            } => {
                let pending = call_id
                    .as_ref()
                    .and_then(|id| self.pending_function_calls.remove(id));
                let name = name.or(pending).unwrap_or_default();

                if name != SAVE_TOOL_NAME {
                    tracing::debug!(%name, ?call_id, "Ignoring call to unknown tool");
                    return;
                }

                match parse_tool_arguments(&arguments) {
                    Ok(record) => {
                        tracing::debug!(?record, "Record updated by tool call");
                        (self.on_data_update)(record).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "Discarding tool call"),
                }
            }

            ServerEvent::ResponseDone { .. } => {
                self.status("Response completed").await;
            }

            ServerEvent::Error { error } => {
                tracing::error!(
                    error_type = %error.error_type,
                    code = ?error.code,
                    message = %error.message,
                    "Realtime API error"
                );
                self.status(format!("Error: {}", error.message)).await;
            }

            ServerEvent::Unknown => {
                tracing::debug!(event_type = %tag, "Unhandled event type");
            }
        }
    }
}
