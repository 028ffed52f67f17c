//! Live session state machine
//!
//! [`GeminiLiveClient`] owns one connection at a time. `connect()` opens the
//! channel, sends setup and then runs the receive loop until the session
//! ends, so callers that need a non-blocking API run it on its own task
//! (see [`crate::facade`]). Text, audio and screen images may be sent from
//! any task while the loop runs; sends are serialized.

use crate::callbacks::{LiveCallbacks, NoopCallbacks};
use crate::capture::{CaptureGeometry, CaptureSlot, CaptureTarget, ScreenSource};
use crate::channel::{Channel, ChannelSink, Connector, Frame, FrameKind, FrameStream, WsConnector};
use crate::config::{FunctionResponseMode, LiveConfig};
use crate::error::{snippet, LiveError, Result};
use crate::protocol::{
    self, ClientMessage, Content, FunctionCall, FunctionResponse, Part, ServerMessage, MIME_PCM_16K,
};
use crate::state::{Flag, LiveStatus, SessionFlags, SessionPhase};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DISCONNECT_REASON: &str = "User requested disconnect";

pub(crate) struct SessionInner {
    pub(crate) config: LiveConfig,
    pub(crate) callbacks: Arc<dyn LiveCallbacks>,
    connector: Arc<dyn Connector>,
    pub(crate) screen: Option<Arc<dyn ScreenSource>>,
    pub(crate) flags: SessionFlags,
    lifecycle: Mutex<Lifecycle>,
    connection_ids: AtomicU64,
    /// Held for the duration of one outbound frame.
    send_lock: tokio::sync::Mutex<()>,
    pub(crate) geometry: Mutex<CaptureGeometry>,
    pub(crate) capture: Mutex<Option<CaptureSlot>>,
    pub(crate) capture_generation: AtomicU64,
    conversation: Mutex<Vec<Content>>,
}

/// The connection owned by one `connect()` call.
struct ActiveConnection {
    id: u64,
    token: CancellationToken,
    sink: Option<Arc<dyn ChannelSink>>,
}

/// Phase and active connection change together, under one lock.
struct Lifecycle {
    phase: SessionPhase,
    active: Option<ActiveConnection>,
}

impl Lifecycle {
    fn owns(&self, id: Option<u64>) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| id.map_or(true, |id| active.id == id))
    }
}

/// Client for one Gemini Live session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct GeminiLiveClient {
    inner: Arc<SessionInner>,
}

/// Builder for [`GeminiLiveClient`].
pub struct GeminiLiveClientBuilder {
    config: LiveConfig,
    callbacks: Arc<dyn LiveCallbacks>,
    connector: Option<Arc<dyn Connector>>,
    screen: Option<Arc<dyn ScreenSource>>,
}

impl GeminiLiveClientBuilder {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config,
            callbacks: Arc::new(NoopCallbacks),
            connector: None,
            screen: default_screen_source(),
        }
    }

    pub fn callbacks<C: LiveCallbacks + 'static>(mut self, callbacks: C) -> Self {
        self.callbacks = Arc::new(callbacks);
        self
    }

    pub fn shared_callbacks(mut self, callbacks: Arc<dyn LiveCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Transport used by `connect()`. Defaults to [`WsConnector`].
    pub fn connector<C: Connector + 'static>(mut self, connector: C) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn screen_source<S: ScreenSource + 'static>(mut self, screen: S) -> Self {
        self.screen = Some(Arc::new(screen));
        self
    }

    /// Remove the screen source, so screen capture reports it as unavailable.
    pub fn without_screen_source(mut self) -> Self {
        self.screen = None;
        self
    }

    pub fn build(self) -> Result<GeminiLiveClient> {
        self.config.validate()?;
        let inner = SessionInner {
            config: self.config,
            callbacks: self.callbacks,
            connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
            screen: self.screen,
            flags: SessionFlags::default(),
            lifecycle: Mutex::new(Lifecycle {
                phase: SessionPhase::Idle,
                active: None,
            }),
            connection_ids: AtomicU64::new(0),
            send_lock: tokio::sync::Mutex::new(()),
            geometry: Mutex::new(CaptureGeometry::default()),
            capture: Mutex::new(None),
            capture_generation: AtomicU64::new(0),
            conversation: Mutex::new(Vec::new()),
        };
        Ok(GeminiLiveClient {
            inner: Arc::new(inner),
        })
    }
}

#[cfg(feature = "capture")]
fn default_screen_source() -> Option<Arc<dyn ScreenSource>> {
    Some(Arc::new(crate::capture::XcapScreen))
}

#[cfg(not(feature = "capture"))]
fn default_screen_source() -> Option<Arc<dyn ScreenSource>> {
    None
}

/// Ends a connection attempt: cleanup plus the final phase, on every exit path.
/// Does nothing if the connection was already torn down by someone else.
struct ConnectionGuard {
    inner: Arc<SessionInner>,
    id: u64,
    failed: bool,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let phase = if self.failed {
            SessionPhase::Failed
        } else {
            SessionPhase::Idle
        };
        if !self.inner.teardown(Some(self.id), phase) {
            debug!("Connection {} was already torn down", self.id);
        }
    }
}

impl GeminiLiveClient {
    pub fn builder(config: LiveConfig) -> GeminiLiveClientBuilder {
        GeminiLiveClientBuilder::new(config)
    }

    /// Client with no-op callbacks over the default transport.
    pub fn new(config: LiveConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Open the session and run it until it ends.
    ///
    /// Returns immediately with `Ok(())` if the session is already connected
    /// or connecting. Otherwise resolves when the server closes the
    /// connection, `disconnect()` is called, or the transport fails. Cleanup
    /// runs once on every exit path, including when this future is dropped.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        let (id, token) = {
            let mut life = inner.lifecycle.lock();
            if !life.phase.is_idle() {
                debug!("connect() ignored, session is {:?}", life.phase);
                return Ok(());
            }
            let id = inner.connection_ids.fetch_add(1, Ordering::SeqCst) + 1;
            let token = CancellationToken::new();
            life.phase = SessionPhase::Connecting;
            life.active = Some(ActiveConnection {
                id,
                token: token.clone(),
                sink: None,
            });
            (id, token)
        };
        let mut guard = ConnectionGuard {
            inner: inner.clone(),
            id,
            failed: true,
        };

        info!("Connecting to {}", inner.config.redacted_url());
        let opened = tokio::select! {
            _ = token.cancelled() => {
                info!("Connect cancelled before the channel opened");
                guard.failed = false;
                return Err(LiveError::transport("connect cancelled"));
            }
            opened = inner.connector.open(&inner.config.url) => opened,
        };
        let Channel { sink, frames } = match opened {
            Ok(channel) => channel,
            Err(e) => {
                inner.report("Error establishing WebSocket session", &e);
                return Err(e);
            }
        };

        if !inner.attach(id, sink.clone()) {
            info!("Connection {} was shut down while opening", id);
            guard.failed = false;
            if let Err(e) = sink.close(DISCONNECT_REASON).await {
                debug!("Closing abandoned channel failed: {}", e);
            }
            return Err(LiveError::transport("connect cancelled"));
        }
        info!("Connected to Gemini Live");
        inner.callbacks.on_connected();
        inner.publish_status();

        inner.callbacks.before_setup();
        match inner.send_message_on(Some(id), &ClientMessage::setup(&inner.config)).await {
            Ok(()) => debug!("Setup message sent for {}", inner.config.model),
            Err(e) => inner.report("Error sending initial setup message", &e),
        }

        let result = inner.receive_loop(id, frames, &token).await;
        guard.failed = result.is_err();
        result
    }

    /// Close the connection. The running `connect()` then returns and cleans up.
    pub async fn disconnect(&self) -> Result<()> {
        self.inner.disconnect().await
    }

    /// Disconnect, stop every background task and release the channel. Safe to repeat.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await
    }

    /// Signal that the caller is about to stream microphone audio.
    pub fn start_audio_input(&self) {
        self.inner.start_audio_input();
    }

    pub fn stop_audio_input(&self) {
        self.inner.stop_audio_input();
    }

    /// Start periodic screen images. Returns `false` if capture could not start.
    pub fn start_screen_capture(&self) -> bool {
        self.inner.start_capture()
    }

    pub fn stop_screen_capture(&self) {
        self.inner.stop_capture(false);
    }

    pub fn set_screen_capture_resolution(&self, target: CaptureTarget) {
        self.inner.geometry.lock().set_target(target);
        info!("Screen capture target set to {}", target);
        self.inner.publish_status();
    }

    /// Send a user text turn. The turn stays open for the model to answer.
    pub async fn send_text_message(&self, text: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.flags.get(Flag::Connected) {
            let err = LiveError::NotConnected;
            inner.callbacks.on_error("Not connected. Cannot send text message.", Some(&err));
            return Err(err);
        }
        if text.trim().is_empty() {
            let err = LiveError::EmptyMessage;
            inner.callbacks.on_error("Cannot send an empty text message.", Some(&err));
            return Err(err);
        }

        let content = Content::user(vec![Part::text(text)]);
        inner.conversation.lock().push(content.clone());
        if let Err(e) = inner.send_message(&ClientMessage::turn(false, content)).await {
            inner.report("Failed to send text message", &e);
            return Err(e);
        }
        Ok(())
    }

    pub async fn send_turn_message(&self, turn_complete: bool, role: &str, parts: Vec<Part>) -> Result<()> {
        let msg = ClientMessage::turn(turn_complete, Content::new(role, parts));
        self.inner.send_message(&msg).await
    }

    /// Send one base64 media chunk as realtime input.
    pub async fn send_media_chunk(&self, base64_data: &str, mime_type: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.flags.get(Flag::Connected) {
            return Err(LiveError::NotConnected);
        }
        let msg = ClientMessage::media_chunk(mime_type, base64_data.to_string());
        if let Err(e) = inner.send_message(&msg).await {
            inner.report(&format!("Error sending media chunk (MIME: {})", mime_type), &e);
            return Err(e);
        }
        Ok(())
    }

    /// Send raw 16 kHz 16-bit mono PCM.
    pub async fn send_audio_chunk(&self, pcm: &[u8]) -> Result<()> {
        self.send_media_chunk(&STANDARD.encode(pcm), MIME_PCM_16K).await
    }

    pub fn status(&self) -> LiveStatus {
        self.inner.status()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lifecycle.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.inner.flags.get(Flag::Connected)
    }

    pub fn is_recording_audio(&self) -> bool {
        self.inner.flags.get(Flag::UserSpeaking)
    }

    pub fn is_user_speaking(&self) -> bool {
        self.inner.flags.get(Flag::UserSpeaking)
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.inner.flags.get(Flag::AiSpeaking)
    }

    pub fn is_screen_capture_active(&self) -> bool {
        self.inner.flags.get(Flag::CapturingScreen)
    }

    /// User turns sent through `send_text_message`, oldest first.
    pub fn conversation(&self) -> Vec<Content> {
        self.inner.conversation.lock().clone()
    }

    pub fn config(&self) -> &LiveConfig {
        &self.inner.config
    }
}

impl SessionInner {
    pub(crate) fn report(&self, context: &str, err: &LiveError) {
        let message = format!("{}: {}", context, err);
        error!("{}", message);
        self.callbacks.on_error(&message, Some(err));
    }

    pub(crate) fn status(&self) -> LiveStatus {
        let (capture_resolution, target_resolution) = {
            let geometry = self.geometry.lock();
            (geometry.capture_resolution(), geometry.target_resolution())
        };
        let speaking = self.flags.get(Flag::UserSpeaking);
        LiveStatus {
            is_connected: self.flags.get(Flag::Connected),
            is_recording_audio: speaking,
            is_user_speaking: speaking,
            is_ai_speaking: self.flags.get(Flag::AiSpeaking),
            is_capturing_screen: self.flags.get(Flag::CapturingScreen),
            capture_resolution,
            target_resolution,
        }
    }

    pub(crate) fn publish_status(&self) {
        let status = self.status();
        self.callbacks.on_status_update(&status);
    }

    pub(crate) fn connection_token(&self) -> Option<CancellationToken> {
        self.lifecycle.lock().active.as_ref().map(|active| active.token.clone())
    }

    /// Install the opened channel, unless connection `id` was torn down meanwhile.
    fn attach(&self, id: u64, sink: Arc<dyn ChannelSink>) -> bool {
        let mut life = self.lifecycle.lock();
        match life.active.as_mut() {
            Some(active) if active.id == id && !active.token.is_cancelled() => {
                active.sink = Some(sink);
                life.phase = SessionPhase::Connected;
                self.flags.set(Flag::Connected, true);
                true
            }
            _ => false,
        }
    }

    fn start_audio_input(&self) {
        if self.flags.set(Flag::UserSpeaking, true) {
            debug!("Audio input started");
            self.callbacks.on_audio_started();
            self.publish_status();
        }
    }

    fn stop_audio_input(&self) {
        if self.flags.set(Flag::UserSpeaking, false) {
            debug!("Audio input stopped");
            self.callbacks.on_audio_stopped();
            self.publish_status();
        }
    }

    /// Send on the active connection, or only on connection `id` when given.
    async fn send_text(&self, id: Option<u64>, text: String) -> Result<()> {
        let sink = {
            let life = self.lifecycle.lock();
            let sink = life
                .active
                .as_ref()
                .filter(|_| life.owns(id))
                .and_then(|active| active.sink.clone());
            sink.ok_or(LiveError::NotConnected)?
        };
        let _serial = self.send_lock.lock().await;
        debug!("Sending: {}", snippet(&text));
        sink.send(text).await
    }

    async fn send_message_on(&self, id: Option<u64>, msg: &ClientMessage) -> Result<()> {
        let text = protocol::encode(msg)?;
        self.send_text(id, text).await
    }

    pub(crate) async fn send_message(&self, msg: &ClientMessage) -> Result<()> {
        self.send_message_on(None, msg).await
    }

    async fn receive_loop(&self, id: u64, mut frames: FrameStream, token: &CancellationToken) -> Result<()> {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    debug!("Receive loop cancelled");
                    return Ok(());
                }
                next = frames.next() => next,
            };

            let frame = match next {
                None => {
                    info!("Server stream ended");
                    return Ok(());
                }
                Some(Err(e)) => {
                    self.report("Error in WebSocket receive loop", &e);
                    return Err(e);
                }
                Some(Ok(frame)) => frame,
            };

            match frame {
                Frame::Text(text) => {
                    self.handle_payload(id, &text).await;
                    self.callbacks.on_raw_frame(&text, FrameKind::Text);
                }
                Frame::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        self.handle_payload(id, &text).await;
                        self.callbacks.on_raw_frame(&text, FrameKind::Binary);
                    }
                    Err(e) => {
                        let message = format!("Error processing binary frame content: {}", e);
                        warn!("{}", message);
                        self.callbacks.on_error(&message, None);
                    }
                },
                Frame::Close(reason) => {
                    info!("Connection closed: {}", reason.as_deref().unwrap_or("no reason"));
                    return Ok(());
                }
                Frame::Ping(_) => debug!("ping received"),
                Frame::Pong(_) => debug!("pong received"),
                Frame::Other(kind) => {
                    let message = format!("Received unexpected frame type: {}", kind);
                    warn!("{}", message);
                    self.callbacks.on_error(&message, None);
                }
            }
        }
    }

    async fn handle_payload(&self, id: u64, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        debug!("Received: {}", snippet(text));
        match protocol::decode(text) {
            Ok(msg) => self.dispatch(id, msg).await,
            Err(e) => {
                let message = format!("Error parsing received message: {}", e);
                warn!("{}", message);
                self.callbacks.on_error(&message, Some(&e));
            }
        }
    }

    async fn dispatch(&self, id: u64, msg: ServerMessage) {
        if msg.setup_complete.is_some() {
            info!("Setup complete");
        }

        // Speech end is inferred from the first message without audio.
        let has_audio = msg.has_audio();
        if has_audio && self.flags.set(Flag::AiSpeaking, true) {
            self.callbacks.on_ai_speaking_started();
            self.publish_status();
        }

        for part in msg.model_parts() {
            if let Some(text) = part.text.as_deref().filter(|t| !t.trim().is_empty()) {
                self.callbacks.on_text_received(text);
            }
            if let Some(inline) = &part.inline_data {
                if inline.is_audio() {
                    if !inline.data.is_empty() {
                        self.callbacks.on_audio_chunk_received(&inline.data);
                    }
                } else if let Some(mime) = &inline.mime_type {
                    let err = LiveError::unsupported(mime.clone());
                    let message = format!("Received unsupported inline data type: {}", mime);
                    warn!("{}", message);
                    self.callbacks.on_error(&message, Some(&err));
                }
            }
        }

        if !has_audio && self.flags.set(Flag::AiSpeaking, false) {
            self.callbacks.on_ai_speaking_stopped();
            self.publish_status();
        }

        if let Some(content) = &msg.server_content {
            if let Some(text) = content.input_transcription.as_ref().and_then(|t| t.text.as_deref()) {
                self.callbacks.on_input_transcription(text);
            }
            if let Some(text) = content.output_transcription.as_ref().and_then(|t| t.text.as_deref()) {
                self.callbacks.on_output_transcription(text);
            }
            if content.interrupted == Some(true) {
                debug!("Model turn interrupted");
            }
            if content.turn_complete == Some(true) {
                debug!("Model turn complete");
            }
        }
        if let Some(cancellation) = &msg.tool_call_cancellation {
            info!("Tool calls cancelled by server: {:?}", cancellation.ids);
        }
        if let Some(go_away) = &msg.go_away {
            warn!("Server is going away: {}", go_away);
        }
        if msg.session_resumption_update.is_some() {
            debug!("Session resumption update received");
        }

        if let Some(calls) = msg.function_calls() {
            self.answer_tool_call(id, calls).await;
        }
    }

    /// Echo each answered call's arguments back as its result.
    async fn answer_tool_call(&self, id: u64, calls: &[FunctionCall]) {
        let Some(first) = calls.first() else {
            self.callbacks.on_error("Received a tool call without function calls", None);
            return;
        };
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        info!("Tool call received: {:?}", names);
        self.callbacks.on_function_calls(calls);

        let responses = match self.config.function_response_mode {
            FunctionResponseMode::FirstOnly => {
                if calls.len() > 1 {
                    debug!("Answering only the first of {} calls", calls.len());
                }
                vec![FunctionResponse::echo(first)]
            }
            FunctionResponseMode::All => calls.iter().map(FunctionResponse::echo).collect(),
        };
        let payload = match protocol::encode(&ClientMessage::tool_response(responses)) {
            Ok(payload) => payload,
            Err(e) => {
                self.report("Error encoding function response", &e);
                return;
            }
        };

        self.callbacks.on_send_function_response(&payload);
        if let Err(e) = self.send_text(Some(id), payload).await {
            self.report("Error sending function response", &e);
            return;
        }
        self.callbacks.after_function_response_sent();
        self.callbacks.on_request_completed();
    }

    /// Tear down connection `id`, or whichever is active for `None`, and
    /// leave the session in `final_phase`. Returns false if that connection
    /// is no longer the active one.
    fn teardown(&self, id: Option<u64>, final_phase: SessionPhase) -> bool {
        let active = {
            let mut life = self.lifecycle.lock();
            if !life.owns(id) {
                return false;
            }
            // Not idle until cleanup is done, so no new connect() can slip in.
            life.phase = SessionPhase::Disconnecting;
            life.active.take()
        };
        if let Some(active) = active {
            debug!("Tearing down connection {}", active.id);
            active.token.cancel();
        }
        self.cleanup();
        self.lifecycle.lock().phase = final_phase;
        true
    }

    /// Flags and callbacks of a teardown. Only the first caller per connection does anything.
    fn cleanup(&self) {
        if !self.flags.set(Flag::Connected, false) {
            return;
        }
        info!("Cleaning up connection");
        self.stop_audio_input();
        self.stop_capture(true);
        if self.flags.set(Flag::AiSpeaking, false) {
            self.callbacks.on_ai_speaking_stopped();
        }
        self.callbacks.on_disconnected();
        self.publish_status();
    }

    async fn disconnect(&self) -> Result<()> {
        let (id, token, sink) = {
            let mut life = self.lifecycle.lock();
            let Some(active) = life.active.as_ref() else {
                return Ok(());
            };
            let snapshot = (active.id, active.token.clone(), active.sink.clone());
            if life.phase == SessionPhase::Connected {
                life.phase = SessionPhase::Disconnecting;
            }
            snapshot
        };
        info!("Disconnecting");
        self.stop_audio_input();
        self.stop_capture(true);

        let mut result = Ok(());
        if let Some(sink) = sink {
            let _serial = self.send_lock.lock().await;
            if let Err(e) = sink.close(DISCONNECT_REASON).await {
                self.report("Error during disconnect attempt", &e);
                result = Err(e);
            }
        }
        token.cancel();
        if result.is_err() {
            self.teardown(Some(id), SessionPhase::Idle);
        }
        result
    }

    async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            debug!("Disconnect during shutdown failed: {}", e);
        }
        self.abort_capture_task();
        if !self.teardown(None, SessionPhase::Idle) {
            let mut life = self.lifecycle.lock();
            if life.active.is_none() && life.phase == SessionPhase::Failed {
                life.phase = SessionPhase::Idle;
            }
        }
    }
}
