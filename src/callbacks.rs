//! Listener interface for session events
//!
//! Every method has a no-op default, so implementors override only what
//! they care about. Callbacks run inline on the task that produced the
//! event (receive loop, capture loop or the caller) and should not block.

use crate::channel::FrameKind;
use crate::error::LiveError;
use crate::protocol::FunctionCall;
use crate::state::LiveStatus;

pub trait LiveCallbacks: Send + Sync {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
    fn on_text_received(&self, _text: &str) {}
    /// The caller signalled intent to stream microphone audio.
    fn on_audio_started(&self) {}
    fn on_audio_stopped(&self) {}
    fn on_ai_speaking_started(&self) {}
    fn on_ai_speaking_stopped(&self) {}
    fn on_screen_capture_started(&self) {}
    fn on_screen_capture_stopped(&self) {}
    fn on_error(&self, _message: &str, _cause: Option<&LiveError>) {}
    fn on_status_update(&self, _status: &LiveStatus) {}

    /// Base64 audio payload from the model. Decoding and playback are up to the caller.
    fn on_audio_chunk_received(&self, _base64_audio: &str) {}
    fn on_input_transcription(&self, _text: &str) {}
    fn on_output_transcription(&self, _text: &str) {}

    /// Runs right before the setup message is sent.
    fn before_setup(&self) {}
    /// Every text or binary frame, after it has been handled.
    fn on_raw_frame(&self, _text: &str, _kind: FrameKind) {}
    fn on_function_calls(&self, _calls: &[FunctionCall]) {}
    /// The encoded tool response, just before it goes on the wire.
    fn on_send_function_response(&self, _payload: &str) {}
    fn after_function_response_sent(&self) {}
    fn on_request_completed(&self) {}
}

/// Callbacks that ignore every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl LiveCallbacks for NoopCallbacks {}

/// Callbacks that forward each event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallbacks;

impl LiveCallbacks for LoggingCallbacks {
    fn on_connected(&self) {
        tracing::info!("Connected to Gemini Live");
    }

    fn on_disconnected(&self) {
        tracing::info!("Disconnected from Gemini Live");
    }

    fn on_text_received(&self, text: &str) {
        tracing::info!("Model: {}", text);
    }

    fn on_ai_speaking_started(&self) {
        tracing::debug!("AI started speaking");
    }

    fn on_ai_speaking_stopped(&self) {
        tracing::debug!("AI stopped speaking");
    }

    fn on_error(&self, message: &str, cause: Option<&LiveError>) {
        match cause {
            Some(e) => tracing::error!("{} ({})", message, e),
            None => tracing::error!("{}", message),
        }
    }

    fn on_function_calls(&self, calls: &[FunctionCall]) {
        for call in calls {
            tracing::info!("Function call requested: {} {:?}", call.name, call.args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_default_callbacks_are_object_safe() {
        let noop: Arc<dyn LiveCallbacks> = Arc::new(NoopCallbacks);
        let logging: Arc<dyn LiveCallbacks> = Arc::new(LoggingCallbacks);
        let call = FunctionCall {
            id: Some("1".into()),
            name: "f".into(),
            args: None,
        };
        for listener in [noop, logging] {
            listener.on_connected();
            listener.on_text_received("hi");
            listener.on_function_calls(std::slice::from_ref(&call));
            listener.on_error("boom", Some(&LiveError::NotConnected));
            listener.on_raw_frame("{}", FrameKind::Text);
            listener.on_disconnected();
        }
    }
}
