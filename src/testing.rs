//! Test doubles shared by the module tests.

use crate::callbacks::LiveCallbacks;
use crate::capture::{Rect, ScreenSource};
use crate::channel::FrameKind;
use crate::error::{LiveError, Result};
use crate::protocol::FunctionCall;
use crate::state::LiveStatus;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    Text(String),
    AudioStarted,
    AudioStopped,
    AiSpeakingStarted,
    AiSpeakingStopped,
    CaptureStarted,
    CaptureStopped,
    Error(String),
    Status,
    AudioChunk(String),
    InputTranscription(String),
    OutputTranscription(String),
    BeforeSetup,
    RawFrame(FrameKind),
    FunctionCalls(usize),
    FunctionResponse(String),
    FunctionResponseSent,
    RequestCompleted,
}

/// Records every callback in order.
#[derive(Clone, Default)]
pub struct RecordingCallbacks {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingCallbacks {
    fn push(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Error(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

impl LiveCallbacks for RecordingCallbacks {
    fn on_connected(&self) {
        self.push(Event::Connected);
    }

    fn on_disconnected(&self) {
        self.push(Event::Disconnected);
    }

    fn on_text_received(&self, text: &str) {
        self.push(Event::Text(text.to_string()));
    }

    fn on_audio_started(&self) {
        self.push(Event::AudioStarted);
    }

    fn on_audio_stopped(&self) {
        self.push(Event::AudioStopped);
    }

    fn on_ai_speaking_started(&self) {
        self.push(Event::AiSpeakingStarted);
    }

    fn on_ai_speaking_stopped(&self) {
        self.push(Event::AiSpeakingStopped);
    }

    fn on_screen_capture_started(&self) {
        self.push(Event::CaptureStarted);
    }

    fn on_screen_capture_stopped(&self) {
        self.push(Event::CaptureStopped);
    }

    fn on_error(&self, message: &str, _cause: Option<&LiveError>) {
        self.push(Event::Error(message.to_string()));
    }

    fn on_status_update(&self, _status: &LiveStatus) {
        self.push(Event::Status);
    }

    fn on_audio_chunk_received(&self, base64_audio: &str) {
        self.push(Event::AudioChunk(base64_audio.to_string()));
    }

    fn on_input_transcription(&self, text: &str) {
        self.push(Event::InputTranscription(text.to_string()));
    }

    fn on_output_transcription(&self, text: &str) {
        self.push(Event::OutputTranscription(text.to_string()));
    }

    fn before_setup(&self) {
        self.push(Event::BeforeSetup);
    }

    fn on_raw_frame(&self, _text: &str, kind: FrameKind) {
        self.push(Event::RawFrame(kind));
    }

    fn on_function_calls(&self, calls: &[FunctionCall]) {
        self.push(Event::FunctionCalls(calls.len()));
    }

    fn on_send_function_response(&self, payload: &str) {
        self.push(Event::FunctionResponse(payload.to_string()));
    }

    fn after_function_response_sent(&self) {
        self.push(Event::FunctionResponseSent);
    }

    fn on_request_completed(&self) {
        self.push(Event::RequestCompleted);
    }
}

/// Display of a fixed size that always shows the same color.
pub struct SolidScreen {
    width: u32,
    height: u32,
}

impl SolidScreen {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl ScreenSource for SolidScreen {
    fn display_bounds(&self) -> Result<Rect> {
        Ok(Rect::new(0, 0, self.width, self.height))
    }

    fn capture(&self, rect: Rect) -> Result<RgbaImage> {
        Ok(RgbaImage::from_pixel(rect.width, rect.height, Rgba([30, 144, 255, 255])))
    }
}

/// Solid display whose first `failures` captures fail.
pub struct FlakyScreen {
    screen: SolidScreen,
    failures: AtomicUsize,
}

impl FlakyScreen {
    pub fn new(width: u32, height: u32, failures: usize) -> Self {
        Self {
            screen: SolidScreen::new(width, height),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl ScreenSource for FlakyScreen {
    fn display_bounds(&self) -> Result<Rect> {
        self.screen.display_bounds()
    }

    fn capture(&self, rect: Rect) -> Result<RgbaImage> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LiveError::unavailable("screen grab failed"));
        }
        self.screen.capture(rect)
    }
}
