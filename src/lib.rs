//! gemini-live - client for the Gemini Live bidirectional streaming API
//!
//! A [`GeminiLiveClient`] multiplexes one WebSocket connection between
//! outbound text turns, audio chunks and periodic screen images, and the
//! inbound server events (text, audio, tool calls), which it reports through
//! [`LiveCallbacks`].

#![forbid(unsafe_code)]

pub mod callbacks;
pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod facade;
pub mod protocol;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use callbacks::{LiveCallbacks, LoggingCallbacks, NoopCallbacks};
pub use capture::{CaptureTarget, Rect, ScreenSource};
pub use channel::{Connector, WsConnector};
pub use config::{FunctionResponseMode, LiveConfig, ResponseModality};
pub use error::{LiveError, Result};
pub use facade::{create_session, launch, SessionHandle};
pub use protocol::{FunctionCall, FunctionDeclaration};
pub use session::{GeminiLiveClient, GeminiLiveClientBuilder};
pub use state::{LiveStatus, SessionPhase};
