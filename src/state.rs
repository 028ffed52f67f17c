//! Connection state of a live session
//!
//! The four derived flags are independent of each other and are only ever
//! changed through [`SessionFlags::set`], a compare-and-set that reports
//! whether anything actually changed. Callers fire callbacks only on a real
//! transition, which makes every start/stop pair idempotent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    /// Idle after a failed connection. A new `connect()` may be attempted.
    Failed,
}

impl SessionPhase {
    /// Whether `connect()` may start from this phase.
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Idle | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Connected,
    /// The caller signalled it is streaming microphone audio.
    UserSpeaking,
    AiSpeaking,
    CapturingScreen,
}

#[derive(Debug, Default)]
pub struct SessionFlags {
    connected: AtomicBool,
    user_speaking: AtomicBool,
    ai_speaking: AtomicBool,
    capturing: AtomicBool,
}

impl SessionFlags {
    fn slot(&self, flag: Flag) -> &AtomicBool {
        match flag {
            Flag::Connected => &self.connected,
            Flag::UserSpeaking => &self.user_speaking,
            Flag::AiSpeaking => &self.ai_speaking,
            Flag::CapturingScreen => &self.capturing,
        }
    }

    pub fn get(&self, flag: Flag) -> bool {
        self.slot(flag).load(Ordering::SeqCst)
    }

    /// Move `flag` to `value`. Returns `true` only if it was not already there.
    pub fn set(&self, flag: Flag, value: bool) -> bool {
        self.slot(flag)
            .compare_exchange(!value, value, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Point-in-time view of a session, passed to `on_status_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStatus {
    pub is_connected: bool,
    pub is_recording_audio: bool,
    pub is_user_speaking: bool,
    pub is_ai_speaking: bool,
    pub is_capturing_screen: bool,
    /// Active capture rectangle as `WxH`, or `N/A` before the first capture.
    pub capture_resolution: String,
    /// Requested resolution as `WxH`, or `Full Screen`.
    pub target_resolution: String,
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conn = if self.is_connected { "CONNECTED" } else { "DISCONNECTED" };
        let mic = if self.is_recording_audio { "SENDING" } else { "OFF" };
        let ai = if self.is_ai_speaking { "SPEAKING" } else { "IDLE" };
        write!(f, "[{} | Mic: {} | AI: {} | Screen: ", conn, mic, ai)?;
        if self.is_capturing_screen {
            write!(f, "ON ({})]", self.capture_resolution)
        } else {
            write!(f, "OFF]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_transitions_are_idempotent() {
        let flags = SessionFlags::default();
        assert!(!flags.set(Flag::UserSpeaking, false));
        assert!(flags.set(Flag::UserSpeaking, true));
        assert!(!flags.set(Flag::UserSpeaking, true));
        assert!(flags.get(Flag::UserSpeaking));
        assert!(flags.set(Flag::UserSpeaking, false));
        assert!(!flags.get(Flag::UserSpeaking));
    }

    #[test]
    fn test_flags_are_independent() {
        let flags = SessionFlags::default();
        assert!(flags.set(Flag::AiSpeaking, true));
        assert!(flags.set(Flag::UserSpeaking, true));
        assert!(flags.get(Flag::AiSpeaking) && flags.get(Flag::UserSpeaking));
        assert!(!flags.get(Flag::Connected));
        assert!(!flags.get(Flag::CapturingScreen));
    }

    #[test]
    fn test_phase_idle() {
        assert!(SessionPhase::Idle.is_idle());
        assert!(SessionPhase::Failed.is_idle());
        assert!(!SessionPhase::Connecting.is_idle());
        assert!(!SessionPhase::Disconnecting.is_idle());
    }

    #[test]
    fn test_status_line() {
        let mut status = LiveStatus {
            is_connected: true,
            is_recording_audio: true,
            is_user_speaking: true,
            is_ai_speaking: false,
            is_capturing_screen: true,
            capture_resolution: "1280x720".into(),
            target_resolution: "1280x720".into(),
        };
        assert_eq!(
            status.to_string(),
            "[CONNECTED | Mic: SENDING | AI: IDLE | Screen: ON (1280x720)]"
        );

        status.is_connected = false;
        status.is_recording_audio = false;
        status.is_capturing_screen = false;
        assert_eq!(
            status.to_string(),
            "[DISCONNECTED | Mic: OFF | AI: IDLE | Screen: OFF]"
        );
    }
}
