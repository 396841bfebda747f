//! Boardbank Protocol
//!
//! Wire types shared by Boardbank clients: the session model returned by the
//! command API, the notification envelope published per session, and the
//! STOMP framing the broker speaks over WebSocket.

pub mod client;
pub mod frame;
pub mod server;
pub mod types;

pub use client::{is_valid_session_code, CreateSessionRequest, JoinSessionRequest, StartGameRequest};
pub use frame::{Command, Frame, FrameError, HeartBeat, Inbound};
pub use server::{EventKind, SessionEvent};
pub use types::*;

/// Logical topic for a session's notifications
pub fn session_topic(session_code: &str) -> String {
    format!("session/{session_code}")
}

/// Broker destination for a logical topic
pub fn topic_destination(topic: &str) -> String {
    format!("/topic/{topic}")
}

/// Current time as an RFC 3339 UTC string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_derived_from_session_code() {
        assert_eq!(session_topic("4821"), "session/4821");
        assert_eq!(topic_destination(&session_topic("4821")), "/topic/session/4821");
    }

    #[test]
    fn timestamps_are_utc_rfc3339() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }
}
