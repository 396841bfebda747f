//! Server → Client notifications
//!
//! Every game action on the server produces one JSON envelope published to the
//! session's topic. The payload under `data` is event-specific and opaque to
//! the sync core; clients refetch the authoritative snapshot instead of
//! applying deltas.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification kind. Unknown kinds are preserved verbatim so newer servers
/// do not break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PlayerJoined,
    GameStarted,
    GameEnded,
    SessionDeleted,
    SessionUpdate,
    BalanceUpdate,
    PropertyPurchased,
    /// Synthetic: emitted locally when the transport gives up reconnecting.
    ConnectionFailed,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::PlayerJoined => "PLAYER_JOINED",
            EventKind::GameStarted => "GAME_STARTED",
            EventKind::GameEnded => "GAME_ENDED",
            EventKind::SessionDeleted => "SESSION_DELETED",
            EventKind::SessionUpdate => "SESSION_UPDATE",
            EventKind::BalanceUpdate => "BALANCE_UPDATE",
            EventKind::PropertyPurchased => "PROPERTY_PURCHASED",
            EventKind::ConnectionFailed => "CONNECTION_FAILED",
            EventKind::Other(kind) => kind,
        }
    }
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "PLAYER_JOINED" => EventKind::PlayerJoined,
            "GAME_STARTED" => EventKind::GameStarted,
            "GAME_ENDED" => EventKind::GameEnded,
            "SESSION_DELETED" => EventKind::SessionDeleted,
            "SESSION_UPDATE" => EventKind::SessionUpdate,
            "BALANCE_UPDATE" => EventKind::BalanceUpdate,
            "PROPERTY_PURCHASED" => EventKind::PropertyPurchased,
            "CONNECTION_FAILED" => EventKind::ConnectionFailed,
            _ => EventKind::Other(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope published on `session/{sessionCode}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_code: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: String,
}

impl SessionEvent {
    pub fn new(kind: EventKind, session_code: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            session_code: session_code.into(),
            data,
            timestamp: crate::now_rfc3339(),
        }
    }

    /// Terminal event raised after the reconnect budget is exhausted.
    pub fn connection_failed(session_code: impl Into<String>, attempts: u32) -> Self {
        Self::new(
            EventKind::ConnectionFailed,
            session_code,
            serde_json::json!({ "attempts": attempts }),
        )
    }

    /// Parse a broker payload into an envelope.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_balance_update_envelope() {
        let json = r#"{
          "type":"BALANCE_UPDATE",
          "sessionCode":"4821",
          "data":{"playerId":1,"newBalance":1200},
          "timestamp":"2024-01-15T12:30:45Z"
        }"#;

        let parsed = SessionEvent::parse(json).expect("parse balance update");
        assert_eq!(parsed.kind, EventKind::BalanceUpdate);
        assert_eq!(parsed.session_code, "4821");
        assert_eq!(parsed.data["newBalance"], 1200);
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let json = r#"{"type":"AUCTION_STARTED","sessionCode":"1234","data":null,"timestamp":"t"}"#;
        let parsed = SessionEvent::parse(json).expect("parse unknown kind");
        assert_eq!(parsed.kind, EventKind::Other("AUCTION_STARTED".to_string()));

        let serialized = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(serialized["type"], "AUCTION_STARTED");
    }

    #[test]
    fn missing_data_and_timestamp_default() {
        let json = r#"{"type":"PLAYER_JOINED","sessionCode":"1234"}"#;
        let parsed = SessionEvent::parse(json).expect("parse minimal envelope");
        assert_eq!(parsed.kind, EventKind::PlayerJoined);
        assert!(parsed.data.is_null());
        assert!(parsed.timestamp.is_empty());
    }

    #[test]
    fn envelope_without_session_code_is_rejected() {
        assert!(SessionEvent::parse(r#"{"type":"PLAYER_JOINED"}"#).is_err());
        assert!(SessionEvent::parse("not json").is_err());
    }

    #[test]
    fn connection_failed_carries_attempts() {
        let event = SessionEvent::connection_failed("4821", 10);
        assert_eq!(event.kind, EventKind::ConnectionFailed);
        assert_eq!(event.data["attempts"], 10);
        assert!(!event.timestamp.is_empty());

        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"CONNECTION_FAILED\""));
    }
}
