//! Client → Server request bodies for the session command API

use serde::{Deserialize, Serialize};

use crate::types::PlayerColor;

/// `POST /api/sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub host_name: String,
}

/// `POST /api/sessions/{code}/join`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSessionRequest {
    pub player_name: String,
    pub color: PlayerColor,
}

/// `POST /api/sessions/{code}/start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartGameRequest {
    pub host_player_id: i64,
}

/// Whether a string looks like a shareable session code (four digits).
pub fn is_valid_session_code(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit())
}
