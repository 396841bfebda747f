//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Lifecycle of a game session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Finished,
}

/// Token color; unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Black,
    White,
}

impl PlayerColor {
    pub const ALL: [PlayerColor; 8] = [
        PlayerColor::Red,
        PlayerColor::Blue,
        PlayerColor::Green,
        PlayerColor::Yellow,
        PlayerColor::Purple,
        PlayerColor::Orange,
        PlayerColor::Black,
        PlayerColor::White,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerColor::Red => "RED",
            PlayerColor::Blue => "BLUE",
            PlayerColor::Green => "GREEN",
            PlayerColor::Yellow => "YELLOW",
            PlayerColor::Purple => "PURPLE",
            PlayerColor::Orange => "ORANGE",
            PlayerColor::Black => "BLACK",
            PlayerColor::White => "WHITE",
        }
    }
}

impl std::str::FromStr for PlayerColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayerColor::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown player color: {s}"))
    }
}

impl std::fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A participant in a session.
///
/// The host flag has been serialized as both `isHost` and `host` by different
/// server revisions. It is always written as `isHost` and read from either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub balance: i64,
    pub color: PlayerColor,
    #[serde(rename = "isHost", alias = "host", default)]
    pub is_host: bool,
    #[serde(default)]
    pub properties_count: u32,
}

impl Player {
    /// True when every field the UI renders for a player is unchanged.
    pub fn materially_eq(&self, other: &Player) -> bool {
        self.balance == other.balance
            && self.properties_count == other.properties_count
            && self.is_host == other.is_host
    }
}

/// Authoritative snapshot of one game, as returned by the command API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: i64,
    pub session_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    pub status: SessionStatus,
    #[serde(default)]
    pub players: Vec<Player>,
    #[serde(default)]
    pub created_at: String,
}

impl Session {
    /// Coarse equality: identity, status, and per-player money/property counts.
    ///
    /// Incidental fields (names, colors, timestamps) are ignored so that a
    /// refetch returning the same game state does not trigger downstream work.
    pub fn materially_eq(&self, other: &Session) -> bool {
        self.id == other.id
            && self.session_code == other.session_code
            && self.status == other.status
            && self.players.len() == other.players.len()
            && self.players.iter().zip(&other.players).all(|(a, b)| {
                a.id == b.id && a.balance == b.balance && a.properties_count == b.properties_count
            })
    }

    pub fn player(&self, id: i64) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Case-insensitive name lookup
    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        let name = name.trim();
        self.players
            .iter()
            .find(|p| p.name.trim().eq_ignore_ascii_case(name))
    }

    /// First player flagged as host. Sessions with no host yield `None`.
    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}
