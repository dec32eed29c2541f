// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared data types exchanged with the authority.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Month value a session holds while it is being set up.
pub const SETUP_MONTH: i32 = -1;

/// Opaque token identifying one session for its entire lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Borrow the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token carries no characters at all.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Game states announced by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameState {
    /// The game is being configured; sessions run their setup phase.
    Setup,
    /// Months advance in real time.
    Play,
    /// The game clock is halted.
    Pause,
    /// The authority is running its own month simulation.
    Simulation,
    /// Months advance as fast as participants can keep up.
    FastForward,
    /// The game is over.
    End,
}

impl GameState {
    /// All known states, in declaration order.
    pub const ALL: [GameState; 6] = [
        GameState::Setup,
        GameState::Play,
        GameState::Pause,
        GameState::Simulation,
        GameState::FastForward,
        GameState::End,
    ];

    /// Canonical name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::Setup => "Setup",
            GameState::Play => "Play",
            GameState::Pause => "Pause",
            GameState::Simulation => "Simulation",
            GameState::FastForward => "FastForward",
            GameState::End => "End",
        }
    }

    /// Whether the game is running past setup and before its end.
    pub fn is_active(&self) -> bool {
        !matches!(self, GameState::Setup | GameState::End)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a game state name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid game state: {0}")]
pub struct UnknownGameState(pub String);

impl FromStr for GameState {
    type Err = UnknownGameState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        GameState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownGameState(s.to_string()))
    }
}

/// A bearer credential with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiToken {
    /// Raw token value.
    pub token: String,
    /// Instant after which the authority no longer honours the token.
    pub valid_until: DateTime<Utc>,
}

impl ApiToken {
    /// Create a token valid until the given instant.
    pub fn new(token: impl Into<String>, valid_until: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            valid_until,
        }
    }

    /// Whether the token has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until <= now
    }
}

/// Access/refresh credential pair held by a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Short-lived token sent with every call.
    pub access: ApiToken,
    /// Longer-lived token exchanged for a fresh pair.
    pub refresh: ApiToken,
}

impl Credentials {
    /// Bundle an access and refresh token.
    pub fn new(access: ApiToken, refresh: ApiToken) -> Self {
        Self { access, refresh }
    }
}

/// Description of the game a session belongs to, sent on first contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameSessionInfo {
    pub id: i64,
    pub name: String,
    pub region: String,
    pub config_version: i64,
    pub config_version_message: String,
    pub config_file_name: String,
    pub config_file_description: String,
    pub config_file_metadata_date_modified: String,
    pub config_file_metadata_model_hash: String,
    pub config_file_metadata_editor_version: String,
    pub config_file_metadata_config_version: String,
    pub server_version: String,
}

/// A key performance indicator reported at the end of a month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub name: String,
    #[serde(rename = "type")]
    pub kpi_type: String,
    pub value: f64,
    pub unit: String,
    pub month: i32,
    /// Country the value applies to, `-1` for all countries.
    pub country: i32,
}

impl Kpi {
    /// External KPI not tied to a particular country.
    pub fn external(name: impl Into<String>, value: f64, unit: impl Into<String>, month: i32) -> Self {
        Self {
            name: name.into(),
            kpi_type: "EXTERNAL".to_string(),
            value,
            unit: unit.into(),
            month,
            country: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_state_parse_case_insensitive() {
        assert_eq!("setup".parse::<GameState>().unwrap(), GameState::Setup);
        assert_eq!("END".parse::<GameState>().unwrap(), GameState::End);
        assert_eq!(
            " fastforward ".parse::<GameState>().unwrap(),
            GameState::FastForward
        );
    }

    #[test]
    fn test_game_state_parse_unknown() {
        let err = "running".parse::<GameState>().unwrap_err();
        assert!(err.to_string().contains("running"));
    }

    #[test]
    fn test_game_state_active() {
        assert!(!GameState::Setup.is_active());
        assert!(!GameState::End.is_active());
        assert!(GameState::Play.is_active());
        assert!(GameState::Pause.is_active());
    }

    #[test]
    fn test_api_token_expiry() {
        let now = Utc::now();
        let token = ApiToken::new("abc", now);
        assert!(token.is_expired(now));
        assert!(!token.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_kpi_serializes_type_field() {
        let kpi = Kpi::external("Extracted volume", 12.5, "m3", 3);
        let json = serde_json::to_value(&kpi).unwrap();
        assert_eq!(json["type"], "EXTERNAL");
        assert_eq!(json["country"], -1);
    }

    #[test]
    fn test_session_info_tolerates_missing_fields() {
        let info: GameSessionInfo =
            serde_json::from_str(r#"{"id": 7, "config_file_name": "North_Sea"}"#).unwrap();
        assert_eq!(info.id, 7);
        assert_eq!(info.config_file_name, "North_Sea");
        assert!(info.region.is_empty());
    }
}
