// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire formats shared by the inbound API and the authority client.
//!
//! The authority is not strict about its JSON: timestamps may come without
//! an offset and booleans may be sent as `"1"`/`"0"`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use simwatch_core::ApiToken;

/// An API token as the authority sends it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireToken {
    pub token: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub valid_until: DateTime<Utc>,
}

impl From<WireToken> for ApiToken {
    fn from(wire: WireToken) -> Self {
        ApiToken::new(wire.token, wire.valid_until)
    }
}

/// Parse a JSON-encoded API token.
pub fn parse_token(raw: &str) -> Result<ApiToken, serde_json::Error> {
    serde_json::from_str::<WireToken>(raw).map(ApiToken::from)
}

/// Parse a timestamp, treating values without an offset as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

/// Accept `true`/`false`, `1`/`0` and their string forms.
pub fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Number(value) => Ok(value != 0),
        Flag::Text(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" | "" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean '{}'", other))),
        },
    }
}
