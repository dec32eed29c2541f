// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP client for the authority API.
//!
//! Every call is a form-encoded POST carrying the session's access token as
//! bearer credential and the server id in `X-Server-Id`. The authority wraps
//! each answer as `{ success, message, payload }`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use simwatch_core::client::{Fields, Result};
use simwatch_core::{
    ApiToken, AuthorityClient, AuthorityConnector, AuthorityError, Credentials, Kpi,
    SessionToken, SimulationDefinition,
};
use tracing::debug;

use crate::wire::{WireToken, lenient_bool};

const SERVER_ID_HEADER: &str = "x-server-id";

pub const REGISTER_CAPABILITIES: &str = "/api/Simulation/Upsert";
pub const RENEW_CREDENTIALS: &str = "/api/User/RequestToken";
pub const FETCH_OWNER_TOKEN: &str = "/api/Simulation/GetWatchdogTokenForServer";
pub const SUBMIT_KPIS: &str = "/api/kpi/BatchPost";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default, deserialize_with = "lenient_bool")]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct RenewedTokens {
    api_access_token: WireToken,
    api_refresh_token: WireToken,
}

#[derive(Debug, Deserialize)]
struct OwnerToken {
    watchdog_token: String,
}

/// Authority client bound to one API base address.
#[derive(Debug, Clone)]
pub struct HttpAuthorityClient {
    http: reqwest::Client,
    base: Url,
    server_id: String,
}

impl HttpAuthorityClient {
    /// Create a client for `api_base`.
    pub fn new(api_base: &str, server_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Self::with_http(http, api_base, server_id)
    }

    /// Create a client reusing an existing connection pool.
    pub fn with_http(
        http: reqwest::Client,
        api_base: &str,
        server_id: impl Into<String>,
    ) -> Result<Self> {
        let base = parse_base(api_base)?;
        Ok(Self {
            http,
            base,
            server_id: server_id.into(),
        })
    }

    /// Base address calls are resolved against.
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AuthorityError::InvalidAddress(format!("{}{}: {}", self.base, path, e)))
    }

    /// POST `fields` to `path` and return the unwrapped payload.
    async fn post(
        &self,
        bearer: &ApiToken,
        path: &str,
        fields: &Fields,
        headers: HeaderMap,
    ) -> Result<Value> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "Calling authority");

        let response = self
            .http
            .post(url)
            .bearer_auth(&bearer.token)
            .header(ACCEPT, "application/json")
            .header(SERVER_ID_HEADER, &self.server_id)
            .headers(headers)
            .form(fields)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        let body = response.text().await.map_err(send_error)?;

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(AuthorityError::Refused(format!("{} {}", status.as_u16(), body)));
        }
        if !status.is_success() {
            return Err(AuthorityError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| AuthorityError::Decode(format!("{}: {}", path, e)))?;
        if !envelope.success {
            return Err(AuthorityError::Refused(
                envelope.message.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        Ok(envelope.payload)
    }
}

fn parse_base(api_base: &str) -> Result<Url> {
    let trimmed = api_base.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&normalized)
        .map_err(|e| AuthorityError::InvalidAddress(format!("{}: {}", api_base, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AuthorityError::InvalidAddress(format!(
            "{}: unsupported scheme",
            api_base
        )));
    }
    Ok(url)
}

fn send_error(err: reqwest::Error) -> AuthorityError {
    if err.is_timeout() {
        AuthorityError::Timeout
    } else {
        AuthorityError::Transport(err.to_string())
    }
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| AuthorityError::Decode(format!("{}: {}", path, e)))
}

fn flag(name: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static(name), HeaderValue::from_static("true"));
    headers
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn register_capabilities(
        &self,
        access: &ApiToken,
        definitions: &[SimulationDefinition],
    ) -> Result<()> {
        let fields: Fields = definitions
            .iter()
            .map(|d| (d.name.clone(), d.version.to_string()))
            .collect();
        self.post(access, REGISTER_CAPABILITIES, &fields, flag("x-remove-previous"))
            .await?;
        Ok(())
    }

    async fn renew_credentials(&self, refresh: &ApiToken) -> Result<Credentials> {
        let fields = Fields::from([("api_refresh_token".to_string(), refresh.token.clone())]);
        let payload = self
            .post(refresh, RENEW_CREDENTIALS, &fields, HeaderMap::new())
            .await?;
        let renewed: RenewedTokens = decode(RENEW_CREDENTIALS, payload)?;
        Ok(Credentials::new(
            renewed.api_access_token.into(),
            renewed.api_refresh_token.into(),
        ))
    }

    async fn fetch_owner_token(&self, access: &ApiToken) -> Result<SessionToken> {
        let payload = self
            .post(access, FETCH_OWNER_TOKEN, &Fields::new(), HeaderMap::new())
            .await?;
        let owner: OwnerToken = decode(FETCH_OWNER_TOKEN, payload)?;
        Ok(SessionToken::new(owner.watchdog_token))
    }

    async fn submit_kpis(&self, access: &ApiToken, kpis: &[Kpi]) -> Result<()> {
        let encoded = serde_json::to_string(kpis)
            .map_err(|e| AuthorityError::Decode(format!("Failed to encode KPIs: {}", e)))?;
        let fields = Fields::from([("kpiValues".to_string(), encoded)]);
        self.post(
            access,
            SUBMIT_KPIS,
            &fields,
            flag("x-notify-monthly-simulation-finished"),
        )
        .await?;
        Ok(())
    }

    async fn call(&self, access: &ApiToken, endpoint: &str, fields: &Fields) -> Result<Value> {
        self.post(access, endpoint, fields, HeaderMap::new()).await
    }
}

/// Creates [`HttpAuthorityClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    server_id: String,
}

impl HttpConnector {
    /// Create a connector whose clients time out after `timeout`.
    pub fn new(server_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthorityError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            server_id: server_id.into(),
        })
    }
}

impl AuthorityConnector for HttpConnector {
    fn connect(&self, api_base: &str) -> Result<Arc<dyn AuthorityClient>> {
        let client = HttpAuthorityClient::with_http(self.http.clone(), api_base, &self.server_id)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_gets_trailing_slash() {
        let client =
            HttpAuthorityClient::new("http://msp.local/api_root", "srv", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base().as_str(), "http://msp.local/api_root/");
        assert_eq!(
            client.endpoint(REGISTER_CAPABILITIES).unwrap().as_str(),
            "http://msp.local/api_root/api/Simulation/Upsert"
        );
    }

    #[test]
    fn test_invalid_base_is_rejected() {
        let connector = HttpConnector::new("srv", Duration::from_secs(1)).unwrap();
        assert!(matches!(
            connector.connect("not a url"),
            Err(AuthorityError::InvalidAddress(_))
        ));
        assert!(matches!(
            connector.connect("ftp://msp.local"),
            Err(AuthorityError::InvalidAddress(_))
        ));
    }
}
