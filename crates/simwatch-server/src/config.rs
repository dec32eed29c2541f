// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for simwatch-server.

use std::fs::OpenOptions;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use simwatch_core::{CapabilitySet, SessionConfig, SimulationDefinition};
use tracing::info;
use uuid::Uuid;

/// File the generated `SERVER_ID` is appended to.
pub const SERVER_ID_FILE: &str = ".env.local";

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: SocketAddr,
    /// Session timing
    pub session: SessionConfig,
    /// Simulations this process offers
    pub simulations: CapabilitySet,
    /// Game config file names accepted; `None` accepts every game
    pub accept_config_files: Option<Vec<String>>,
    /// Tags used by the payload to look up its layer
    pub layer_tags: String,
    /// Identity of this process towards the authority
    pub server_id: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A missing `SERVER_ID` is generated and appended to `server_id_file`.
    pub fn from_env(server_id_file: &Path) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), server_id_file)
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F, server_id_file: &Path) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port: u16 = var("SIMWATCH_PORT")
            .unwrap_or_else(|| "5000".to_string())
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let host = var("SIMWATCH_BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let host = IpAddr::from_str(host.trim()).map_err(|_| ConfigError::InvalidValue {
            name: "SIMWATCH_BIND_HOST",
            value: host.clone(),
        })?;

        let session = SessionConfig::new()
            .with_tick_rate(Duration::from_millis(parse_or(&var, "SIMWATCH_TICK_RATE_MS", 1000)?))
            .with_ownership_check_interval(Duration::from_secs(parse_or(
                &var,
                "SIMWATCH_OWNERSHIP_CHECK_SECS",
                60,
            )?))
            .with_credential_renewal_interval(Duration::from_secs(parse_or(
                &var,
                "SIMWATCH_TOKEN_RENEWAL_SECS",
                900,
            )?))
            .with_request_timeout(Duration::from_millis(parse_or(
                &var,
                "SIMWATCH_REQUEST_TIMEOUT_MS",
                30_000,
            )?))
            .with_monitor_failure_limit(parse_or(&var, "SIMWATCH_MONITOR_FAILURE_LIMIT", 2)?)
            .with_ended_linger(Duration::from_secs(parse_or(
                &var,
                "SIMWATCH_ENDED_LINGER_SECS",
                60,
            )?));

        let simulations = parse_simulations(
            &var("SIMWATCH_SIMULATIONS").unwrap_or_else(|| "SandExtraction=1.0.0".to_string()),
        )?;

        let accept_config_files = var("SIMWATCH_ACCEPT_CONFIG_FILES").map(|v| split_list(&v));

        let layer_tags = var("SIMWATCH_LAYER_TAGS").unwrap_or_else(|| "EEZ,Polygon".to_string());

        let server_id = match var("SERVER_ID") {
            Some(id) => id.trim().to_string(),
            None => generate_server_id(server_id_file)?,
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            session,
            simulations,
            accept_config_files,
            layer_tags,
            server_id,
        })
    }

    /// Override the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value,
        }),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `name=version,name=version` into an offered capability set.
pub fn parse_simulations(value: &str) -> Result<CapabilitySet, ConfigError> {
    let mut set = CapabilitySet::new();
    for item in split_list(value) {
        let (name, version) = item
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidSimulations(item.clone()))?;
        let definition = SimulationDefinition::parse(name.trim(), version.trim())
            .map_err(|_| ConfigError::InvalidSimulations(item.clone()))?;
        set.insert(definition);
    }
    if set.is_empty() {
        return Err(ConfigError::InvalidSimulations(value.to_string()));
    }
    Ok(set)
}

/// Generate a new server id and append it to `path`.
pub fn generate_server_id(path: &Path) -> Result<String, ConfigError> {
    let server_id = Uuid::new_v4().to_string();
    info!(path = %path.display(), "SERVER_ID is not set, generating a new one");

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfigError::ServerId {
            path: path.display().to_string(),
            source,
        })?;
    writeln!(file, "SERVER_ID={}", server_id).map_err(|source| ConfigError::ServerId {
        path: path.display().to_string(),
        source,
    })?;

    Ok(server_id)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable holds a value that cannot be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// The offered simulations are malformed.
    #[error("Invalid simulation definition '{0}', expected name=version")]
    InvalidSimulations(String),
    /// The generated server id could not be stored.
    #[error("Failed to store SERVER_ID in {path}: {source}")]
    ServerId {
        /// File written to.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
