// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Runtime configuration.
//!
//! Values come from the process environment (optionally seeded from a `.env`
//! file). Command-line flags override them in the binaries.

use std::env;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Behavior switches for the admission engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Confirming one offer rejects the student's other approved offers.
    pub cascade_on_confirm: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cascade_on_confirm: true,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// HTTP binding for the server demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub telemetry: TelemetryConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Loads configuration from the environment, reading `.env` first if present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_level = lookup("ADMISSION_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let cascade_on_confirm = match lookup("ADMISSION_CASCADE_ON_CONFIRM") {
            None => true,
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidFlag {
                key: "ADMISSION_CASCADE_ON_CONFIRM",
                value,
            })?,
        };

        let host = lookup("ADMISSION_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = match lookup("ADMISSION_PORT") {
            None => 3000,
            Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidPort)?,
        };

        Ok(Self {
            engine: EngineConfig { cascade_on_confirm },
            telemetry: TelemetryConfig { log_level },
            server: ServerConfig { host, port },
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ADMISSION_PORT must be a valid u16")]
    InvalidPort,

    #[error("ADMISSION_HOST must parse to an IPv4 or IPv6 address")]
    InvalidHost { source: std::net::AddrParseError },

    #[error("{key} must be a boolean, got '{value}'")]
    InvalidFlag { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]).unwrap();
        assert!(config.engine.cascade_on_confirm);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("ADMISSION_CASCADE_ON_CONFIRM", "off"),
            ("ADMISSION_LOG_LEVEL", "debug"),
            ("ADMISSION_PORT", "8080"),
        ])
        .unwrap();
        assert!(!config.engine.cascade_on_confirm);
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn rejects_bad_flag() {
        let error = config_from(&[("ADMISSION_CASCADE_ON_CONFIRM", "maybe")]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "ADMISSION_CASCADE_ON_CONFIRM must be a boolean, got 'maybe'"
        );
    }

    #[test]
    fn rejects_bad_port() {
        assert!(matches!(
            config_from(&[("ADMISSION_PORT", "99999")]),
            Err(ConfigError::InvalidPort)
        ));
    }

    #[test]
    fn accepts_localhost_host() {
        let config = config_from(&[("ADMISSION_HOST", "localhost")]).unwrap();
        let addr = config.server.socket_addr().unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
    }
}
