// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Reprise engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Worker poll interval
    pub poll_interval: Duration,
    /// How many calls a worker scans per tick
    pub call_batch_limit: i64,
    /// Webhook/HTTP bind address, when the push surface is enabled
    pub webhook_addr: Option<SocketAddr>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `REPRISE_DATABASE_URL`: PostgreSQL or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `REPRISE_POLL_INTERVAL_MS`: worker poll interval (default: 1000)
    /// - `REPRISE_CALL_BATCH_LIMIT`: calls scanned per tick (default: 50)
    /// - `REPRISE_WEBHOOK_ADDR`: HTTP bind address, e.g. `0.0.0.0:8080`
    ///   (default: disabled)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("REPRISE_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("REPRISE_DATABASE_URL"))?;

        let poll_interval_ms: u64 = std::env::var("REPRISE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("REPRISE_POLL_INTERVAL_MS", "must be milliseconds")
            })?;

        let call_batch_limit: i64 = std::env::var("REPRISE_CALL_BATCH_LIMIT")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("REPRISE_CALL_BATCH_LIMIT", "must be a positive integer")
            })?;
        if call_batch_limit <= 0 {
            return Err(ConfigError::Invalid(
                "REPRISE_CALL_BATCH_LIMIT",
                "must be a positive integer",
            ));
        }

        let webhook_addr = match std::env::var("REPRISE_WEBHOOK_ADDR") {
            Ok(raw) => Some(raw.parse().map_err(|_| {
                ConfigError::Invalid("REPRISE_WEBHOOK_ADDR", "must be a socket address")
            })?),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            poll_interval: Duration::from_millis(poll_interval_ms),
            call_batch_limit,
            webhook_addr,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
