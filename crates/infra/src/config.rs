//! Runtime configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::consistency::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardenConfig {
    pub bind: SocketAddr,
    pub jwt_secret: String,
    pub consistency_max_wait: Duration,
    pub consistency_tick: Duration,
    pub request_timeout: Duration,
}

impl WardenConfig {
    pub const BIND: &'static str = "WARDEN_BIND";
    pub const JWT_SECRET: &'static str = "WARDEN_JWT_SECRET";
    pub const CONSISTENCY_MAX_WAIT_MS: &'static str = "WARDEN_CONSISTENCY_MAX_WAIT_MS";
    pub const CONSISTENCY_TICK_MS: &'static str = "WARDEN_CONSISTENCY_TICK_MS";
    pub const REQUEST_TIMEOUT_MS: &'static str = "WARDEN_REQUEST_TIMEOUT_MS";

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = match lookup(Self::BIND) {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key: Self::BIND,
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 8080)),
        };

        let jwt_secret = lookup(Self::JWT_SECRET)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing(Self::JWT_SECRET))?;

        Ok(Self {
            bind,
            jwt_secret,
            consistency_max_wait: millis(&lookup, Self::CONSISTENCY_MAX_WAIT_MS, 60_000)?,
            consistency_tick: millis(&lookup, Self::CONSISTENCY_TICK_MS, 100)?,
            request_timeout: millis(&lookup, Self::REQUEST_TIMEOUT_MS, 30_000)?,
        })
    }

    pub fn consistency_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.consistency_max_wait, self.consistency_tick)
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        None => Ok(Duration::from_millis(default)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
    }
}
