// Copyright (c) 2024-2025 querykit contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Client configuration
//!
//! Configuration is plain JSON. Every field has a default, so a file only
//! needs the values it changes. Idempotency is not configurable: it is a
//! property of each call site.

use crate::error::{Error, Result};
use crate::retry::{Backoff, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_TARGET: &str = "QUERYKIT_TARGET";
pub const ENV_MAX_ATTEMPTS: &str = "QUERYKIT_MAX_ATTEMPTS";
pub const ENV_MAX_ELAPSED_MS: &str = "QUERYKIT_MAX_ELAPSED_MS";

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Store address, e.g. `memory://local`
    pub target: String,

    /// Upper bound on opening the connection
    pub connect_timeout_ms: u64,

    pub retry: RetryConfig,
}

/// Retry budget and backoff schedules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,

    /// Total time budget; `null` means attempts are the only bound
    pub max_elapsed_ms: Option<u64>,

    /// Schedule for transport errors and conflicts
    pub fast_backoff: BackoffConfig,

    /// Schedule for overload errors
    pub slow_backoff: BackoffConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_jitter() -> bool {
    true
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            target: "memory://local".to_string(),
            connect_timeout_ms: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_elapsed_ms: Some(60_000),
            fast_backoff: BackoffConfig {
                base_ms: 5,
                cap_ms: 500,
                jitter: true,
            },
            slow_backoff: BackoffConfig {
                base_ms: 1_000,
                cap_ms: 5_000,
                jitter: true,
            },
        }
    }
}

impl RetryConfig {
    /// One attempt per operation
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Many short retries, for workloads that expect write contention
    pub fn contended() -> Self {
        let mut config = Self::default();
        config.max_attempts = 50;
        config.max_elapsed_ms = Some(120_000);
        config.fast_backoff.base_ms = 10;
        config.fast_backoff.cap_ms = 1_000;
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidArgument(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, backoff) in [("fast", &self.fast_backoff), ("slow", &self.slow_backoff)] {
            if backoff.cap_ms < backoff.base_ms {
                return Err(Error::InvalidArgument(format!(
                    "retry.{}_backoff: cap_ms ({}) is below base_ms ({})",
                    name, backoff.cap_ms, backoff.base_ms
                )));
            }
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Load a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidArgument(format!("cannot read config {}: {}", path.display(), e))
        })?;
        let config: ClientConfig = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidArgument(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `QUERYKIT_*` environment variables on top of this config
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(target) = std::env::var(ENV_TARGET) {
            self.target = target;
        }
        if let Ok(raw) = std::env::var(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_env(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Ok(raw) = std::env::var(ENV_MAX_ELAPSED_MS) {
            self.retry.max_elapsed_ms = Some(parse_env(ENV_MAX_ELAPSED_MS, &raw)?);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::InvalidArgument("target must not be empty".to_string()));
        }
        self.retry.validate()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::InvalidArgument(format!("{}={:?}: {}", name, raw, e)))
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Backoff {
            base: Duration::from_millis(config.base_ms),
            cap: Duration::from_millis(config.cap_ms),
            jitter: config.jitter,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            idempotent: false,
            max_attempts: config.max_attempts,
            max_elapsed: config.max_elapsed_ms.map(Duration::from_millis),
            fast_backoff: Backoff::from(&config.fast_backoff),
            slow_backoff: Backoff::from(&config.slow_backoff),
            classifier: None,
        }
    }
}
