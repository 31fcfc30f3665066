//! Runtime configuration.
//!
//! Every value has a default and can be overridden from the environment
//! (`HINGE_*` keys, `.env` honoured in development). See
//! [`HingeConfig::from_env`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use backon::ExponentialBuilder;
use dotenvy::dotenv;

use crate::retention::RetentionPolicy;

/// Runtime configuration for a [`SignalHub`](crate::hub::SignalHub).
#[derive(Debug, Clone, PartialEq)]
pub struct HingeConfig {
    /// Default retention for doors that do not override it.
    pub retention: RetentionPolicy,
    /// Upper bound on handing one stimulation to the fan-out.
    pub stimulation_timeout: Duration,
    /// Total subscription attempts per source, first try included.
    pub subscribe_max_attempts: usize,
    pub subscribe_min_delay: Duration,
    pub subscribe_max_delay: Duration,
    pub watch_capacity: usize,
}

impl Default for HingeConfig {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            stimulation_timeout: Duration::from_secs(1),
            subscribe_max_attempts: 5,
            subscribe_min_delay: Duration::from_millis(50),
            subscribe_max_delay: Duration::from_secs(2),
            watch_capacity: crate::bus::DEFAULT_CAPACITY,
        }
    }
}

impl HingeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| -> Result<Option<u64>> { parse_var(&lookup, key) };

        Ok(Self {
            retention: RetentionPolicy {
                history_max_retention: parse_var(&lookup, "HINGE_HISTORY_MAX_RETENTION")?
                    .unwrap_or(defaults.retention.history_max_retention),
                not_consumed_max_retention: parse_var(&lookup, "HINGE_NOT_CONSUMED_MAX_RETENTION")?
                    .unwrap_or(defaults.retention.not_consumed_max_retention),
                retention_max_delay: parse("HINGE_RETENTION_MAX_DELAY_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.retention.retention_max_delay),
            },
            stimulation_timeout: parse("HINGE_STIMULATION_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.stimulation_timeout),
            subscribe_max_attempts: parse_var(&lookup, "HINGE_SUBSCRIBE_MAX_ATTEMPTS")?
                .unwrap_or(defaults.subscribe_max_attempts)
                .max(1),
            subscribe_min_delay: parse("HINGE_SUBSCRIBE_MIN_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.subscribe_min_delay),
            subscribe_max_delay: parse("HINGE_SUBSCRIBE_MAX_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.subscribe_max_delay),
            watch_capacity: parse_var(&lookup, "HINGE_WATCH_CAPACITY")?
                .unwrap_or(defaults.watch_capacity),
        })
    }

    /// Backoff used when a door subscribes to its sources.
    pub fn subscribe_backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.subscribe_min_delay)
            .with_max_delay(self.subscribe_max_delay)
            .with_max_times(self.subscribe_max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be a valid number, got '{}'", key, raw)),
    }
}
