//! Configuration types.
//!
//! Everything is read from `TRIAGE_*` environment variables (a `.env` file is
//! loaded by the binary first). Unset variables fall back to the defaults
//! below; set-but-invalid values are rejected so the process fails before
//! any message is claimed.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::classifier::{DEFAULT_T_IMPORTANT, DEFAULT_T_URGENT, Thresholds};
use crate::pipeline::daemon::DEFAULT_POLL_INTERVAL_SECS;
use crate::pipeline::poll_cycle::{CycleConfig, DEFAULT_REVIEW_LABEL};
use crate::pipeline::retry::RetryPolicy;

/// Default processed-store location, relative to `$HOME`.
pub const DEFAULT_DB_PATH: &str = "~/.cache/inbox-triage/processed.db";

/// Triage engine configuration.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    pub thresholds: Thresholds,
    /// Label applied to Review-tier messages.
    pub review_label: String,
    /// Backoff for mailbox calls.
    pub retry: RetryPolicy,
    /// Maximum messages claimed per cycle.
    pub batch_size: usize,
    /// Maximum candidate pages per cycle.
    pub max_pages: usize,
    /// Parallel mailbox actions per cycle.
    pub max_in_flight: usize,
    /// Bound on one action including retries.
    pub action_timeout: Duration,
    pub scorer_timeout: Duration,
    /// Age after which a dangling claim is released.
    pub claim_ttl: Duration,
    /// Daemon interval.
    pub poll_interval: Duration,
    pub db_path: PathBuf,
    pub rules_path: Option<PathBuf>,
    /// Rolling log directory. Logs go to stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            review_label: DEFAULT_REVIEW_LABEL.to_string(),
            retry: RetryPolicy::default(),
            batch_size: 50,
            max_pages: 5,
            max_in_flight: 4,
            action_timeout: Duration::from_secs(120),
            scorer_timeout: Duration::from_secs(10),
            claim_ttl: Duration::from_secs(900), // 15 minutes
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            db_path: expand_home(DEFAULT_DB_PATH),
            rules_path: None,
            log_dir: None,
        }
    }
}

impl TriageConfig {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let thresholds = Thresholds {
            urgent: parse_or(&get, "TRIAGE_T_URGENT", DEFAULT_T_URGENT)?,
            important: parse_or(&get, "TRIAGE_T_IMPORTANT", DEFAULT_T_IMPORTANT)?,
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(
                &get,
                "TRIAGE_RETRY_MAX_ATTEMPTS",
                defaults.retry.max_attempts,
            )?,
            base_delay: millis_or(&get, "TRIAGE_RETRY_BASE_MS", defaults.retry.base_delay)?,
            max_delay: millis_or(&get, "TRIAGE_RETRY_MAX_MS", defaults.retry.max_delay)?,
            jitter: parse_or(&get, "TRIAGE_RETRY_JITTER", defaults.retry.jitter)?,
        };

        let config = Self {
            thresholds,
            review_label: get("TRIAGE_REVIEW_LABEL").unwrap_or(defaults.review_label),
            retry,
            batch_size: parse_or(&get, "TRIAGE_BATCH_SIZE", defaults.batch_size)?,
            max_pages: parse_or(&get, "TRIAGE_MAX_PAGES", defaults.max_pages)?,
            max_in_flight: parse_or(&get, "TRIAGE_MAX_IN_FLIGHT", defaults.max_in_flight)?,
            action_timeout: secs_or(&get, "TRIAGE_ACTION_TIMEOUT_SECS", defaults.action_timeout)?,
            scorer_timeout: secs_or(&get, "TRIAGE_SCORER_TIMEOUT_SECS", defaults.scorer_timeout)?,
            claim_ttl: secs_or(&get, "TRIAGE_CLAIM_TTL_SECS", defaults.claim_ttl)?,
            poll_interval: secs_or(&get, "TRIAGE_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            db_path: get("TRIAGE_DB_PATH")
                .map(|p| expand_home(&p))
                .unwrap_or(defaults.db_path),
            rules_path: get("TRIAGE_RULES_PATH").map(|p| expand_home(&p)),
            log_dir: get("TRIAGE_LOG_DIR").map(|p| expand_home(&p)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a cycle misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate()?;
        self.retry.validate()?;

        if self.review_label.trim().is_empty() {
            return Err(invalid("TRIAGE_REVIEW_LABEL", "must not be empty"));
        }
        for (key, value) in [
            ("TRIAGE_BATCH_SIZE", self.batch_size),
            ("TRIAGE_MAX_PAGES", self.max_pages),
            ("TRIAGE_MAX_IN_FLIGHT", self.max_in_flight),
        ] {
            if value == 0 {
                return Err(invalid(key, "must be at least 1"));
            }
        }
        for (key, value) in [
            ("TRIAGE_ACTION_TIMEOUT_SECS", self.action_timeout),
            ("TRIAGE_SCORER_TIMEOUT_SECS", self.scorer_timeout),
            ("TRIAGE_CLAIM_TTL_SECS", self.claim_ttl),
            ("TRIAGE_POLL_INTERVAL_SECS", self.poll_interval),
        ] {
            if value.is_zero() {
                return Err(invalid(key, "must be greater than zero"));
            }
        }
        if self.claim_ttl <= self.action_timeout {
            return Err(invalid(
                "TRIAGE_CLAIM_TTL_SECS",
                "must exceed TRIAGE_ACTION_TIMEOUT_SECS",
            ));
        }
        Ok(())
    }

    /// Per-cycle settings derived from this configuration.
    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            review_label: self.review_label.clone(),
            batch_size: self.batch_size,
            max_pages: self.max_pages,
            max_in_flight: self.max_in_flight,
            scorer_timeout: self.scorer_timeout,
            claim_ttl: self.claim_ttl,
            fetch_retry: self.retry.clone(),
        }
    }
}

/// Replace a leading `~` with `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}

fn millis_or<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}
