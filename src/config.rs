//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SubmitError};

/// Throughput limits applied to a single blast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiSpamConfig {
    /// Minimum pause between two sends.
    pub min_delay_ms: u64,
    /// Maximum pause between two sends.
    pub max_delay_ms: u64,
    /// Number of sends after which `batch_delay_ms` is added.
    pub batch_size: u32,
    /// Extra pause after each full batch.
    pub batch_delay_ms: u64,
    pub max_messages_per_hour: u32,
    pub max_messages_per_day: u32,
    /// Pause the blast on Saturdays and Sundays.
    pub skip_weekends: bool,
    /// First hour of day (local time) in which sending is allowed.
    pub allowed_hours_start: u32,
    /// Hour of day (exclusive) at which sending stops. 24 means midnight.
    pub allowed_hours_end: u32,
}

impl Default for AntiSpamConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 3_000,
            max_delay_ms: 8_000,
            batch_size: 10,
            batch_delay_ms: 60_000,
            max_messages_per_hour: 40,
            max_messages_per_day: 200,
            skip_weekends: false,
            allowed_hours_start: 9,
            allowed_hours_end: 21,
        }
    }
}

impl AntiSpamConfig {
    /// Process-wide defaults, overridable per deployment. A variable that is
    /// set but does not parse, or a combination that fails [`validate`], is an
    /// error rather than a silent fallback.
    ///
    /// [`validate`]: Self::validate
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = Self::default();
        let config = Self {
            min_delay_ms: env_or("BLAST_MIN_DELAY_MS", base.min_delay_ms)?,
            max_delay_ms: env_or("BLAST_MAX_DELAY_MS", base.max_delay_ms)?,
            batch_size: env_or("BLAST_BATCH_SIZE", base.batch_size)?,
            batch_delay_ms: env_or("BLAST_BATCH_DELAY_MS", base.batch_delay_ms)?,
            max_messages_per_hour: env_or("BLAST_MAX_PER_HOUR", base.max_messages_per_hour)?,
            max_messages_per_day: env_or("BLAST_MAX_PER_DAY", base.max_messages_per_day)?,
            skip_weekends: env_or("BLAST_SKIP_WEEKENDS", base.skip_weekends)?,
            allowed_hours_start: env_or("BLAST_ALLOWED_HOURS_START", base.allowed_hours_start)?,
            allowed_hours_end: env_or("BLAST_ALLOWED_HOURS_END", base.allowed_hours_end)?,
        };

        config.validate().map_err(|e| match e {
            SubmitError::InvalidAntiSpam { field, reason } => ConfigError::InvalidValue {
                key: field,
                message: reason,
            },
            other => ConfigError::InvalidValue {
                key: "anti_spam".to_string(),
                message: other.to_string(),
            },
        })?;
        Ok(config)
    }

    /// Layer a partial override on top of this config.
    pub fn merged(&self, overrides: &AntiSpamOverrides) -> Self {
        Self {
            min_delay_ms: overrides.min_delay_ms.unwrap_or(self.min_delay_ms),
            max_delay_ms: overrides.max_delay_ms.unwrap_or(self.max_delay_ms),
            batch_size: overrides.batch_size.unwrap_or(self.batch_size),
            batch_delay_ms: overrides.batch_delay_ms.unwrap_or(self.batch_delay_ms),
            max_messages_per_hour: overrides
                .max_messages_per_hour
                .unwrap_or(self.max_messages_per_hour),
            max_messages_per_day: overrides
                .max_messages_per_day
                .unwrap_or(self.max_messages_per_day),
            skip_weekends: overrides.skip_weekends.unwrap_or(self.skip_weekends),
            allowed_hours_start: overrides
                .allowed_hours_start
                .unwrap_or(self.allowed_hours_start),
            allowed_hours_end: overrides
                .allowed_hours_end
                .unwrap_or(self.allowed_hours_end),
        }
    }

    /// Reject configurations that would allow an unbounded or empty send window.
    pub fn validate(&self) -> Result<(), SubmitError> {
        let invalid = |field: &str, reason: &str| SubmitError::InvalidAntiSpam {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.min_delay_ms > self.max_delay_ms {
            return Err(invalid("min_delay_ms", "must not exceed max_delay_ms"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than zero"));
        }
        if self.max_messages_per_hour == 0 {
            return Err(invalid("max_messages_per_hour", "must be at least 1"));
        }
        if self.max_messages_per_day == 0 {
            return Err(invalid("max_messages_per_day", "must be at least 1"));
        }
        if self.allowed_hours_start > 23 {
            return Err(invalid("allowed_hours_start", "must be between 0 and 23"));
        }
        if self.allowed_hours_end > 24 {
            return Err(invalid("allowed_hours_end", "must be between 1 and 24"));
        }
        if self.allowed_hours_start >= self.allowed_hours_end {
            return Err(invalid(
                "allowed_hours_start",
                "must be earlier than allowed_hours_end",
            ));
        }
        Ok(())
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Per-job partial anti-spam settings. Unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiSpamOverrides {
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub batch_size: Option<u32>,
    pub batch_delay_ms: Option<u64>,
    pub max_messages_per_hour: Option<u32>,
    pub max_messages_per_day: Option<u32>,
    pub skip_weekends: Option<bool>,
    pub allowed_hours_start: Option<u32>,
    pub allowed_hours_end: Option<u32>,
}

/// Dispatcher service configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Port for the HTTP API.
    pub http_port: u16,
    /// Country calling code prepended to local phone numbers.
    pub country_code: String,
    /// Upper bound on a single transport call.
    pub send_timeout: Duration,
    /// Interval of the rate-limit reset routine.
    pub budget_tick_interval: Duration,
    /// Defaults applied to every blast before per-job overrides.
    pub anti_spam: AntiSpamConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            country_code: "234".to_string(),
            send_timeout: Duration::from_secs(30),
            budget_tick_interval: Duration::from_secs(60), // 1 minute
            anti_spam: AntiSpamConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = Self::default();
        let country_code = match std::env::var("BLAST_COUNTRY_CODE") {
            Ok(raw) => {
                let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "BLAST_COUNTRY_CODE".to_string(),
                        message: format!("expected a calling code, got {raw:?}"),
                    });
                }
                digits
            }
            Err(_) => base.country_code,
        };

        Ok(Self {
            http_port: env_or("BLAST_HTTP_PORT", base.http_port)?,
            country_code,
            send_timeout: Duration::from_secs(env_or(
                "BLAST_SEND_TIMEOUT_SECS",
                base.send_timeout.as_secs(),
            )?),
            budget_tick_interval: Duration::from_secs(env_or(
                "BLAST_BUDGET_TICK_SECS",
                base.budget_tick_interval.as_secs(),
            )?),
            anti_spam: AntiSpamConfig::from_env()?,
        })
    }
}

/// Parse `key` if set, otherwise use `default`.
fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        Err(_) => Ok(default),
    }
}
