use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use txcoord_core::{ParticipantConfig, ParticipantId};

use crate::retry::RetryPolicy;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read config at '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("TOML parse error")]
    TomlParse(#[from] toml::de::Error),

    #[error("event_capacity must be greater than zero")]
    ZeroEventCapacity,

    #[error("retry base delay ({base:?}) exceeds max delay ({max:?})")]
    RetryDelayOrder { base: Duration, max: Duration },

    #[error("participant id must not be empty")]
    EmptyParticipantId,

    #[error("participant '{0}' is declared more than once")]
    DuplicateParticipant(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    default_timeout_ms: Option<u64>,
    default_max_retries: Option<u32>,
    shutdown_timeout_ms: Option<u64>,
    event_capacity: Option<usize>,
    retry: Option<RawRetry>,
    #[serde(default)]
    participants: Vec<RawParticipant>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRetry {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParticipant {
    id: String,
    endpoint: String,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    #[serde(default)]
    supports_compensation: bool,
}

/// A participant declared in the coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantEntry {
    pub id: ParticipantId,
    pub config: ParticipantConfig,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    default_timeout: Duration,
    default_max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    shutdown_timeout: Duration,
    event_capacity: usize,
    participants: Vec<ParticipantEntry>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            default_max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            participants: Vec::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Parse and validate a TOML config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content)?;
        Self::from_raw(raw)
    }

    /// Build a config from an already deserialized TOML table, such as the
    /// `[coordinator]` section of a larger document.
    ///
    /// # Errors
    ///
    /// Returns an error if the table has unknown keys or fails validation.
    pub fn from_toml_value(value: toml::Value) -> Result<Self, ConfigError> {
        let raw = RawConfig::deserialize(value)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let retry = raw.retry.unwrap_or_default();

        let participants = raw
            .participants
            .into_iter()
            .map(|p| {
                let mut config = ParticipantConfig::new(p.endpoint)
                    .with_compensation(p.supports_compensation);
                config.timeout = p.timeout_ms.map(Duration::from_millis);
                config.max_retries = p.max_retries;
                ParticipantEntry {
                    id: ParticipantId::new(p.id),
                    config,
                }
            })
            .collect();

        let config = Self {
            default_timeout: raw
                .default_timeout_ms
                .map_or(defaults.default_timeout, Duration::from_millis),
            default_max_retries: raw
                .default_max_retries
                .unwrap_or(defaults.default_max_retries),
            base_delay: retry
                .base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            max_delay: retry
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            shutdown_timeout: raw
                .shutdown_timeout_ms
                .map_or(defaults.shutdown_timeout, Duration::from_millis),
            event_capacity: raw.event_capacity.unwrap_or(defaults.event_capacity),
            participants,
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns the first problem found in the config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::RetryDelayOrder {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        let mut seen = HashSet::new();
        for entry in &self.participants {
            if entry.id.as_str().is_empty() {
                return Err(ConfigError::EmptyParticipantId);
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateParticipant(entry.id.to_string()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    #[must_use]
    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    #[must_use]
    pub fn event_capacity(&self) -> usize {
        self.event_capacity
    }

    #[must_use]
    pub fn participants(&self) -> &[ParticipantEntry] {
        &self.participants
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_delay, self.max_delay)
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_participant(
        mut self,
        id: impl Into<ParticipantId>,
        config: ParticipantConfig,
    ) -> Self {
        self.participants.push(ParticipantEntry {
            id: id.into(),
            config,
        });
        self
    }
}
