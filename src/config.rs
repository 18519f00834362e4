//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::executor::ChunkExecutorConfig;

const ENV_CONFIG_PATH: &str = "SCAVENGER_CONFIG";
const ENV_OVERRIDE_PREFIX: &str = "SCAVENGER__";

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    /// Missing required configuration field.
    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScavengeConfig {
    /// Chunk executor configuration.
    pub executor: Option<ExecutorConfigSpec>,
    /// Redaction request store configuration.
    pub redaction: Option<RedactionStoreSpec>,
}

impl ScavengeConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from the `SCAVENGER_CONFIG` env var (if set),
    /// then apply `SCAVENGER__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var(ENV_CONFIG_PATH).ok() {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(env::vars())
    }

    /// Apply `SCAVENGER__section__field` style overrides from any source.
    ///
    /// Pairs whose key lacks the prefix are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(path) = key.strip_prefix(ENV_OVERRIDE_PREFIX) else {
                continue;
            };
            let path = path.to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim();

            match parts.as_slice() {
                ["executor", "threads"] => {
                    self.executor_mut().threads = Some(parse_value(&key, value)?);
                }
                ["executor", "chunk_size"] => {
                    self.executor_mut().chunk_size = Some(parse_value(&key, value)?);
                }
                ["executor", "cancellation_check_period"] => {
                    self.executor_mut().cancellation_check_period =
                        Some(parse_value(&key, value)?);
                }
                ["executor", "unsafe_ignore_hard_deletes"] => {
                    self.executor_mut().unsafe_ignore_hard_deletes =
                        Some(parse_value(&key, value)?);
                }
                ["executor", "throttle_interval_ms"] => {
                    self.executor_mut().throttle_interval_ms = Some(parse_value(&key, value)?);
                }
                ["redaction", "kind"] => {
                    self.redaction_mut().kind = Some(value.to_string());
                }
                ["redaction", "path"] => {
                    self.redaction_mut().path = Some(PathBuf::from(value));
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `ChunkExecutorConfig` using defaults plus overrides.
    pub fn to_executor_config(&self) -> ChunkExecutorConfig {
        let mut config = ChunkExecutorConfig::default();
        if let Some(executor) = &self.executor {
            config = executor.apply_to(config);
        }
        config
    }

    /// Resolve the redaction request store.
    ///
    /// Without a `[redaction]` section the requests are kept in memory.
    pub fn redaction_store(&self) -> Result<RedactionStoreConfig, ConfigError> {
        match self.redaction.as_ref() {
            Some(spec) => spec.resolve(),
            None => Ok(RedactionStoreConfig::InMemory),
        }
    }

    fn executor_mut(&mut self) -> &mut ExecutorConfigSpec {
        self.executor.get_or_insert_with(ExecutorConfigSpec::default)
    }

    fn redaction_mut(&mut self) -> &mut RedactionStoreSpec {
        self.redaction.get_or_insert_with(RedactionStoreSpec::default)
    }
}

/// Chunk executor configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorConfigSpec {
    /// Number of worker threads.
    pub threads: Option<usize>,
    /// Logical chunk size in bytes.
    pub chunk_size: Option<u64>,
    /// Records processed between cancellation checks.
    pub cancellation_check_period: Option<usize>,
    /// Discard hard deleted streams entirely.
    pub unsafe_ignore_hard_deletes: Option<bool>,
    /// Rest between chunks, in milliseconds.
    pub throttle_interval_ms: Option<u64>,
}

impl ExecutorConfigSpec {
    fn apply_to(&self, mut config: ChunkExecutorConfig) -> ChunkExecutorConfig {
        if let Some(value) = self.chunk_size {
            config.chunk_size = value.max(1);
        }
        if let Some(value) = self.threads {
            config = config.with_threads(value);
        }
        if let Some(value) = self.cancellation_check_period {
            config = config.with_cancellation_check_period(value);
        }
        if let Some(value) = self.unsafe_ignore_hard_deletes {
            config = config.with_unsafe_ignore_hard_deletes(value);
        }
        if let Some(value) = self.throttle_interval_ms {
            config = config.with_throttle_interval(Duration::from_millis(value));
        }
        config
    }
}

/// Redaction request store configuration from TOML/env.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedactionStoreSpec {
    /// Store kind: "memory" or "sqlite".
    pub kind: Option<String>,
    /// Database path for the sqlite store.
    pub path: Option<PathBuf>,
}

impl RedactionStoreSpec {
    fn resolve(&self) -> Result<RedactionStoreConfig, ConfigError> {
        let kind = self.kind.as_deref().map(|v| v.to_ascii_lowercase());

        match kind.as_deref() {
            Some("memory") => Ok(RedactionStoreConfig::InMemory),
            Some("sqlite") => {
                let path = self
                    .path
                    .clone()
                    .ok_or_else(|| ConfigError::MissingField("redaction.path".into()))?;
                Ok(RedactionStoreConfig::Sqlite { path })
            }
            None => match &self.path {
                Some(path) => Ok(RedactionStoreConfig::Sqlite { path: path.clone() }),
                None => Ok(RedactionStoreConfig::InMemory),
            },
            Some(other) => Err(ConfigError::InvalidValue {
                key: "redaction.kind".into(),
                value: other.into(),
            }),
        }
    }
}

/// Resolved redaction request store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedactionStoreConfig {
    /// Requests kept in memory for the lifetime of the process.
    InMemory,
    /// Requests persisted in a SQLite database.
    Sqlite {
        /// Path to the database file.
        path: PathBuf,
    },
}

#[cfg(feature = "sqlite")]
impl RedactionStoreConfig {
    /// Open the sqlite store described by this config.
    ///
    /// Returns `None` for the in-memory store.
    pub fn open_sqlite(
        &self,
    ) -> Result<Option<crate::redaction::SqliteRedactionRequestMap>, crate::map::MapError> {
        match self {
            RedactionStoreConfig::InMemory => Ok(None),
            RedactionStoreConfig::Sqlite { path } => {
                crate::redaction::SqliteRedactionRequestMap::open(path).map(Some)
            }
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
