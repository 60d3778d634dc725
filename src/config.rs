//! Command-line configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via --config or FLOWDFA_CONFIG)
//! 3. Environment variables

use flowdfa_core::{BuildOptions, DuplicateIdPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Graph construction options.
    pub graph: BuildOptions,
    /// Hook configuration.
    pub hooks: HooksConfig,
    /// Logging configuration.
    pub log: LogConfig,
    /// REPL configuration.
    pub repl: ReplConfig,
}

impl Config {
    /// Loads configuration from `path` (if any), then applies environment
    /// variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(policy) = std::env::var("FLOWDFA_DUPLICATE_IDS") {
            self.graph.duplicate_ids = parse_duplicate_policy(&policy)?;
        }
        self.hooks.apply_env_overrides();
        self.log.apply_env_overrides();
        self.repl.apply_env_overrides();
        Ok(())
    }
}

/// Hook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Register a logging hook for every hook name a graph refers to.
    pub trace: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self { trace: true }
    }
}

impl HooksConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(trace) = std::env::var("FLOWDFA_TRACE_HOOKS") {
            self.trace = trace == "1" || trace.to_lowercase() == "true";
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is not set.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FLOWDFA_LOG_LEVEL") {
            if !level.is_empty() {
                self.level = level;
            }
        }
    }
}

/// REPL configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplConfig {
    /// Line history file. Defaults to `$HOME/.flowdfa_history`.
    pub history_file: Option<PathBuf>,
}

impl ReplConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("FLOWDFA_HISTORY_FILE") {
            self.history_file = Some(PathBuf::from(path));
        }
    }

    /// Returns the effective history file path.
    pub fn history_path(&self) -> PathBuf {
        self.history_file.clone().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|h| PathBuf::from(h).join(".flowdfa_history"))
                .unwrap_or_else(|_| ".flowdfa_history".into())
        })
    }
}

/// Parses a duplicate-id policy name.
pub fn parse_duplicate_policy(value: &str) -> Result<DuplicateIdPolicy, ConfigError> {
    match value.to_lowercase().replace('-', "_").as_str() {
        "last_write_wins" => Ok(DuplicateIdPolicy::LastWriteWins),
        "reject" => Ok(DuplicateIdPolicy::Reject),
        other => Err(ConfigError::Validation(format!(
            "unknown duplicate id policy '{}' (expected 'last_write_wins' or 'reject')",
            other
        ))),
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}
