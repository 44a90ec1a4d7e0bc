//! Static configuration, read once at startup.
//!
//! ```toml
//! [database]
//! path = "main.db"
//! pool_size = 4
//!
//! [[database.attach]]
//! name = "bundle"
//! path = "bundle.db"
//!
//! [filesystem]
//! write_mode = "append"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::buffer::WriteMode;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub filesystem: FilesystemConfig,
}

impl Config {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.filesystem.validate()
    }
}

/// Connection pool and backing database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Main database file. Exposed as the `main` schema.
    pub path: PathBuf,
    /// Number of pooled connections; bounds concurrent queries.
    pub pool_size: usize,
    /// Per-query deadline; the statement is interrupted when it passes.
    pub query_timeout_ms: u64,
    /// How long a caller waits for a free connection.
    pub acquire_timeout_ms: u64,
    /// SQLite busy handler timeout for lock contention.
    pub busy_timeout_ms: u64,
    /// Additional databases, each exposed as its own schema.
    pub attach: Vec<Attachment>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("relfs.db"),
            pool_size: 4,
            query_timeout_ms: 5_000,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 1_000,
            attach: Vec::new(),
        }
    }
}

impl DatabaseConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("database.pool_size must be at least 1".into()));
        }
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.query_timeout_ms must be positive".into(),
            ));
        }
        let mut seen = HashSet::new();
        for attachment in &self.attach {
            if attachment.name.is_empty() {
                return Err(ConfigError::Invalid("attachment name is empty".into()));
            }
            if attachment.name.eq_ignore_ascii_case("main")
                || attachment.name.eq_ignore_ascii_case("temp")
            {
                return Err(ConfigError::Invalid(format!(
                    "attachment name {:?} is reserved",
                    attachment.name
                )));
            }
            if !seen.insert(attachment.name.to_ascii_lowercase()) {
                return Err(ConfigError::Invalid(format!(
                    "attachment {:?} listed twice",
                    attachment.name
                )));
            }
        }
        Ok(())
    }
}

/// One `ATTACH DATABASE path AS name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: PathBuf,
}

impl Attachment {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl std::str::FromStr for Attachment {
    type Err = ConfigError;

    /// Parse `name=path`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, path)) if !name.is_empty() && !path.is_empty() => {
                Ok(Self::new(name, path))
            }
            _ => Err(ConfigError::Invalid(format!(
                "expected NAME=PATH for attachment, got {:?}",
                s
            ))),
        }
    }
}

/// How the filesystem presents itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    pub write_mode: WriteMode,
    /// Schemas never listed or resolvable.
    pub hidden_schemas: Vec<String>,
    /// Permission bits reported for every directory.
    pub dir_mode: u32,
    /// Permission bits reported for every field.
    pub file_mode: u32,
    /// Reject every write, truncate and commit.
    pub read_only: bool,
    /// Upper bound on one field's pending buffer.
    pub max_buffer_bytes: usize,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            write_mode: WriteMode::default(),
            hidden_schemas: vec!["temp".to_string()],
            dir_mode: 0o500,
            file_mode: 0o644,
            read_only: false,
            max_buffer_bytes: 64 * 1024 * 1024,
        }
    }
}

impl FilesystemConfig {
    pub fn is_hidden(&self, schema: &str) -> bool {
        self.hidden_schemas
            .iter()
            .any(|hidden| hidden.eq_ignore_ascii_case(schema))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dir_mode > 0o7777 || self.file_mode > 0o7777 {
            return Err(ConfigError::Invalid(
                "filesystem modes must be permission bits (<= 0o7777)".into(),
            ));
        }
        Ok(())
    }
}
