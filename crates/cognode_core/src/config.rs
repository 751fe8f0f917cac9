//! Explicit engine configuration.
//!
//! # Responsibility
//! - Describe where node records live and how logging is set up.
//! - Validate configuration before any file is touched.
//!
//! # Invariants
//! - No path is derived from source layout or process-wide state.
//! - A missing store configuration means ephemeral (memory-only) mode.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "COGNODE_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "COGNODE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "COGNODE_LOG_DIR";

pub const DEFAULT_ARCHIVE_DIR_NAME: &str = "archive";

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    EmptyDataDir,
    InvalidArchiveDirName(String),
    UnsupportedLogLevel(String),
    EmptyLogDir,
    RelativeLogDir(PathBuf),
    /// Log directory given without a level, or the reverse.
    IncompleteLogging(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDataDir => write!(f, "data_dir cannot be empty"),
            Self::InvalidArchiveDirName(name) => {
                write!(f, "archive directory name `{name}` must be a single path segment")
            }
            Self::UnsupportedLogLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::EmptyLogDir => write!(f, "log_dir cannot be empty"),
            Self::RelativeLogDir(path) => write!(
                f,
                "log_dir must be an absolute path, got `{}`",
                path.display()
            ),
            Self::IncompleteLogging(missing) => {
                write!(f, "logging configuration is missing `{missing}`")
            }
        }
    }
}

impl Error for ConfigError {}

/// File-backed node store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding `<id>.json` records and their `.bak` siblings.
    pub data_dir: PathBuf,
    /// Subdirectory of `data_dir` receiving archived records.
    pub archive_dir_name: String,
    /// Copy the previous valid version to `<id>.json.bak` before overwrite.
    pub keep_backups: bool,
    /// fsync temp files before the atomic rename.
    pub sync_writes: bool,
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            archive_dir_name: DEFAULT_ARCHIVE_DIR_NAME.to_string(),
            keep_backups: true,
            sync_writes: true,
        }
    }

    pub fn with_archive_dir_name(mut self, name: impl Into<String>) -> Self {
        self.archive_dir_name = name.into();
        self
    }

    pub fn without_backups(mut self) -> Self {
        self.keep_backups = false;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join(&self.archive_dir_name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }
        let name = self.archive_dir_name.trim();
        let single_segment = Path::new(name).components().count() == 1;
        if name.is_empty() || !single_segment || name == "." || name == ".." {
            return Err(ConfigError::InvalidArchiveDirName(
                self.archive_dir_name.clone(),
            ));
        }
        Ok(())
    }
}

/// Rolling file log settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Normalized level: `trace|debug|info|warn|error`.
    pub level: &'static str,
    /// Absolute directory for rolling log files.
    pub log_dir: PathBuf,
}

impl LoggingConfig {
    /// Builds a validated logging configuration.
    ///
    /// # Errors
    /// - `UnsupportedLogLevel` for unknown levels (`warning` is accepted).
    /// - `EmptyLogDir` / `RelativeLogDir` for unusable directories.
    pub fn new(level: &str, log_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self {
            level: normalize_level(level)?,
            log_dir: normalize_log_dir(log_dir.as_ref())?,
        })
    }
}

/// Whole-engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub store: Option<StoreConfig>,
    pub logging: Option<LoggingConfig>,
}

impl EngineConfig {
    /// Memory-only engine without logging.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Reads configuration from `COGNODE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let store = non_blank(ENV_DATA_DIR).map(|dir| StoreConfig::new(dir.trim()));
        let logging = match (non_blank(ENV_LOG_LEVEL), non_blank(ENV_LOG_DIR)) {
            (Some(level), Some(dir)) => Some(LoggingConfig::new(&level, dir.trim())?),
            (Some(_), None) => return Err(ConfigError::IncompleteLogging(ENV_LOG_DIR)),
            (None, Some(_)) => return Err(ConfigError::IncompleteLogging(ENV_LOG_LEVEL)),
            (None, None) => None,
        };

        let config = Self { store, logging };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(store) = &self.store {
            store.validate()?;
        }
        Ok(())
    }
}

/// Returns the default log level for current build mode.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

pub(crate) fn normalize_level(level: &str) -> Result<&'static str, ConfigError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(ConfigError::UnsupportedLogLevel(other.to_string())),
    }
}

fn normalize_log_dir(log_dir: &Path) -> Result<PathBuf, ConfigError> {
    let text = log_dir.to_string_lossy();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyLogDir);
    }
    let path = PathBuf::from(trimmed);
    if !path.is_absolute() {
        return Err(ConfigError::RelativeLogDir(path));
    }
    Ok(path)
}
