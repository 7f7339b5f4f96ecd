//! Run configuration.
//!
//! [`RunConfig`] is the immutable value the pipeline, scheduler and transfer
//! loop read from. It is assembled once from defaults, an optional TOML file
//! ([`FileConfig`]) and command-line overrides, then validated.
//!
//! The default config file lives at:
//! 1. `$XDG_CONFIG_HOME/mediafetch/config.toml`
//! 2. `$HOME/.config/mediafetch/config.toml`

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::media::{DownloadKind, MediaFilter};
use crate::retry::RetryPolicy;
use crate::scheduler::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::transfer::DEFAULT_CHUNK_SIZE;

/// Default number of messages requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default pause between pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(3);

/// Chunk sizes must be a multiple of this (4 KiB).
pub const CHUNK_ALIGNMENT: u64 = 4 * 1024;

/// Largest accepted chunk size (1 MiB).
pub const MAX_CHUNK_SIZE: u64 = 1024 * 1024;

/// Largest accepted page size.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Largest accepted inter-page delay in milliseconds.
pub const MAX_PAGE_DELAY_MS: u64 = 60_000;

/// Largest accepted attempt count.
pub const MAX_ATTEMPTS_LIMIT: u32 = 20;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Immutable settings for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Where downloaded files land.
    pub output_dir: PathBuf,
    /// Where cursor files live.
    pub state_dir: PathBuf,
    /// Cursor scope key for this enumeration.
    pub scope: String,
    pub max_concurrency: usize,
    /// Bytes per chunk request.
    pub chunk_size: u64,
    /// Messages requested per page.
    pub page_size: usize,
    /// Pause between pages.
    pub page_delay: Duration,
    pub retry: RetryPolicy,
    pub filter: MediaFilter,
    /// Draw progress bars on stderr.
    pub show_progress: bool,
}

impl RunConfig {
    /// Creates a config with default tuning.
    #[must_use]
    pub fn new(
        output_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            state_dir: state_dir.into(),
            scope: scope.into(),
            max_concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            page_delay: DEFAULT_PAGE_DELAY,
            retry: RetryPolicy::default(),
            filter: MediaFilter::default(),
            show_progress: false,
        }
    }

    /// Checks every tunable against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_concurrency(self.max_concurrency)?;
        validate_chunk_size(self.chunk_size)?;
        validate_page_size(self.page_size)?;
        let delay_ms = u64::try_from(self.page_delay.as_millis()).unwrap_or(u64::MAX);
        validate_page_delay_ms(delay_ms)?;
        validate_max_attempts(self.retry.max_attempts())?;
        if self.filter.kinds.is_empty() {
            return Err(ConfigError::invalid(
                "kinds",
                "[]",
                "at least one of photo, document, sticker",
            ));
        }
        Ok(())
    }
}

/// TOML-backed defaults. Every key is optional.
///
/// ```toml
/// output_dir = "/data/media"
/// concurrency = 4
/// chunk_size_kib = 256
/// kinds = ["photo", "document"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub scope: Option<String>,
    pub concurrency: Option<usize>,
    /// Maximum attempts per job, including the first.
    pub max_retries: Option<u32>,
    pub chunk_size_kib: Option<u64>,
    pub page_size: Option<usize>,
    pub page_delay_ms: Option<u64>,
    pub kinds: Option<Vec<DownloadKind>>,
    /// Document extension allow-list, without dots.
    pub extensions: Option<Vec<String>>,
    pub min_date: Option<i64>,
    pub max_date: Option<i64>,
    /// Draw progress bars.
    pub progress: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`toml::de::Error`] on syntax errors, type mismatches and
    /// unknown keys.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Validates config values against runtime and CLI constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(concurrency) = self.concurrency {
            validate_concurrency(concurrency)?;
        }
        if let Some(kib) = self.chunk_size_kib {
            validate_chunk_size(kib.saturating_mul(1024))
                .map_err(|_| ConfigError::invalid("chunk_size_kib", kib, "4..=1024, a multiple of 4"))?;
        }
        if let Some(page_size) = self.page_size {
            validate_page_size(page_size)?;
        }
        if let Some(delay) = self.page_delay_ms {
            validate_page_delay_ms(delay)?;
        }
        if let Some(attempts) = self.max_retries {
            validate_max_attempts(attempts)?;
        }
        if let Some(kinds) = &self.kinds
            && kinds.is_empty()
        {
            return Err(ConfigError::invalid(
                "kinds",
                "[]",
                "at least one of photo, document, sticker",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_date, self.max_date)
            && min > max
        {
            return Err(ConfigError::invalid("min_date", min, "a value not after max_date"));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("request_timeout_secs", self.request_timeout_secs)?;
        Ok(())
    }
}

fn validate_concurrency(value: usize) -> Result<(), ConfigError> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid("concurrency", value, "range 1..=32"))
    }
}

fn validate_chunk_size(bytes: u64) -> Result<(), ConfigError> {
    if (CHUNK_ALIGNMENT..=MAX_CHUNK_SIZE).contains(&bytes) && bytes % CHUNK_ALIGNMENT == 0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "chunk_size",
            bytes,
            "4 KiB..=1 MiB, a multiple of 4 KiB",
        ))
    }
}

fn validate_page_size(value: usize) -> Result<(), ConfigError> {
    if (1..=MAX_PAGE_SIZE).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid("page_size", value, "range 1..=1000"))
    }
}

fn validate_page_delay_ms(value: u64) -> Result<(), ConfigError> {
    if value <= MAX_PAGE_DELAY_MS {
        Ok(())
    } else {
        Err(ConfigError::invalid("page_delay_ms", value, "range 0..=60000"))
    }
}

fn validate_max_attempts(value: u32) -> Result<(), ConfigError> {
    if (1..=MAX_ATTEMPTS_LIMIT).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid("max_retries", value, "range 1..=20"))
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if (1..=3600).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, value, "range 1..=3600"))
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mediafetch/config.toml`
/// 2. `$HOME/.config/mediafetch/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("mediafetch")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mediafetch")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Reads, parses and validates a config file.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = FileConfig::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Loads the config file from the default location when one exists.
///
/// # Errors
///
/// Returns [`ConfigError`] if a file exists but is invalid.
pub fn load_default_file_config() -> Result<Option<FileConfig>, ConfigError> {
    let Some(path) = resolve_default_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        debug!(path = %path.display(), "no config file at default location");
        return Ok(None);
    }
    load_file_config(&path).map(Some)
}
