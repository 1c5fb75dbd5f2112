//! Strongly-typed configuration for export sessions.
//!
//! Values come from defaults, environment variables (with optional `.env`
//! support), or explicit overrides applied on top of either.

use std::env;
use std::fmt;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

use crate::logging::LogCallback;

/// Hostnames accepted for remote sketches unless configured otherwise.
pub const DEFAULT_REMOTE_HOSTNAMES: &[&str] = &["www.tldraw.com"];

/// File extensions accepted for local sketches.
pub const DEFAULT_FILE_EXTENSIONS: &[&str] = &[".tldr"];

/// Directory holding the static editor bundle served for local sketches.
pub const DEFAULT_ASSET_DIR: &str = "./dist/tldraw";

/// Upper bound for any single browser operation.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 120_000;

/// Diagnostic verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors and warnings only.
    #[default]
    Minimal,
    /// Adds progress information.
    Medium,
    /// Adds debugging detail, including browser console output.
    Detailed,
}

impl Verbosity {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Verbosity::Minimal),
            1 => Some(Verbosity::Medium),
            2 => Some(Verbosity::Detailed),
            _ => None,
        }
    }
}

/// Configuration shared by every export in a process.
#[derive(Clone)]
pub struct ExportConfig {
    /// Browser binary; `None` lets the launcher detect one.
    pub chrome_executable: Option<PathBuf>,
    pub headless: bool,
    /// Keep Chrome's sandbox enabled.
    pub sandbox: bool,
    pub asset_dir: PathBuf,
    pub remote_hostnames: Vec<String>,
    pub file_extensions: Vec<String>,
    pub operation_timeout_ms: u64,
    pub verbose: Verbosity,
    pub logger: Option<LogCallback>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            chrome_executable: None,
            headless: true,
            sandbox: false,
            asset_dir: PathBuf::from(DEFAULT_ASSET_DIR),
            remote_hostnames: DEFAULT_REMOTE_HOSTNAMES
                .iter()
                .map(|host| host.to_string())
                .collect(),
            file_extensions: DEFAULT_FILE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            verbose: Verbosity::default(),
            logger: None,
        }
    }
}

impl ExportConfig {
    /// Construct a configuration from environment variables, after loading a
    /// `.env` file if present.
    pub fn from_env() -> Result<Self, ExportConfigError> {
        let _ = dotenv();
        let mut config = ExportConfig::default();

        if let Some(value) = env_var("TLDRAW_EXPORT_CHROME_BIN") {
            config.chrome_executable = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("TLDRAW_EXPORT_HEADLESS") {
            config.headless = parse_bool("TLDRAW_EXPORT_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("TLDRAW_EXPORT_SANDBOX") {
            config.sandbox = parse_bool("TLDRAW_EXPORT_SANDBOX", &value)?;
        }

        if let Some(value) = env_var("TLDRAW_EXPORT_ASSET_DIR") {
            config.asset_dir = PathBuf::from(value);
        }

        if let Some(value) = env_var("TLDRAW_EXPORT_REMOTE_HOSTS") {
            config.remote_hostnames = parse_list("TLDRAW_EXPORT_REMOTE_HOSTS", &value)?;
        }

        if let Some(value) = env_var("TLDRAW_EXPORT_TIMEOUT_MS") {
            config.operation_timeout_ms = parse_u64("TLDRAW_EXPORT_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = env_var("TLDRAW_EXPORT_VERBOSE") {
            let parsed = parse_u8("TLDRAW_EXPORT_VERBOSE", &value)?;
            config.verbose = Verbosity::from_u8(parsed).ok_or_else(|| {
                ExportConfigError::invalid_enum("TLDRAW_EXPORT_VERBOSE", parsed.to_string())
            })?;
        }

        Ok(config)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Create a new configuration with explicit field overrides applied.
    pub fn with_overrides(&self, overrides: ExportConfigOverrides) -> ExportConfig {
        let mut next = self.clone();

        if let Some(value) = overrides.chrome_executable {
            next.chrome_executable = value;
        }
        if let Some(value) = overrides.headless {
            next.headless = value;
        }
        if let Some(value) = overrides.sandbox {
            next.sandbox = value;
        }
        if let Some(value) = overrides.asset_dir {
            next.asset_dir = value;
        }
        if let Some(value) = overrides.remote_hostnames {
            next.remote_hostnames = value;
        }
        if let Some(value) = overrides.file_extensions {
            next.file_extensions = value;
        }
        if let Some(value) = overrides.operation_timeout_ms {
            next.operation_timeout_ms = value;
        }
        if let Some(value) = overrides.verbose {
            next.verbose = value;
        }
        if let Some(value) = overrides.logger {
            next.logger = value;
        }

        next
    }
}

/// Field-level overrides for [`ExportConfig::with_overrides`].
#[derive(Default, Clone)]
pub struct ExportConfigOverrides {
    pub chrome_executable: Option<Option<PathBuf>>,
    pub headless: Option<bool>,
    pub sandbox: Option<bool>,
    pub asset_dir: Option<PathBuf>,
    pub remote_hostnames: Option<Vec<String>>,
    pub file_extensions: Option<Vec<String>>,
    pub operation_timeout_ms: Option<u64>,
    pub verbose: Option<Verbosity>,
    pub logger: Option<Option<LogCallback>>,
}

impl ExportConfigOverrides {
    pub fn chrome_executable<T: Into<Option<PathBuf>>>(mut self, path: T) -> Self {
        self.chrome_executable = Some(path.into());
        self
    }

    pub fn asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = Some(dir.into());
        self
    }

    pub fn operation_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.operation_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn verbose(mut self, verbose: Verbosity) -> Self {
        self.verbose = Some(verbose);
        self
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("chrome_executable", &self.chrome_executable)
            .field("headless", &self.headless)
            .field("sandbox", &self.sandbox)
            .field("asset_dir", &self.asset_dir)
            .field("remote_hostnames", &self.remote_hostnames)
            .field("file_extensions", &self.file_extensions)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("verbose", &self.verbose)
            .field("logger_present", &self.logger.is_some())
            .finish()
    }
}

impl fmt::Debug for ExportConfigOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfigOverrides")
            .field("chrome_executable", &self.chrome_executable)
            .field("headless", &self.headless)
            .field("sandbox", &self.sandbox)
            .field("asset_dir", &self.asset_dir)
            .field("remote_hostnames", &self.remote_hostnames)
            .field("file_extensions", &self.file_extensions)
            .field("operation_timeout_ms", &self.operation_timeout_ms)
            .field("verbose", &self.verbose)
            .field("logger", &self.logger.as_ref().map(|inner| inner.is_some()))
            .finish()
    }
}

/// Errors that can arise while constructing an [`ExportConfig`].
#[derive(Debug, Error)]
pub enum ExportConfigError {
    #[error("invalid value '{value}' for {field}")]
    InvalidEnumVariant { field: &'static str, value: String },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("{field} must list at least one value")]
    EmptyList { field: &'static str },
}

impl ExportConfigError {
    fn invalid_enum(field: &'static str, value: String) -> Self {
        ExportConfigError::InvalidEnumVariant { field, value }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ExportConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ExportConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

fn parse_u8(field: &'static str, value: &str) -> Result<u8, ExportConfigError> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|source| ExportConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ExportConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|source| ExportConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_list(field: &'static str, value: &str) -> Result<Vec<String>, ExportConfigError> {
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        return Err(ExportConfigError::EmptyList { field });
    }
    Ok(items)
}
