//! `formfill.ron`: backend, scheduling and logging settings.
//!
//! Every field has a default, so the file may be missing or name only what
//! it changes:
//!
//! ```ron
//! (
//!     backend: (base_url: "http://10.0.0.2:8000", provider: "anthropic"),
//!     logging: (destination: Both, level: "debug"),
//! )
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use formfill_engine::{EngineConfig, ResolverSettings, SchedulerSettings};
use formfill_logging::LogDestination;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "formfill.ron";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config {path:?}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("unknown log level {0:?}")]
    LogLevel(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub provider: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let defaults = ResolverSettings::default();
        Self {
            base_url: defaults.base_url,
            provider: defaults.provider,
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub concurrency: usize,
    pub reserved_urgent: usize,
    pub malformed_attempts: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let defaults = SchedulerSettings::default();
        Self {
            concurrency: defaults.concurrency,
            reserved_urgent: defaults.reserved_urgent,
            malformed_attempts: defaults.malformed_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogTarget {
    File,
    Terminal,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub destination: LogTarget,
    pub level: String,
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            destination: LogTarget::File,
            level: "info".to_string(),
            file: PathBuf::from("./formfill.log"),
        }
    }
}

impl LoggingConfig {
    pub fn destination(&self) -> LogDestination {
        match self.destination {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }

    pub fn level(&self) -> Result<LevelFilter, ConfigError> {
        self.level
            .parse()
            .map_err(|_| ConfigError::LogLevel(self.level.clone()))
    }
}

impl AppConfig {
    /// Loads `path`, or `./formfill.ron` when no path is given. Only the
    /// implicit default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        match fs::read_to_string(&path) {
            Ok(text) => Self::parse(&path, &text),
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        config.logging.level()?;
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            resolver: ResolverSettings {
                base_url: self.backend.base_url.clone(),
                provider: self.backend.provider.clone(),
                connect_timeout: Duration::from_secs(self.backend.connect_timeout_secs),
                request_timeout: Duration::from_secs(self.backend.request_timeout_secs),
            },
            scheduler: SchedulerSettings {
                concurrency: self.scheduler.concurrency,
                reserved_urgent: self.scheduler.reserved_urgent,
                malformed_attempts: self.scheduler.malformed_attempts,
            },
        }
    }
}
