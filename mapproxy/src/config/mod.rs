//! Configuration file handling for `~/.mapproxy/config.ini`.
//!
//! Section structs carry their defaults; INI key names are mapped to fields
//! in [`parser`].

mod parser;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::arsenal::default_workers;
use crate::generator::registry::DEFAULT_UPDATE_PERIOD;

/// Default HTTP listen address.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3070";

/// Default log level when `RUST_LOG` is unset.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default store directory name under the config directory.
pub const DEFAULT_STORE_DIR: &str = "store";

/// Default resource definitions file name under the config directory.
pub const DEFAULT_DEFINITIONS_FILE: &str = "resources.json";

/// Default reference frame file name under the config directory.
pub const DEFAULT_REFERENCE_FRAMES_FILE: &str = "referenceframes.json";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub http: HttpSettings,
    pub generators: GeneratorSettings,
    pub resources: ResourceSettings,
    pub arsenal: ArsenalSettings,
    pub logging: LoggingConfig,
}

/// `[http]`
#[derive(Debug, Clone, PartialEq)]
pub struct HttpSettings {
    pub listen: SocketAddr,
}

/// `[generators]`
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    /// Store of persisted generator state.
    pub root: PathBuf,
    /// Base for relative dataset paths.
    pub resource_root: PathBuf,
    pub update_period: Duration,
    pub browser: bool,
}

/// `[resources]`
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSettings {
    pub definitions: PathBuf,
    pub reference_frames: PathBuf,
    pub data_files: Option<PathBuf>,
}

/// `[arsenal]`
#[derive(Debug, Clone, PartialEq)]
pub struct ArsenalSettings {
    pub workers: usize,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily-rolled log files go here when set.
    pub directory: Option<PathBuf>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 3070)),
        }
    }
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            root: config_directory().join(DEFAULT_STORE_DIR),
            resource_root: config_directory(),
            update_period: DEFAULT_UPDATE_PERIOD,
            browser: true,
        }
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            definitions: config_directory().join(DEFAULT_DEFINITIONS_FILE),
            reference_frames: config_directory().join(DEFAULT_REFERENCE_FRAMES_FILE),
            data_files: None,
        }
    }
}

impl Default for ArsenalSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            http: HttpSettings::default(),
            generators: GeneratorSettings::default(),
            resources: ResourceSettings::default(),
            arsenal: ArsenalSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Loads from the default path, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Loads from `path`. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Parses INI text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigError::Read(ini::Error::Parse(e)))?;
        parser::parse_ini(&ini)
    }
}

/// The config directory (`~/.mapproxy`).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mapproxy")
}

/// The config file (`~/.mapproxy/config.ini`).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
