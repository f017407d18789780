//! Common setup shared by the commands: config loading and logging.

use std::path::Path;

use mapproxy::config::ConfigFile;
use mapproxy::logging::{init_logging, LoggingGuard};
use mapproxy::service::MapproxyService;
use tracing::info;

use crate::error::CliError;

/// Keeps logging alive for the duration of a command.
pub struct CliRunner {
    _logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Loads `config_path` (or the default config) and installs logging.
    pub fn new(config_path: Option<&Path>) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };

        let logging_guard =
            init_logging(&config.logging).map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            _logging_guard: logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigFile {
        &mut self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!("Mapproxy v{}", mapproxy::VERSION);
        info!("Mapproxy CLI: {} command", command);
    }

    pub fn create_service(&self) -> Result<MapproxyService, CliError> {
        MapproxyService::from_config(&self.config)
            .map_err(CliError::ServiceCreation)
            .inspect(|_| info!("Service created"))
    }
}
