//! CLI error handling with user-friendly messages.

use std::fmt;
use std::process;

use mapproxy::config::ConfigError;
use mapproxy::MapproxyError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be loaded
    Config(ConfigError),
    /// Invalid command-line input
    Usage(String),
    /// Failed to build the proxy from its configuration
    ServiceCreation(MapproxyError),
    /// A library operation failed
    Operation(MapproxyError),
    /// HTTP server error
    Serve(MapproxyError),
}

impl CliError {
    /// Exit the process with an error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::ServiceCreation(_) = self {
            eprintln!();
            eprintln!("Check the [resources] section of {}", mapproxy::config::config_file_path().display());
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Usage(msg) => write!(f, "{}", msg),
            CliError::ServiceCreation(e) => write!(f, "Failed to create service: {}", e),
            CliError::Operation(e) => write!(f, "{}", e),
            CliError::Serve(e) => write!(f, "HTTP server error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::ServiceCreation(e) | CliError::Operation(e) | CliError::Serve(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<MapproxyError> for CliError {
    fn from(e: MapproxyError) -> Self {
        CliError::Operation(e)
    }
}
