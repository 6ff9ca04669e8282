//! Error types for pagevault-core

use thiserror::Error;

/// Result type alias using pagevault-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for pagevault
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A collection or resource identifier cannot be mapped to a path
    #[error("Invalid {kind} identifier '{id}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        id: String,
        reason: &'static str,
    },

    /// Unknown deployment name
    #[error("Unknown deployment: {name}. Valid deployments: dev, prod")]
    InvalidDeployment { name: String },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an invalid identifier error
    pub fn invalid_identifier(kind: &'static str, id: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidIdentifier {
            kind,
            id: id.into(),
            reason,
        }
    }

    /// Create an invalid deployment error
    pub fn invalid_deployment(name: impl Into<String>) -> Self {
        Self::InvalidDeployment { name: name.into() }
    }
}
