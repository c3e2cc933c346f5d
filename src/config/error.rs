//! Configuration Error Types
//!
//! Errors raised while layering, deserializing and validating dispatcher
//! configuration.

use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A configuration source could not be read or merged
    #[error("Failed to load configuration from {source_name}: {error}")]
    SourceError { source_name: String, error: String },

    /// The merged configuration did not deserialize
    #[error("Invalid configuration: {error}")]
    DeserializationError { error: String },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl ConfigurationError {
    pub fn source_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::SourceError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: Into<String>, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        match error {
            config::ConfigError::NotFound(path) => Self::FileNotFound(path),
            config::ConfigError::Type { .. } | config::ConfigError::Message(_) => {
                Self::DeserializationError {
                    error: error.to_string(),
                }
            }
            other => Self::source_error("configuration sources", other),
        }
    }
}

impl From<ConfigurationError> for crate::error::DispatchError {
    fn from(error: ConfigurationError) -> Self {
        crate::error::DispatchError::Configuration(error.to_string())
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigurationError>;
