//! Configuration error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a [`CourierConfig`](crate::CourierConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    /// The configuration file exists but could not be read.
    #[error("cannot read config file {}", .path.display())]
    Read {
        /// The file being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// TOML content did not match the configuration schema.
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON content did not match the configuration schema.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Neither TOML nor JSON.
    #[error("unsupported config format {0:?}, expected \"toml\" or \"json\"")]
    UnsupportedFormat(String),

    /// A value parsed but breaks a rule of [`CourierConfig::validate`](crate::CourierConfig::validate).
    #[error("{field}: {reason}")]
    Invalid {
        /// Dotted path of the offending field, e.g. `transport.timeout_ms`.
        field: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An environment override could not be parsed. The value is not echoed,
    /// since overrides may carry secrets.
    #[error("{var}: expected {expected}")]
    EnvOverride {
        /// The environment variable.
        var: String,
        /// The kind of value the variable takes.
        expected: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn env_override(var: &str, expected: &'static str) -> Self {
        Self::EnvOverride {
            var: var.to_string(),
            expected,
        }
    }

    /// Returns the config field or environment variable the error points at.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::EnvOverride { var, .. } => Some(var),
            _ => None,
        }
    }
}
