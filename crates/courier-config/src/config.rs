//! Main configuration type.
//!
//! This module provides the top-level [`CourierConfig`] struct.

use std::collections::HashSet;

use courier_telemetry::LogFormat;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, LoggingConfig, SignatureConfig, TransportConfig};

/// Complete Courier configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use courier_config::CourierConfig;
///
/// let config = CourierConfig::default();
/// assert_eq!(config.transport.timeout_ms, 10_000);
/// assert_eq!(config.logging.body_log_limit, 512);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    /// Shared HTTP client settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Request signature settings.
    #[serde(default)]
    pub signature: SignatureConfig,
}

impl CourierConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - A timeout or the idle pool size is zero
    /// - The exchange log level is unknown
    /// - A header name is empty or not lowercase ASCII
    /// - Caller ids repeat or a secret is empty
    /// - `sign_as` names no credential
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "transport.timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.transport.connect_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "transport.connect_timeout_ms",
                "must be greater than zero",
            ));
        }

        let exchange_level = self.logging.exchange_level.to_ascii_lowercase();
        if !LoggingConfig::EXCHANGE_LEVELS.contains(&exchange_level.as_str()) {
            return Err(ConfigError::invalid(
                "logging.exchange_level",
                format!("unknown level {:?}", self.logging.exchange_level),
            ));
        }

        for (field, header) in [
            ("signature.caller_id_header", &self.signature.caller_id_header),
            ("signature.signature_header", &self.signature.signature_header),
        ] {
            let valid = !header.is_empty()
                && header
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
            if !valid {
                return Err(ConfigError::invalid(
                    field,
                    format!("invalid header name {header:?}"),
                ));
            }
        }

        let mut seen = HashSet::new();
        for credential in &self.signature.credentials {
            if !seen.insert(credential.caller_id.as_str()) {
                return Err(ConfigError::invalid(
                    "signature.credentials",
                    format!("duplicate caller id {:?}", credential.caller_id),
                ));
            }
            if credential.secret.is_empty() {
                return Err(ConfigError::invalid(
                    "signature.credentials",
                    format!("empty secret for caller {:?}", credential.caller_id),
                ));
            }
        }

        if let Some(sign_as) = &self.signature.sign_as {
            if self.signature.signing_credential().is_none() {
                return Err(ConfigError::invalid(
                    "signature.sign_as",
                    format!("no credential for caller {sign_as:?}"),
                ));
            }
        }

        Ok(())
    }

    /// Development preset: debug level, pretty output, full exchange logs.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: LogFormat::Pretty,
                include_location: true,
                exchange_level: "debug".to_string(),
                body_log_limit: 4096,
                ..LoggingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Production preset: JSON output at info.
    #[must_use]
    pub fn production() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CourierConfig::default().validate().is_ok());
        assert!(CourierConfig::development().validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = CourierConfig::default();
        config.transport.timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "transport.timeout_ms"
        ));
    }

    #[test]
    fn test_unknown_exchange_level_rejected() {
        let mut config = CourierConfig::default();
        config.logging.exchange_level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.exchange_level = "OFF".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_header_name_rejected() {
        let mut config = CourierConfig::default();
        config.signature.signature_header = "X Signature".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_caller_rejected() {
        let mut config = CourierConfig::default();
        config.signature.credentials = vec![
            crate::CredentialConfig {
                caller_id: "web".to_string(),
                secret: "a".to_string(),
            },
            crate::CredentialConfig {
                caller_id: "web".to_string(),
                secret: "b".to_string(),
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sign_as_must_exist() {
        let mut config = CourierConfig::default();
        config.signature.sign_as = Some("web".to_string());
        assert!(config.validate().is_err());

        config.signature.upsert_credential("web", "s3cret");
        assert!(config.validate().is_ok());
    }
}
