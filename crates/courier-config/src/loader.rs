//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use courier_telemetry::LogFormat;

use crate::{ConfigError, CourierConfig};

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables (`PREFIX__SECTION__KEY`)
///
/// # Example
///
/// ```no_run
/// use courier_config::ConfigLoader;
///
/// # fn main() -> Result<(), courier_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("courier.toml")?
///     .with_env_prefix("COURIER")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: CourierConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CourierConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = CourierConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = CourierConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = CourierConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format follows the extension: `.toml` or `.json`. Sections the file
    /// omits keep their default values.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.config = Self::parse(&content, &extension)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `format` (`"toml"` or `"json"`).
    ///
    /// # Example
    ///
    /// ```
    /// use courier_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [transport]
    ///     timeout_ms = 2500
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.transport.timeout_ms, 2500);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = Self::parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// With prefix `COURIER`:
    /// - `COURIER__TRANSPORT__TIMEOUT_MS=2500`
    /// - `COURIER__LOGGING__FORMAT=pretty`
    /// - `COURIER__SIGNATURE__CREDENTIALS__WEB=s3cret` (caller id `web`)
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Finalize: apply environment overrides and validate.
    pub fn load(mut self) -> Result<CourierConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: Vec<(String, String)> = env::vars()
                .filter(|(key, _)| key.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> CourierConfig {
        self.config
    }

    fn parse(content: &str, format: &str) -> Result<CourierConfig, ConfigError> {
        match format {
            "toml" => Ok(toml::from_str(content)?),
            "json" => Ok(serde_json::from_str(content)?),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let Some(rest) = key.strip_prefix(prefix).and_then(|k| k.strip_prefix("__")) else {
            // Shares the prefix but not the separator, e.g. `COURIERX`.
            return Ok(());
        };
        let parts: Vec<&str> = rest.split("__").collect();
        let transport = &mut self.config.transport;
        let logging = &mut self.config.logging;
        let signature = &mut self.config.signature;

        match parts.as_slice() {
            ["TRANSPORT", "TIMEOUT_MS"] => transport.timeout_ms = parse_number(key, value)?,
            ["TRANSPORT", "CONNECT_TIMEOUT_MS"] => {
                transport.connect_timeout_ms = if value.is_empty() || value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(parse_number(key, value)?)
                };
            }
            ["TRANSPORT", "POOL_IDLE_TIMEOUT_SECS"] => {
                transport.pool_idle_timeout_secs = parse_number(key, value)?;
            }
            ["TRANSPORT", "POOL_MAX_IDLE_PER_HOST"] => {
                transport.pool_max_idle_per_host = parse_number(key, value)?;
            }
            ["TRANSPORT", "USER_AGENT"] => transport.user_agent = value.to_string(),

            ["LOGGING", "ENABLED"] => {
                logging.enabled = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_override(key, "a boolean"))?;
            }
            ["LOGGING", "LEVEL"] => logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    "compact" => LogFormat::Compact,
                    _ => {
                        return Err(ConfigError::env_override(key, "json, pretty or compact"))
                    }
                };
            }
            ["LOGGING", "INCLUDE_LOCATION"] => {
                logging.include_location = parse_bool(value)
                    .ok_or_else(|| ConfigError::env_override(key, "a boolean"))?;
            }
            ["LOGGING", "EXCHANGE_LEVEL"] => logging.exchange_level = value.to_lowercase(),
            ["LOGGING", "BODY_LOG_LIMIT"] => logging.body_log_limit = parse_number(key, value)?,

            ["SIGNATURE", "CALLER_ID_HEADER"] => signature.caller_id_header = value.to_lowercase(),
            ["SIGNATURE", "SIGNATURE_HEADER"] => signature.signature_header = value.to_lowercase(),
            ["SIGNATURE", "SIGN_AS"] => {
                signature.sign_as = (!value.is_empty()).then(|| value.to_string());
            }
            ["SIGNATURE", "CREDENTIALS", caller_id] => {
                signature.upsert_credential(caller_id.to_lowercase(), value);
            }

            _ => {}
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_override(key, "an integer"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, CourierConfig::default());
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"logging": {"body_log_limit": 64, "format": "compact"}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.logging.body_log_limit, 64);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.transport.timeout_ms, 10_000);
    }

    #[test]
    fn test_loader_rejects_unknown_fields() {
        let toml = r#"
            [transport]
            retries = 3
        "#;
        assert!(matches!(
            ConfigLoader::new().with_string(toml, "toml"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_loader_rejects_unknown_format() {
        assert!(matches!(
            ConfigLoader::new().with_string("", "yaml"),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_loader_with_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [transport]
            timeout_ms = 3000
            connect_timeout_ms = 500

            [signature]
            sign_as = "web"

            [[signature.credentials]]
            caller_id = "web"
            secret = "s3cret"
            "#
        )
        .unwrap();

        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.transport.timeout_ms, 3000);
        assert_eq!(config.transport.connect_timeout_ms, Some(500));
        assert_eq!(
            config.signature.signing_credential().map(|c| c.secret.as_str()),
            Some("s3cret")
        );
    }

    #[test]
    fn test_loader_with_file_not_found() {
        assert!(matches!(
            ConfigLoader::new().with_file("/nonexistent/courier.toml"),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/courier.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config, CourierConfig::default());
    }

    #[test]
    fn test_load_validates() {
        let result = ConfigLoader::new()
            .with_string(r#"{"transport": {"timeout_ms": 0}}"#, "json")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    // Overrides are applied directly: setting process env vars from tests
    // would race with other tests.

    #[test]
    fn test_apply_env_var_transport() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__TRANSPORT__TIMEOUT_MS", "2500", "TEST").unwrap();
        loader.apply_env_var("TEST__TRANSPORT__CONNECT_TIMEOUT_MS", "none", "TEST").unwrap();
        assert_eq!(loader.config.transport.timeout_ms, 2500);
        assert_eq!(loader.config.transport.connect_timeout_ms, None);
    }

    #[test]
    fn test_apply_env_var_invalid_integer() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__TRANSPORT__POOL_MAX_IDLE_PER_HOST", "lots", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvOverride { .. })));
    }

    #[test]
    fn test_apply_env_var_logging() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__LOGGING__FORMAT", "pretty", "TEST").unwrap();
        loader.apply_env_var("TEST__LOGGING__EXCHANGE_LEVEL", "OFF", "TEST").unwrap();
        assert_eq!(loader.config.logging.format, LogFormat::Pretty);
        assert_eq!(loader.config.logging.exchange_level, "off");
        assert!(loader.apply_env_var("TEST__LOGGING__FORMAT", "xml", "TEST").is_err());
    }

    #[test]
    fn test_apply_env_var_credentials() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__SIGNATURE__CREDENTIALS__WEB", "s3cret", "TEST").unwrap();
        loader.apply_env_var("TEST__SIGNATURE__SIGN_AS", "web", "TEST").unwrap();
        assert_eq!(
            loader.config.signature.signing_credential().map(|c| c.secret.as_str()),
            Some("s3cret")
        );
    }

    #[test]
    fn test_apply_env_var_ignores_unknown_keys() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("TEST__NOPE", "1", "TEST").unwrap();
        loader.apply_env_var("TESTING", "1", "TEST").unwrap();
        assert_eq!(loader.config, CourierConfig::default());
    }
}
