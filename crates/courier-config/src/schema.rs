//! Configuration sections.

use std::fmt;
use std::time::Duration;

use courier_telemetry::{LogConfig, LogFormat};
use serde::{Deserialize, Serialize};

/// Settings for the shared HTTP client.
///
/// # Example
///
/// ```
/// use courier_config::TransportConfig;
///
/// let config = TransportConfig::default();
/// assert_eq!(config.timeout_ms, 10_000);
/// assert_eq!(config.pool_max_idle_per_host, 1000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Total request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Connect timeout in milliseconds; unset means bounded only by `timeout_ms`.
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,

    /// Idle pooled connection lifetime in seconds.
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,

    /// Idle pooled connections kept per host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            connect_timeout_ms: None,
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            user_agent: default_user_agent(),
        }
    }
}

impl TransportConfig {
    /// Total request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connect timeout, if set.
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Idle pooled connection lifetime.
    #[must_use]
    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_pool_idle_timeout_secs() -> u64 {
    90
}

const fn default_pool_max_idle_per_host() -> usize {
    1000
}

fn default_user_agent() -> String {
    concat!("courier/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Filter directive (`"info"`, `"warn,courier_transport=debug"`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include source file and line in logs.
    #[serde(default)]
    pub include_location: bool,

    /// Level of the per-exchange request/response entries:
    /// `off`, `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default = "default_log_level")]
    pub exchange_level: String,

    /// Response body bytes written to the exchange log.
    #[serde(default = "default_body_log_limit")]
    pub body_log_limit: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
            exchange_level: default_log_level(),
            body_log_limit: default_body_log_limit(),
        }
    }
}

impl LoggingConfig {
    /// Accepted values of [`exchange_level`](Self::exchange_level).
    pub const EXCHANGE_LEVELS: [&'static str; 6] = ["off", "trace", "debug", "info", "warn", "error"];

    /// Converts to the subscriber settings used by `courier-telemetry`.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        let base = match self.format {
            LogFormat::Json => LogConfig::production(),
            LogFormat::Pretty | LogFormat::Compact => LogConfig::development(),
        };
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            format: self.format,
            file_line_info: self.include_location,
            ..base
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_body_log_limit() -> usize {
    512
}

/// A caller id and its shared secret.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CredentialConfig {
    /// Caller id sent in the caller id header.
    pub caller_id: String,
    /// Shared secret appended to the body before hashing.
    pub secret: String,
}

impl fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("caller_id", &self.caller_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Request signature settings.
///
/// ```toml
/// [signature]
/// sign_as = "web"
///
/// [[signature.credentials]]
/// caller_id = "web"
/// secret = "s3cret"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SignatureConfig {
    /// Header carrying the caller id.
    #[serde(default = "default_caller_id_header")]
    pub caller_id_header: String,

    /// Header carrying the signature.
    #[serde(default = "default_signature_header")]
    pub signature_header: String,

    /// Caller id this service signs outgoing requests as; must name one of
    /// `credentials`.
    #[serde(default)]
    pub sign_as: Option<String>,

    /// Known callers. Servers verify incoming signatures against these.
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            caller_id_header: default_caller_id_header(),
            signature_header: default_signature_header(),
            sign_as: None,
            credentials: Vec::new(),
        }
    }
}

impl SignatureConfig {
    /// Returns the credential named by `sign_as`.
    #[must_use]
    pub fn signing_credential(&self) -> Option<&CredentialConfig> {
        let caller_id = self.sign_as.as_deref()?;
        self.credentials
            .iter()
            .find(|credential| credential.caller_id == caller_id)
    }

    /// Inserts or replaces the secret of `caller_id`.
    pub fn upsert_credential(&mut self, caller_id: impl Into<String>, secret: impl Into<String>) {
        let caller_id = caller_id.into();
        let secret = secret.into();
        match self
            .credentials
            .iter_mut()
            .find(|credential| credential.caller_id == caller_id)
        {
            Some(credential) => credential.secret = secret,
            None => self.credentials.push(CredentialConfig { caller_id, secret }),
        }
    }
}

fn default_caller_id_header() -> String {
    "x-caller-id".to_string()
}

fn default_signature_header() -> String {
    "x-signature".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_durations() {
        let config = TransportConfig {
            connect_timeout_ms: Some(250),
            ..TransportConfig::default()
        };
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.pool_idle_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_logging_to_log_config() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            include_location: true,
            ..LoggingConfig::default()
        };
        let log = config.to_log_config();
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Pretty);
        assert!(log.file_line_info);
    }

    #[test]
    fn test_signing_credential_lookup() {
        let mut config = SignatureConfig::default();
        config.upsert_credential("web", "a");
        config.upsert_credential("batch", "b");
        config.upsert_credential("web", "c");
        config.sign_as = Some("web".to_string());

        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.signing_credential().map(|c| c.secret.as_str()), Some("c"));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = CredentialConfig {
            caller_id: "web".to_string(),
            secret: "hunter2".to_string(),
        };
        assert!(!format!("{credential:?}").contains("hunter2"));
    }
}
