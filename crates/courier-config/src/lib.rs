//! Typed configuration for Courier.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Sections
//!
//! - [`TransportConfig`] - Shared HTTP client timeouts and pool sizing
//! - [`LoggingConfig`] - Log level, format and exchange logging
//! - [`SignatureConfig`] - Signature headers and caller credentials
//!
//! # Configuration File Format
//!
//! ```toml
//! [transport]
//! timeout_ms = 10000
//! pool_idle_timeout_secs = 90
//! pool_max_idle_per_host = 1000
//!
//! [logging]
//! level = "info"
//! format = "json"
//! exchange_level = "info"
//! body_log_limit = 512
//!
//! [signature]
//! caller_id_header = "x-caller-id"
//! signature_header = "x-signature"
//! sign_as = "web"
//!
//! [[signature.credentials]]
//! caller_id = "web"
//! secret = "s3cret"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `COURIER__TRANSPORT__TIMEOUT_MS=2500`
//! - `COURIER__LOGGING__LEVEL=debug`
//! - `COURIER__SIGNATURE__CREDENTIALS__WEB=s3cret`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::CourierConfig;
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{CredentialConfig, LoggingConfig, SignatureConfig, TransportConfig};
