//! Structured logging for Courier services.
//!
//! Every Courier crate logs through `tracing`; this crate decides where the
//! events go:
//!
//! | Format | Use |
//! |--------|-----|
//! | [`LogFormat::Json`] | production, one object per line |
//! | [`LogFormat::Pretty`] | local development |
//! | [`LogFormat::Compact`] | terse human-readable output |
//!
//! # Example
//!
//! ```no_run
//! use courier_telemetry::{init_logging, LogConfig};
//!
//! # fn main() -> Result<(), courier_telemetry::TelemetryError> {
//! init_logging(&LogConfig::development())?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/courier-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, fields, init_logging, init_test_logging, LogConfig, LogFormat};

/// Result alias for telemetry setup.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
