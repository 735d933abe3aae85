//! # Courier
//!
//! **Request/response middleware pipelines for HTTP services**
//!
//! Courier decorates each outgoing call and each incoming request with a
//! chain of middlewares: logging with `curl` reproduction, request ids,
//! request signing, and the `code`/`message`/`data` business envelope.
//!
//! ## Quick Start
//!
//! ```no_run
//! use courier::prelude::*;
//! use serde_json::{json, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("courier.toml")?
//!     .with_env_prefix("COURIER")
//!     .load()?;
//! let _guard = courier::init(&config)?;
//!
//! let mut client = courier::client(&config, http::Method::POST, "http://billing.internal/charge")?;
//! let receipt: Value = client.call(&json!({"amount": 10})).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! write_request → RequestId → RequestLog → Sign (BeforeSend) → I/O writer
//! read_response → RequestId → ResponseLog → Envelope → I/O reader
//! ```

#![doc(html_root_url = "https://docs.rs/courier/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod setup;

// Re-export the pipeline core
pub use courier_core as core;

// Re-export stock middlewares
pub use courier_middleware as middleware;

// Re-export I/O adapters
pub use courier_transport as transport;

// Re-export logging setup
pub use courier_telemetry as telemetry;

// Re-export configuration
pub use courier_config as config;

pub use setup::{client, init, SetupError};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use courier::prelude::*;
///
/// let message = RequestMessage::new();
/// assert!(message.payload().is_none());
/// ```
pub mod prelude {
    pub use courier_core::{
        handler_fn, BoxFuture, ClientProtocol, Envelope, ErrorCategory, Handler, IoDirection,
        Metadata, Middleware, PipelineError, PipelineResult, RequestMessage, ResponseMessage,
        ServerProtocol, Stage, Unvalidated, Validate, ValidationError,
    };

    pub use courier_middleware::{CallerCredential, CallerRegistry, LogLevel, SignatureHeaders};

    pub use courier_transport::{serve, ClientConfig, HttpClient, ServerExchange, ServerOptions};

    pub use courier_config::{ConfigError, ConfigLoader, CourierConfig};

    pub use courier_telemetry::{LogConfig, LogFormat};
}
