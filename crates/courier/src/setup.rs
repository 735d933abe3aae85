//! Wiring a [`CourierConfig`] into the pipeline crates.
//!
//! Each section of the configuration maps onto the types of the crate that
//! consumes it. [`init`] installs logging and the shared HTTP client;
//! [`client_middlewares`] and [`server_middlewares`] assemble the stock
//! middleware sets with the configured headers, credentials and log levels.

use std::sync::Arc;

use courier_config::{CourierConfig, LoggingConfig, SignatureConfig, TransportConfig};
use courier_core::{ClientProtocol, Middleware};
use courier_middleware::{
    CallerCredential, CallerRegistry, ClientEnvelopeMiddleware, LogLevel, MiddlewareSet,
    RequestIdMiddleware, RequestLogMiddleware, ResponseLogMiddleware, ServerEnvelopeMiddleware,
    SignRequestMiddleware, SignatureHeaders, VerifySignatureMiddleware,
};
use courier_telemetry::TelemetryError;
use courier_transport::{ClientConfig, SharedClientGuard, TransportError};
use thiserror::Error;

/// Errors raised while bringing a service up.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Logging could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The shared HTTP client could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Installs logging and the process-wide HTTP client.
///
/// Hold the returned guard for the lifetime of the process; dropping it
/// shuts the shared client down.
pub fn init(config: &CourierConfig) -> Result<SharedClientGuard, SetupError> {
    courier_telemetry::init_logging(&config.logging.to_log_config())?;
    let guard = courier_transport::init_shared_client(&client_config(&config.transport))?;
    log_summary(config);
    Ok(guard)
}

fn log_summary(config: &CourierConfig) {
    tracing::info!(
        timeout_ms = config.transport.timeout_ms,
        exchange_level = %config.logging.exchange_level,
        callers = config.signature.credentials.len(),
        signing = config.signature.sign_as.is_some(),
        "Courier initialized"
    );
}

/// Creates a client protocol on the shared client with the configured
/// middlewares already registered.
pub fn client(
    config: &CourierConfig,
    method: http::Method,
    url: impl Into<String>,
) -> Result<ClientProtocol, TransportError> {
    let mut protocol = courier_transport::protocol(method, url)?;
    let (request, response) = client_middlewares(config);
    for middleware in request {
        protocol.add_request_middleware(middleware);
    }
    for middleware in response {
        protocol.add_response_middleware(middleware);
    }
    Ok(protocol)
}

/// Converts transport settings into the `reqwest` client settings.
#[must_use]
pub fn client_config(transport: &TransportConfig) -> ClientConfig {
    ClientConfig {
        timeout: transport.timeout(),
        connect_timeout: transport.connect_timeout(),
        pool_idle_timeout: transport.pool_idle_timeout(),
        pool_max_idle_per_host: transport.pool_max_idle_per_host,
        user_agent: transport.user_agent.clone(),
    }
}

/// Returns the level of the per-exchange log entries.
///
/// Unknown values fall back to `INFO`; [`CourierConfig::validate`] rejects
/// them before this point.
#[must_use]
pub fn exchange_log_level(logging: &LoggingConfig) -> LogLevel {
    if !logging.enabled {
        return LogLevel::Off;
    }
    match logging.exchange_level.to_ascii_lowercase().as_str() {
        "off" => LogLevel::Off,
        "trace" => LogLevel::Trace,
        "debug" => LogLevel::Debug,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Returns the configured signature header names.
#[must_use]
pub fn signature_headers(signature: &SignatureConfig) -> SignatureHeaders {
    SignatureHeaders::new(&signature.caller_id_header, &signature.signature_header)
}

/// Returns the credential outgoing requests are signed with, if any.
#[must_use]
pub fn signing_credential(signature: &SignatureConfig) -> Option<CallerCredential> {
    signature
        .signing_credential()
        .map(|credential| CallerCredential::new(&credential.caller_id, &credential.secret))
}

/// Builds the registry incoming signatures are verified against.
#[must_use]
pub fn caller_registry(signature: &SignatureConfig) -> CallerRegistry {
    signature
        .credentials
        .iter()
        .map(|credential| CallerCredential::new(&credential.caller_id, &credential.secret))
        .collect()
}

/// The client middleware set for `config`.
///
/// Requests are signed when `signature.sign_as` names a credential.
#[must_use]
pub fn client_middlewares(config: &CourierConfig) -> MiddlewareSet {
    let level = exchange_log_level(&config.logging);
    let mut request = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(RequestLogMiddleware::with_level(level)),
    ];
    if let Some(credential) = signing_credential(&config.signature) {
        request.push(
            SignRequestMiddleware::new(credential)
                .with_headers(signature_headers(&config.signature))
                .into_middleware(),
        );
    }
    let response = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(
            ResponseLogMiddleware::with_level(level).body_limit(config.logging.body_log_limit),
        ),
        Middleware::new(ClientEnvelopeMiddleware::new()),
    ];
    (request, response)
}

/// The server middleware set for `config`.
///
/// Signatures are verified when at least one credential is configured.
#[must_use]
pub fn server_middlewares(config: &CourierConfig) -> MiddlewareSet {
    let level = exchange_log_level(&config.logging);
    let mut request = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(RequestLogMiddleware::with_level(level)),
    ];
    if !config.signature.credentials.is_empty() {
        let registry = Arc::new(caller_registry(&config.signature));
        request.push(Middleware::new(
            VerifySignatureMiddleware::new(registry)
                .with_headers(signature_headers(&config.signature)),
        ));
    }
    let response = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(
            ResponseLogMiddleware::with_level(level).body_limit(config.logging.body_log_limit),
        ),
        Middleware::new(ServerEnvelopeMiddleware::new()),
    ];
    (request, response)
}
