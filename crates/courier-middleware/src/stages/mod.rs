//! Stock middleware stages.
//!
//! ## Request side
//!
//! - [`request_id`] - Stamp or pin the `x-request-id` correlation id
//! - [`logging`] - Log the request with a `curl` reproduction
//! - [`signature`] - Sign outgoing bodies, verify incoming ones
//!
//! ## Response side
//!
//! - [`request_id`] - Echo the correlation id
//! - [`logging`] - Log status and a truncated body, or the reported error
//! - [`envelope`] - Wrap / unwrap the `code`/`message`/`data` envelope

pub mod envelope;
pub mod logging;
pub mod request_id;
pub mod signature;

pub use envelope::{ClientEnvelopeMiddleware, ServerEnvelopeMiddleware};
pub use logging::{LogLevel, RequestLogMiddleware, ResponseLogMiddleware, DEFAULT_BODY_LOG_LIMIT};
pub use request_id::RequestIdMiddleware;
pub use signature::{
    CallerCredential, CallerRegistry, RequireSignatureHeadersMiddleware, SignRequestMiddleware,
    SignatureHeaders, VerifySignatureMiddleware,
};
