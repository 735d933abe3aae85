//! # Courier Middleware
//!
//! Stock middlewares for Courier pipelines.
//!
//! | Middleware | Role | Stage | Purpose |
//! |------------|------|-------|---------|
//! | [`RequestIdMiddleware`] | both | Default | Stamp / echo `x-request-id` |
//! | [`RequestLogMiddleware`] | request | Default | Log with `curl` reproduction |
//! | [`ResponseLogMiddleware`] | response | Default | Log status and truncated body |
//! | [`SignRequestMiddleware`] | request | BeforeSend | `md5(body_secret)` signature headers |
//! | [`VerifySignatureMiddleware`] | request | Default | Reject bad signatures |
//! | [`RequireSignatureHeadersMiddleware`] | request | BeforeSend | Reject missing signature headers |
//! | [`ServerEnvelopeMiddleware`] | response | Default | Wrap payload or error in an envelope |
//! | [`ClientEnvelopeMiddleware`] | response | Default | Unwrap envelope, surface business errors |
//!
//! [`client_middlewares`] and [`server_middlewares`] assemble the usual sets.
//!
//! ## Example
//!
//! ```
//! use courier_core::ClientProtocol;
//! use courier_middleware::{client_middlewares, stages::CallerCredential};
//! use http::Method;
//!
//! let mut client = ClientProtocol::new(Method::POST, "http://billing.internal/charge");
//! let (request, response) = client_middlewares(Some(CallerCredential::new("web", "s3cret")));
//! for middleware in request {
//!     client.add_request_middleware(middleware);
//! }
//! for middleware in response {
//!     client.add_response_middleware(middleware);
//! }
//! assert_eq!(client.request().chain().len(), 3);
//! ```

#![doc(html_root_url = "https://docs.rs/courier-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod stages;

use std::sync::Arc;

use courier_core::{Middleware, Request, Response};

pub use stages::{
    CallerCredential, CallerRegistry, ClientEnvelopeMiddleware, LogLevel, RequestIdMiddleware,
    RequestLogMiddleware, RequireSignatureHeadersMiddleware, ResponseLogMiddleware,
    ServerEnvelopeMiddleware, SignRequestMiddleware, SignatureHeaders, VerifySignatureMiddleware,
};

/// Request and response middlewares, in registration order.
pub type MiddlewareSet = (Vec<Middleware<Request>>, Vec<Middleware<Response>>);

/// The usual client set: request id, logging, envelope unwrapping and,
/// with a credential, request signing.
#[must_use]
pub fn client_middlewares(credential: Option<CallerCredential>) -> MiddlewareSet {
    let mut request = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(RequestLogMiddleware::new()),
    ];
    if let Some(credential) = credential {
        request.push(SignRequestMiddleware::new(credential).into_middleware());
    }
    let response = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(ResponseLogMiddleware::new()),
        Middleware::new(ClientEnvelopeMiddleware::new()),
    ];
    (request, response)
}

/// The usual server set: request id, logging, envelope wrapping and, with a
/// registry, signature verification.
#[must_use]
pub fn server_middlewares(registry: Option<Arc<CallerRegistry>>) -> MiddlewareSet {
    let mut request = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(RequestLogMiddleware::new()),
    ];
    if let Some(registry) = registry {
        request.push(Middleware::new(VerifySignatureMiddleware::new(registry)));
    }
    let response = vec![
        Middleware::new(RequestIdMiddleware::new()),
        Middleware::new(ResponseLogMiddleware::new()),
        Middleware::new(ServerEnvelopeMiddleware::new()),
    ];
    (request, response)
}
