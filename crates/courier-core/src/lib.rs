//! # Courier Core
//!
//! The message pipeline at the heart of Courier.
//!
//! Courier decorates an HTTP-like exchange with cross-cutting concerns
//! (logging, signing, envelope translation, replay for diagnostics) without
//! touching the transport. This crate provides:
//!
//! - [`Message`] - One request or response, with headers, payload, raw bytes and metadata
//! - [`Chain`] - The cursor-based middleware engine driving a message
//! - [`Middleware`] / [`Handler`] - Chain entries and the handler trait
//! - [`Stage`] - Coarse ordering buckets; the I/O hook always runs innermost
//! - [`DuplicateRequest`] / [`DuplicateResponse`] - Replay snapshots of the wire messages
//! - [`ClientProtocol`] / [`ServerProtocol`] - Request/response pairing with role entry points
//! - [`Validate`] - Post-decode payload validation
//! - [`Envelope`] - The `code`/`message`/`data` business envelope
//! - [`PipelineError`] - The error taxonomy
//!
//! ## Execution model
//!
//! ```text
//! write_request(payload)
//!   → [Default middlewares] → [BeforeSend middlewares] → I/O writer
//!   ← post-processing on the way back out ←──────────────────┘
//! ```
//!
//! Each handler continues the chain by awaiting `message.next()` and may act
//! after it returns. The first error aborts the rest of the chain.
//!
//! ## Example
//!
//! ```
//! use courier_core::{handler_fn, IoDirection, Middleware, RequestMessage};
//!
//! # tokio_test::block_on(async {
//! let mut message = RequestMessage::new();
//! message.add(Middleware::new(handler_fn("tag", |message: &mut RequestMessage| {
//!     Box::pin(async move {
//!         message.set_header("x-tag", "1")?;
//!         message.next().await
//!     })
//! })));
//! message.set_writer(handler_fn("writer", |message: &mut RequestMessage| {
//!     Box::pin(async move {
//!         message.encode_payload()?;
//!         Ok(())
//!     })
//! }));
//!
//! message.run(IoDirection::Write).await.unwrap();
//! assert_eq!(message.header("x-tag"), Some("1"));
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/courier-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod chain;
mod duplicate;
pub mod envelope;
mod error;
mod handler;
mod message;
pub mod metadata;
mod protocol;
mod stage;
mod validate;

pub use chain::Chain;
pub use duplicate::{buffer_request, buffer_response, DuplicateRequest, DuplicateResponse};
pub use envelope::{Envelope, CODE_FAIL, CODE_SUCCESS, MESSAGE_SUCCESS};
pub use error::{ErrorCategory, PipelineError, PipelineResult};
pub use handler::{handler_fn, BoxFuture, FnHandler, Handler, Middleware};
pub use message::{
    Message, MessageKind, Request, RequestMessage, Response, ResponseMessage, Role,
    REQUEST_ID_HEADER,
};
pub use metadata::Metadata;
pub use protocol::{ClientProtocol, Protocol, ServerProtocol};
pub use stage::{IoDirection, Stage};
pub use validate::{Unvalidated, Validate, ValidationError};

// Re-exported so downstream crates share the exact types used in signatures.
pub use bytes::Bytes;
pub use tokio_util::sync::CancellationToken;
