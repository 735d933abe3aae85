//! Business envelope translation.
//!
//! Services exchange payloads wrapped as
//! `{"code": "...", "message": "...", "data": ...}`:
//!
//! - [`ServerEnvelopeMiddleware`] wraps the outgoing payload (or the reported
//!   error) before the response writer runs, and sets the raw bytes to the
//!   encoded envelope.
//! - [`ClientEnvelopeMiddleware`] unwraps the incoming envelope after the
//!   response reader ran, turning failure codes into
//!   [`PipelineError::Business`].
//!
//! The HTTP status is left alone: a business failure still travels as the
//! status chosen by the writer.

use courier_core::envelope::{Envelope, CODE_SUCCESS};
use courier_core::metadata::keys;
use courier_core::{
    BoxFuture, Handler, PipelineError, PipelineResult, Response, ResponseMessage,
};
use serde_json::Value;

/// Message used when a non-success code is set without an error.
const MESSAGE_FAIL: &str = "fail";

/// Wraps outgoing response payloads in an [`Envelope`].
///
/// | Response state | Envelope |
/// |----------------|----------|
/// | no error, success code | `code = "0"`, `message = "success"`, `data = payload` |
/// | error reported | `code = business code`, `message = error text`, `data = null` |
/// | no error, other code | `code = override`, `message = "fail"`, `data = null` |
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerEnvelopeMiddleware {
    _private: (),
}

impl ServerEnvelopeMiddleware {
    /// Creates the server-side envelope middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn envelope_for(message: &mut ResponseMessage) -> Envelope {
        let code = message.business_code();
        if message.error().is_some() {
            return Envelope::failure(code, message.business_message());
        }
        if code == CODE_SUCCESS {
            Envelope::success(message.take_payload().unwrap_or(Value::Null))
        } else {
            Envelope::failure(code, MESSAGE_FAIL)
        }
    }
}

impl Handler<Response> for ServerEnvelopeMiddleware {
    fn name(&self) -> &'static str {
        "server_envelope"
    }

    fn handle<'a>(&'a self, message: &'a mut ResponseMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let envelope = Self::envelope_for(message);
            // Raw keeps the field order of the envelope on the wire.
            let raw = serde_json::to_vec(&envelope).map_err(PipelineError::Encode)?;
            message.set_payload_from(&envelope)?;
            message.set_raw(raw);
            message.next().await
        })
    }
}

/// Unwraps incoming envelopes into their `data`.
///
/// The received code is recorded under the `business_code` metadata key
/// whether or not it signals success. An absent payload passes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientEnvelopeMiddleware {
    _private: (),
}

impl ClientEnvelopeMiddleware {
    /// Creates the client-side envelope middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Handler<Response> for ClientEnvelopeMiddleware {
    fn name(&self) -> &'static str {
        "client_envelope"
    }

    fn handle<'a>(&'a self, message: &'a mut ResponseMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            message.next().await?;

            let Some(payload) = message.take_payload() else {
                return Ok(());
            };
            let envelope: Envelope = serde_json::from_value(payload).map_err(PipelineError::decode)?;
            message.set_metadata(keys::BUSINESS_CODE, envelope.code.clone());

            let data = envelope.into_data()?;
            message.set_payload(data);
            Ok(())
        })
    }
}
