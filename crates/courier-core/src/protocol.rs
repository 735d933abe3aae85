//! Request/response pairing and role entry points.
//!
//! A [`Protocol`] owns exactly one request and one response message, created
//! together and sharing one cancellation token. While either message runs,
//! the protocol lends it its peer, so handlers can reach the other side
//! through [`RequestMessage::response`] / [`ResponseMessage::request`], and
//! takes it back when the run ends, whatever the outcome.
//!
//! Roles wrap the pairing with typed entry points:
//!
//! | Role | Entry points |
//! |---|---|
//! | [`ClientProtocol`] | `write_request` → `read_response` (or `call`) |
//! | [`ServerProtocol`] | `read_request` → business handler → `response_success` / `response_fail` |
//!
//! A protocol serves one logical call. It is not meant to be shared across
//! concurrent calls; build a fresh one per call.

use crate::error::{PipelineError, PipelineResult};
use crate::handler::{Handler, Middleware};
use crate::message::{Request, RequestMessage, Response, ResponseMessage};
use crate::metadata::keys;
use crate::stage::IoDirection;
use crate::validate::Validate;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::ops::{Deref, DerefMut};
use tokio_util::sync::CancellationToken;

/// The request/response pair of one call.
#[derive(Debug)]
pub struct Protocol {
    request: RequestMessage,
    response: ResponseMessage,
    cancellation: CancellationToken,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol {
    /// Creates a pair with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Creates a pair whose messages observe `cancellation`.
    #[must_use]
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            request: RequestMessage::with_cancellation(cancellation.clone()),
            response: ResponseMessage::with_cancellation(cancellation.clone()),
            cancellation,
        }
    }

    /// Returns the request message.
    #[must_use]
    pub const fn request(&self) -> &RequestMessage {
        &self.request
    }

    /// Returns the request message for modification.
    pub fn request_mut(&mut self) -> &mut RequestMessage {
        &mut self.request
    }

    /// Returns the response message.
    #[must_use]
    pub const fn response(&self) -> &ResponseMessage {
        &self.response
    }

    /// Returns the response message for modification.
    pub fn response_mut(&mut self) -> &mut ResponseMessage {
        &mut self.response
    }

    /// Returns the cancellation token shared by both messages.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Cancels the call. Handlers observe it through the shared token.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Registers a request middleware. `None` is skipped.
    pub fn add_request_middleware(
        &mut self,
        middleware: impl Into<Option<Middleware<Request>>>,
    ) -> &mut Self {
        self.request.add(middleware);
        self
    }

    /// Registers a response middleware. `None` is skipped.
    pub fn add_response_middleware(
        &mut self,
        middleware: impl Into<Option<Middleware<Response>>>,
    ) -> &mut Self {
        self.response.add(middleware);
        self
    }

    /// Runs the request chain with the response lent to it.
    pub async fn run_request(&mut self, direction: IoDirection) -> PipelineResult<()> {
        let response = std::mem::take(&mut self.response);
        self.request.lend_response(response);
        let result = self.request.run(direction).await;
        if let Some(response) = self.request.reclaim_response() {
            self.response = response;
        }
        result
    }

    /// Runs the response chain with the request lent to it.
    pub async fn run_response(&mut self, direction: IoDirection) -> PipelineResult<()> {
        let request = std::mem::take(&mut self.request);
        self.response.lend_request(request);
        let result = self.response.run(direction).await;
        if let Some(request) = self.response.reclaim_request() {
            self.request = request;
        }
        result
    }

    fn decode_response<T: DeserializeOwned + Validate>(&self) -> PipelineResult<T> {
        let value: T = self.response.payload_as()?;
        value.validate()?;
        Ok(value)
    }

    fn decode_request<T: DeserializeOwned + Validate>(&self) -> PipelineResult<T> {
        let value: T = self.request.payload_as()?;
        value.validate()?;
        Ok(value)
    }
}

/// Client role: send a request, then receive the response.
///
/// # Example
///
/// ```ignore
/// let mut protocol = ClientProtocol::new(Method::POST, "http://users.local/users")
///     .with_io(reader, writer);
/// protocol.add_request_middleware(Middleware::before_send(0, signer));
/// let user: User = protocol.call(&CreateUser { name: "ada".into() }).await?;
/// ```
#[derive(Debug)]
pub struct ClientProtocol {
    protocol: Protocol,
}

impl ClientProtocol {
    /// Creates a client call for `method` and `url`.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self::with_cancellation(method, url, CancellationToken::new())
    }

    /// Creates a client call observing `cancellation`.
    pub fn with_cancellation(
        method: Method,
        url: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        let mut protocol = Protocol::with_cancellation(cancellation);
        protocol.request.set_method(method);
        protocol.request.set_url(url);
        Self { protocol }
    }

    /// Installs the response reader and the request writer.
    #[must_use]
    pub fn with_io(mut self, reader: impl Handler<Response>, writer: impl Handler<Request>) -> Self {
        self.protocol.response.set_reader(reader);
        self.protocol.request.set_writer(writer);
        self
    }

    /// Appends a request header.
    pub fn set_header(&mut self, name: &str, value: &str) -> PipelineResult<&mut Self> {
        self.protocol.request.set_header(name, value)?;
        Ok(self)
    }

    /// Declares a JSON request body.
    pub fn set_content_type_json(&mut self) -> PipelineResult<&mut Self> {
        self.set_header(http::header::CONTENT_TYPE.as_str(), "application/json")
    }

    /// Serializes `payload` and runs the request chain, ending in the writer.
    pub async fn write_request<T: Serialize + ?Sized>(&mut self, payload: &T) -> PipelineResult<()> {
        let request = &mut self.protocol.request;
        request.set_payload_from(payload)?;
        request.clear_raw();
        self.protocol.run_request(IoDirection::Write).await
    }

    /// Runs the response chain, ending in the reader, then decodes and validates.
    pub async fn read_response<T: DeserializeOwned + Validate>(&mut self) -> PipelineResult<T> {
        self.protocol.run_response(IoDirection::Read).await?;
        self.protocol.decode_response()
    }

    /// Writes `payload` and reads the response.
    pub async fn call<Req, Resp>(&mut self, payload: &Req) -> PipelineResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned + Validate,
    {
        self.write_request(payload).await?;
        self.read_response().await
    }

    /// Returns the HTTP status received, if any.
    #[must_use]
    pub fn http_status(&self) -> Option<StatusCode> {
        self.protocol.response.status().or_else(|| {
            self.protocol
                .response
                .metadata()
                .get_u64(keys::HTTP_STATUS)
                .and_then(|code| u16::try_from(code).ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
        })
    }

    /// Consumes the role and returns the underlying pair.
    #[must_use]
    pub fn into_inner(self) -> Protocol {
        self.protocol
    }
}

impl Deref for ClientProtocol {
    type Target = Protocol;

    fn deref(&self) -> &Protocol {
        &self.protocol
    }
}

impl DerefMut for ClientProtocol {
    fn deref_mut(&mut self) -> &mut Protocol {
        &mut self.protocol
    }
}

/// Server role: receive a request, then answer it.
///
/// Every outcome goes out through the normal response path: failures are
/// written as failure responses, never as a different wire format.
#[derive(Debug, Default)]
pub struct ServerProtocol {
    protocol: Protocol,
}

impl ServerProtocol {
    /// Creates a server call with a fresh cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server call observing `cancellation`.
    #[must_use]
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            protocol: Protocol::with_cancellation(cancellation),
        }
    }

    /// Installs the request reader and the response writer.
    #[must_use]
    pub fn with_io(mut self, reader: impl Handler<Request>, writer: impl Handler<Response>) -> Self {
        self.protocol.request.set_reader(reader);
        self.protocol.response.set_writer(writer);
        self
    }

    /// Runs the request chain, ending in the reader, then decodes and validates.
    pub async fn read_request<T: DeserializeOwned + Validate>(&mut self) -> PipelineResult<T> {
        self.protocol.run_request(IoDirection::Read).await?;
        self.protocol.decode_request()
    }

    /// Serializes `data` and runs the response chain, ending in the writer.
    ///
    /// Errors are returned as-is; use [`response_success`](Self::response_success)
    /// to get the failure fallback.
    pub async fn write_response<T: Serialize + ?Sized>(&mut self, data: &T) -> PipelineResult<()> {
        let response = &mut self.protocol.response;
        response.set_payload_from(data)?;
        response.clear_raw();
        self.protocol.run_response(IoDirection::Write).await
    }

    /// Writes a success response, falling back to a failure response once.
    pub async fn response_success<T: Serialize + ?Sized>(&mut self, data: &T) -> PipelineResult<()> {
        match self.write_response(data).await {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::warn!(
                    request_id = %self.protocol.request.request_id(),
                    error = %error,
                    "Writing success response failed, reporting failure instead"
                );
                self.response_fail(error).await
            }
        }
    }

    /// Writes a failure response reporting `error`.
    ///
    /// If writing the failure response itself fails, the call cannot be
    /// recovered: the failure is logged and returned as
    /// [`PipelineError::FatalResponse`]. This never recurses.
    pub async fn response_fail(&mut self, error: PipelineError) -> PipelineResult<()> {
        let response = &mut self.protocol.response;
        response.set_error(error);
        response.set_payload(None::<Value>);
        response.clear_raw();

        let Err(write_error) = self.protocol.run_response(IoDirection::Write).await else {
            return Ok(());
        };

        let original = self
            .protocol
            .response
            .take_error()
            .unwrap_or_else(|| PipelineError::internal("reported error was removed by a middleware"));
        tracing::error!(
            request_id = %self.protocol.request.request_id(),
            error = %original,
            write_error = %write_error,
            "Failed to write failure response"
        );
        Err(PipelineError::FatalResponse {
            original: Box::new(original),
            write_error: Box::new(write_error),
        })
    }

    /// Overrides the business code written into the envelope.
    pub fn set_business_code(&mut self, code: impl Into<String>) {
        self.protocol
            .response
            .set_metadata(keys::BUSINESS_CODE, code.into());
    }

    /// Overrides the HTTP status written by the response writer.
    pub fn set_http_status(&mut self, status: StatusCode) {
        self.protocol
            .response
            .set_metadata(keys::HTTP_STATUS, status.as_u16());
    }

    /// Appends a response header.
    pub fn set_response_header(&mut self, name: &str, value: &str) -> PipelineResult<()> {
        self.protocol.response.set_header(name, value)
    }

    /// Consumes the role and returns the underlying pair.
    #[must_use]
    pub fn into_inner(self) -> Protocol {
        self.protocol
    }
}

impl Deref for ServerProtocol {
    type Target = Protocol;

    fn deref(&self) -> &Protocol {
        &self.protocol
    }
}

impl DerefMut for ServerProtocol {
    fn deref_mut(&mut self) -> &mut Protocol {
        &mut self.protocol
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::message::Message;
    use serde_json::json;

    #[tokio::test]
    async fn test_peer_is_lent_during_run_and_returned() {
        let mut protocol = ClientProtocol::new(Method::GET, "http://svc.local/").with_io(
            handler_fn("reader", |_message: &mut Message<Response>| {
                Box::pin(async move { Ok(()) })
            }),
            handler_fn("writer", |message: &mut Message<Request>| {
                Box::pin(async move {
                    let response = message
                        .response_mut()
                        .ok_or_else(|| PipelineError::internal("response not linked"))?;
                    response.set_metadata("seen_by_writer", true);
                    Ok(())
                })
            }),
        );

        protocol.write_request(&json!({})).await.unwrap();
        assert!(protocol.request().response().is_none());
        assert_eq!(
            protocol.response().metadata().get("seen_by_writer"),
            Some(&json!(true))
        );
    }

    #[tokio::test]
    async fn test_peer_returned_after_failure() {
        let mut protocol = ClientProtocol::new(Method::GET, "http://svc.local/").with_io(
            handler_fn("reader", |_message: &mut Message<Response>| {
                Box::pin(async move { Ok(()) })
            }),
            handler_fn("writer", |_message: &mut Message<Request>| {
                Box::pin(async move { Err(PipelineError::transport("refused")) })
            }),
        );
        protocol.response_mut().set_metadata("marker", 1);

        assert!(protocol.write_request(&json!({})).await.is_err());
        assert_eq!(protocol.response().metadata().get_u64("marker"), Some(1));
    }

    #[test]
    fn test_http_status_from_metadata() {
        let mut protocol = ClientProtocol::new(Method::GET, "http://svc.local/");
        assert_eq!(protocol.http_status(), None);
        protocol
            .response_mut()
            .set_metadata(keys::HTTP_STATUS, 503);
        assert_eq!(protocol.http_status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        protocol.response_mut().set_status(StatusCode::OK);
        assert_eq!(protocol.http_status(), Some(StatusCode::OK));
    }

    #[test]
    fn test_shared_cancellation() {
        let protocol = ServerProtocol::new();
        protocol.cancel();
        assert!(protocol.request().is_cancelled());
        assert!(protocol.response().is_cancelled());
    }

    #[test]
    fn test_server_overrides_land_in_metadata() {
        let mut protocol = ServerProtocol::new();
        protocol.set_business_code("40401");
        protocol.set_http_status(StatusCode::NOT_FOUND);
        assert_eq!(protocol.response().business_code(), "40401");
        assert_eq!(
            protocol.response().metadata().get_u64(keys::HTTP_STATUS),
            Some(404)
        );
    }
}
