//! Messages: the unit of pipeline state.
//!
//! A [`Message`] is one request or one response travelling through its own
//! middleware chain. Request and response share a single concrete type; the
//! role-specific data is the type parameter:
//!
//! | Alias | Role data |
//! |---|---|
//! | [`RequestMessage`] | method, URL, duplicate request, link to the response |
//! | [`ResponseMessage`] | status, error being reported, duplicate response, link to the request |
//!
//! Everything else (headers, payload, raw bytes, metadata, the chain and its
//! I/O hooks) is common.
//!
//! # Payload and raw bytes
//!
//! The payload is the structured value (`serde_json::Value`) the caller wants
//! populated or serialized. The raw bytes are the wire form and, once set,
//! the single source of truth. Turning the payload into raw bytes is the job
//! of a middleware or an I/O hook ([`Message::encode_payload`]), never of the
//! message itself.
//!
//! # Single use
//!
//! A message runs its pipeline once. After a successful run every further
//! run fails with [`PipelineError::MessageReused`]; a failed run may be
//! retried.

use crate::chain::Chain;
use crate::duplicate::{DuplicateRequest, DuplicateResponse};
use crate::envelope::{CODE_SUCCESS, MESSAGE_SUCCESS};
use crate::error::{PipelineError, PipelineResult};
use crate::handler::{BoxFuture, Handler, Middleware};
use crate::metadata::{keys, Metadata};
use crate::stage::IoDirection;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Correlation header propagated between client and server.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Which side of an exchange a message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// An outgoing (client) or incoming (server) request.
    Request,
    /// An incoming (client) or outgoing (server) response.
    Response,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Response => "response",
        })
    }
}

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Request {}
    impl Sealed for super::Response {}
}

/// Role-specific data carried by a [`Message`].
///
/// Implemented by [`Request`] and [`Response`] only.
pub trait Role: sealed::Sealed + Default + fmt::Debug + Send + Sync + 'static {
    /// The kind of message this role describes.
    const KIND: MessageKind;
}

/// Request-only message data.
#[derive(Default)]
pub struct Request {
    method: Method,
    url: String,
    duplicate: Option<DuplicateRequest>,
    response: Option<Box<Message<Response>>>,
}

impl Role for Request {
    const KIND: MessageKind = MessageKind::Request;
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("duplicate", &self.duplicate.is_some())
            .field("linked_response", &self.response.is_some())
            .finish()
    }
}

/// Response-only message data.
#[derive(Default)]
pub struct Response {
    status: Option<StatusCode>,
    error: Option<PipelineError>,
    duplicate: Option<DuplicateResponse>,
    request: Option<Box<Message<Request>>>,
}

impl Role for Response {
    const KIND: MessageKind = MessageKind::Response;
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("error", &self.error.as_ref().map(ToString::to_string))
            .field("duplicate", &self.duplicate.is_some())
            .field("linked_request", &self.request.is_some())
            .finish()
    }
}

/// A request message.
pub type RequestMessage = Message<Request>;

/// A response message.
pub type ResponseMessage = Message<Response>;

/// One request or response flowing through a middleware chain.
pub struct Message<R: Role> {
    headers: HeaderMap,
    payload: Option<Value>,
    raw: Option<Bytes>,
    metadata: Metadata,
    request_id: Option<String>,
    chain: Chain<R>,
    reader: Option<Arc<dyn Handler<R>>>,
    writer: Option<Arc<dyn Handler<R>>>,
    cancellation: CancellationToken,
    direction: Option<IoDirection>,
    completed: bool,
    role: R,
}

impl<R: Role> Default for Message<R> {
    fn default() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }
}

impl<R: Role> Message<R> {
    /// Creates an empty message with its own cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty message observing `cancellation`.
    #[must_use]
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            headers: HeaderMap::new(),
            payload: None,
            raw: None,
            metadata: Metadata::new(),
            request_id: None,
            chain: Chain::new(),
            reader: None,
            writer: None,
            cancellation,
            direction: None,
            completed: false,
            role: R::default(),
        }
    }

    /// Returns whether this is a request or a response.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        R::KIND
    }

    // Headers

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Appends a header value. Existing values under the same name are kept.
    pub fn set_header(&mut self, name: &str, value: &str) -> PipelineResult<()> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PipelineError::invalid_header(name, e))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| PipelineError::invalid_header(name, e))?;
        self.headers.append(header_name, header_value);
        Ok(())
    }

    /// Sets a header, replacing every existing value under the same name.
    pub fn insert_header(&mut self, name: &str, value: &str) -> PipelineResult<()> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PipelineError::invalid_header(name, e))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| PipelineError::invalid_header(name, e))?;
        self.headers.insert(header_name, header_value);
        Ok(())
    }

    /// Returns the first value of `name` (case-insensitive), if valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns every value of `name`, in insertion order.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    // Payload and raw bytes

    /// Returns the structured payload.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Returns the structured payload for modification.
    pub fn payload_mut(&mut self) -> Option<&mut Value> {
        self.payload.as_mut()
    }

    /// Replaces the structured payload.
    pub fn set_payload(&mut self, payload: impl Into<Option<Value>>) {
        self.payload = payload.into();
    }

    /// Removes and returns the structured payload.
    pub fn take_payload(&mut self) -> Option<Value> {
        self.payload.take()
    }

    /// Serializes `value` into the structured payload.
    pub fn set_payload_from<T: Serialize + ?Sized>(&mut self, value: &T) -> PipelineResult<()> {
        self.payload = Some(serde_json::to_value(value).map_err(PipelineError::Encode)?);
        Ok(())
    }

    /// Deserializes the structured payload; an absent payload reads as `null`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> PipelineResult<T> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(PipelineError::decode)
    }

    /// Returns the raw wire bytes, if populated.
    #[must_use]
    pub const fn raw(&self) -> Option<&Bytes> {
        self.raw.as_ref()
    }

    /// Replaces the raw wire bytes.
    pub fn set_raw(&mut self, raw: impl Into<Bytes>) {
        self.raw = Some(raw.into());
    }

    /// Clears the raw wire bytes.
    pub fn clear_raw(&mut self) {
        self.raw = None;
    }

    /// Serializes the payload as JSON into the raw bytes and returns them.
    ///
    /// An absent payload encodes as an empty body.
    pub fn encode_payload(&mut self) -> PipelineResult<Bytes> {
        let raw = match &self.payload {
            Some(payload) => Bytes::from(serde_json::to_vec(payload).map_err(PipelineError::Encode)?),
            None => Bytes::new(),
        };
        self.raw = Some(raw.clone());
        Ok(raw)
    }

    // Metadata

    /// Returns the metadata store.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Returns the metadata store for modification.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Stores a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.set(key, value);
    }

    /// Returns a metadata value, or `default` when absent.
    #[must_use]
    pub fn get_metadata(&self, key: &str, default: impl Into<Value>) -> Value {
        self.metadata.get_or(key, default)
    }

    /// Sets the correlation id explicitly.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = Some(request_id.into());
    }

    // Chain

    /// Registers a middleware. `None` is skipped silently.
    pub fn add(&mut self, middleware: impl Into<Option<Middleware<R>>>) -> &mut Self {
        self.chain.add(middleware);
        self
    }

    /// Returns the middleware chain.
    #[must_use]
    pub const fn chain(&self) -> &Chain<R> {
        &self.chain
    }

    /// Installs the terminal hook that receives bytes off the wire.
    pub fn set_reader(&mut self, reader: impl Handler<R>) {
        self.reader = Some(Arc::new(reader));
    }

    /// Installs the terminal hook that puts bytes on the wire.
    pub fn set_writer(&mut self, writer: impl Handler<R>) {
        self.writer = Some(Arc::new(writer));
    }

    /// Installs an already shared I/O hook for `direction`.
    pub fn set_io(&mut self, direction: IoDirection, handler: Arc<dyn Handler<R>>) {
        match direction {
            IoDirection::Read => self.reader = Some(handler),
            IoDirection::Write => self.writer = Some(handler),
        }
    }

    // Cancellation

    /// Returns the cancellation token shared with the peer message.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Returns true if the call was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fails with [`PipelineError::Cancelled`] if the call was cancelled.
    pub fn ensure_not_cancelled(&self) -> PipelineResult<()> {
        if self.cancellation.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    // Engine

    /// Returns the direction of the current (or most recent) run.
    ///
    /// Handlers shared between roles use it to tell an outgoing message
    /// (`Write`) from an incoming one (`Read`).
    #[must_use]
    pub const fn direction(&self) -> Option<IoDirection> {
        self.direction
    }

    /// Returns true once a pipeline run completed successfully.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Runs the chain with the I/O hook installed for `direction`.
    ///
    /// The chain is planned first (sorted, exactly one I/O entry checked), so
    /// wiring errors surface before any handler executes.
    pub async fn run(&mut self, direction: IoDirection) -> PipelineResult<()> {
        if self.completed {
            return Err(PipelineError::MessageReused { kind: R::KIND });
        }

        self.direction = Some(direction);
        let hook = match direction {
            IoDirection::Read => self.reader.clone(),
            IoDirection::Write => self.writer.clone(),
        };
        let io = hook.map(|handler| Middleware::from_arc(direction.stage(), 0, handler));
        self.chain.prepare(io, direction)?;

        let result = self.next().await;
        if result.is_ok() {
            self.completed = true;
        }
        result
    }

    /// Continues the chain with the next handler.
    ///
    /// Past the last handler this is a no-op that succeeds. The first error
    /// returned by a handler propagates unchanged.
    pub fn next(&mut self) -> BoxFuture<'_, PipelineResult<()>> {
        Box::pin(async move {
            match self.chain.advance() {
                Some(handler) => handler.handle(self).await,
                None => Ok(()),
            }
        })
    }
}

impl<R: Role> fmt::Debug for Message<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &R::KIND)
            .field("headers", &self.headers)
            .field("payload", &self.payload)
            .field("raw_len", &self.raw.as_ref().map(Bytes::len))
            .field("metadata", &self.metadata)
            .field("request_id", &self.request_id)
            .field("chain", &self.chain)
            .field("direction", &self.direction)
            .field("completed", &self.completed)
            .field("role", &self.role)
            .finish()
    }
}

impl Message<Request> {
    /// Returns the HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.role.method
    }

    /// Sets the HTTP method.
    pub fn set_method(&mut self, method: Method) {
        self.role.method = method;
    }

    /// Returns the target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.role.url
    }

    /// Sets the target URL.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.role.url = url.into();
    }

    /// Captures a snapshot of the transport-level request.
    pub fn set_duplicate_request<B: AsRef<[u8]>>(&mut self, request: &http::Request<B>) {
        self.role.duplicate = Some(DuplicateRequest::from_request(request));
    }

    /// Stores an already captured snapshot.
    pub fn store_duplicate_request(&mut self, duplicate: DuplicateRequest) {
        self.role.duplicate = Some(duplicate);
    }

    /// Returns an independent copy of the captured request, if any.
    #[must_use]
    pub fn duplicate_request(&self) -> Option<DuplicateRequest> {
        self.role.duplicate.clone()
    }

    /// Returns a curl command reproducing the captured request.
    #[must_use]
    pub fn curl_command(&self) -> Option<String> {
        self.role.duplicate.as_ref().map(DuplicateRequest::curl_command)
    }

    /// Returns the linked response while one of the two messages is running.
    #[must_use]
    pub fn response(&self) -> Option<&Message<Response>> {
        self.role.response.as_deref()
    }

    /// Returns the linked response for modification.
    pub fn response_mut(&mut self) -> Option<&mut Message<Response>> {
        self.role.response.as_deref_mut()
    }

    /// Returns the correlation id, deriving it on first use.
    ///
    /// Resolution order: explicit id, the captured request's
    /// `x-request-id`, this message's own `x-request-id`, and finally a
    /// freshly generated id that is also recorded on the captured request.
    pub fn request_id(&mut self) -> String {
        if let Some(id) = &self.request_id {
            return id.clone();
        }

        let found = self
            .role
            .duplicate
            .as_ref()
            .and_then(|duplicate| duplicate.header(REQUEST_ID_HEADER))
            .or_else(|| self.header(REQUEST_ID_HEADER))
            .filter(|id| !id.is_empty())
            .map(str::to_owned);

        let id = match found {
            Some(id) => id,
            None => {
                let id = Uuid::now_v7().to_string();
                if let (Some(duplicate), Ok(value)) =
                    (self.role.duplicate.as_mut(), HeaderValue::from_str(&id))
                {
                    duplicate.headers_mut().append(REQUEST_ID_HEADER, value);
                }
                id
            }
        };
        self.request_id = Some(id.clone());
        id
    }

    pub(crate) fn lend_response(&mut self, response: Message<Response>) {
        self.role.response = Some(Box::new(response));
    }

    pub(crate) fn reclaim_response(&mut self) -> Option<Message<Response>> {
        self.role.response.take().map(|response| *response)
    }
}

impl Message<Response> {
    /// Returns the HTTP status, once known.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        self.role.status
    }

    /// Sets the HTTP status.
    pub fn set_status(&mut self, status: StatusCode) {
        self.role.status = Some(status);
    }

    /// Returns the error being reported, if this response carries a failure.
    #[must_use]
    pub const fn error(&self) -> Option<&PipelineError> {
        self.role.error.as_ref()
    }

    /// Records the error this response reports.
    pub fn set_error(&mut self, error: PipelineError) {
        self.role.error = Some(error);
    }

    /// Removes and returns the reported error.
    pub fn take_error(&mut self) -> Option<PipelineError> {
        self.role.error.take()
    }

    /// Returns the business code for this response.
    ///
    /// A `business_code` metadata override wins; otherwise the reported
    /// error decides, and no error means success.
    #[must_use]
    pub fn business_code(&self) -> String {
        if let Some(code) = self.metadata.get_string(keys::BUSINESS_CODE) {
            return code;
        }
        self.role
            .error
            .as_ref()
            .map_or(CODE_SUCCESS, PipelineError::business_code)
            .to_string()
    }

    /// Returns the business message for this response.
    #[must_use]
    pub fn business_message(&self) -> String {
        self.role
            .error
            .as_ref()
            .map_or_else(|| MESSAGE_SUCCESS.to_string(), PipelineError::business_message)
    }

    /// Captures a snapshot of the transport-level response.
    ///
    /// When `body` is given it also becomes this message's raw bytes;
    /// otherwise the current raw bytes are used. The linked request's
    /// snapshot, if any, is attached.
    pub fn set_duplicate_response<B>(&mut self, response: &http::Response<B>, body: Option<Bytes>) {
        if let Some(body) = body {
            self.raw = Some(body);
        }
        let body = self.raw.clone().unwrap_or_default();
        let request = self
            .role
            .request
            .as_ref()
            .and_then(|request| request.role.duplicate.clone());
        self.role.duplicate =
            Some(DuplicateResponse::from_response(response, body).with_request(request));
    }

    /// Stores an already captured snapshot.
    pub fn store_duplicate_response(&mut self, duplicate: DuplicateResponse) {
        self.role.duplicate = Some(duplicate);
    }

    /// Returns an independent copy of the captured response, if any.
    #[must_use]
    pub fn duplicate_response(&self) -> Option<DuplicateResponse> {
        self.role.duplicate.clone()
    }

    /// Returns the linked request while one of the two messages is running.
    #[must_use]
    pub fn request(&self) -> Option<&Message<Request>> {
        self.role.request.as_deref()
    }

    /// Returns the linked request for modification.
    pub fn request_mut(&mut self) -> Option<&mut Message<Request>> {
        self.role.request.as_deref_mut()
    }

    /// Returns the correlation id.
    ///
    /// Resolution order: explicit id, the linked request's id, the captured
    /// response's request headers then its own headers, and `"unknown"`.
    pub fn request_id(&mut self) -> String {
        if let Some(id) = &self.request_id {
            return id.clone();
        }
        if let Some(request) = self.role.request.as_deref_mut() {
            return request.request_id();
        }
        self.role
            .duplicate
            .as_ref()
            .and_then(|duplicate| {
                duplicate
                    .request()
                    .and_then(|request| request.header(REQUEST_ID_HEADER))
                    .or_else(|| duplicate.header(REQUEST_ID_HEADER))
            })
            .filter(|id| !id.is_empty())
            .map_or_else(|| "unknown".to_string(), str::to_owned)
    }

    pub(crate) fn lend_request(&mut self, request: Message<Request>) {
        self.role.request = Some(Box::new(request));
    }

    pub(crate) fn reclaim_request(&mut self) -> Option<Message<Request>> {
        self.role.request.take().map(|request| *request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use parking_lot::Mutex;
    use serde_json::json;

    type Visits = Arc<Mutex<Vec<&'static str>>>;

    fn recorder(name: &'static str, visits: &Visits) -> impl Handler<Request> {
        let visits = Arc::clone(visits);
        handler_fn(name, move |message: &mut RequestMessage| {
            let visits = Arc::clone(&visits);
            Box::pin(async move {
                visits.lock().push(name);
                message.next().await
            })
        })
    }

    fn terminal(name: &'static str, visits: &Visits) -> impl Handler<Request> {
        let visits = Arc::clone(visits);
        handler_fn(name, move |_message: &mut RequestMessage| {
            let visits = Arc::clone(&visits);
            Box::pin(async move {
                visits.lock().push(name);
                Ok(())
            })
        })
    }

    #[test]
    fn test_headers_append_case_insensitive() {
        let mut message = RequestMessage::new();
        message.set_header("X-Caller", "a").unwrap();
        message.set_header("x-caller", "b").unwrap();
        assert_eq!(message.header("X-CALLER"), Some("a"));
        assert_eq!(message.header_values("x-caller"), vec!["a", "b"]);
    }

    #[test]
    fn test_insert_header_replaces_all_values() {
        let mut message = RequestMessage::new();
        message.set_header("x-caller", "a").unwrap();
        message.set_header("x-caller", "b").unwrap();
        message.insert_header("X-Caller", "c").unwrap();
        assert_eq!(message.header_values("x-caller"), vec!["c"]);
    }

    #[test]
    fn test_invalid_header_rejected() {
        let mut message = RequestMessage::new();
        let err = message.set_header("bad header", "v").unwrap_err();
        assert!(err.is_configuration());
        let err = message.set_header("x-ok", "line\nbreak").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidHeader { .. }));
    }

    #[test]
    fn test_metadata_defaults_without_initialization() {
        let message = ResponseMessage::new();
        assert_eq!(message.get_metadata(keys::HTTP_STATUS, 200), json!(200));
        assert_eq!(message.business_code(), CODE_SUCCESS);
        assert_eq!(message.business_message(), MESSAGE_SUCCESS);
    }

    #[test]
    fn test_business_code_override_and_error() {
        let mut message = ResponseMessage::new();
        message.set_error(PipelineError::internal("not found"));
        assert_eq!(message.business_code(), "1");
        assert_eq!(message.business_message(), "not found");

        message.set_metadata(keys::BUSINESS_CODE, "40401");
        assert_eq!(message.business_code(), "40401");
    }

    #[test]
    fn test_encode_payload_is_explicit() {
        let mut message = RequestMessage::new();
        message.set_payload(json!({"x": 1}));
        assert!(message.raw().is_none());

        let raw = message.encode_payload().unwrap();
        assert_eq!(&raw[..], br#"{"x":1}"#);
        assert_eq!(message.raw(), Some(&raw));

        message.set_payload(None::<Value>);
        assert!(message.encode_payload().unwrap().is_empty());
    }

    #[test]
    fn test_payload_as_reads_absent_as_null() {
        let message = RequestMessage::new();
        let value: Option<u32> = message.payload_as().unwrap();
        assert_eq!(value, None);
        assert!(message.payload_as::<u32>().is_err());
    }

    #[tokio::test]
    async fn test_run_visits_chain_then_io() {
        let visits = Visits::default();
        let mut message = RequestMessage::new();
        message.add(Middleware::new(recorder("a", &visits)));
        message.add(Middleware::before_send(0, recorder("sign", &visits)));
        message.add(Middleware::new(recorder("b", &visits)));
        message.set_writer(terminal("writer", &visits));

        message.run(IoDirection::Write).await.unwrap();

        assert_eq!(*visits.lock(), vec!["a", "b", "sign", "writer"]);
        assert!(message.is_completed());
    }

    #[tokio::test]
    async fn test_missing_io_fails_before_side_effects() {
        let visits = Visits::default();
        let mut message = RequestMessage::new();
        message.add(Middleware::new(recorder("a", &visits)));
        message.set_reader(terminal("reader", &visits));

        let err = message.run(IoDirection::Write).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingIoHandler {
                direction: IoDirection::Write,
                ..
            }
        ));
        assert!(visits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_completed_message_refuses_second_run() {
        let visits = Visits::default();
        let mut message = RequestMessage::new();
        message.set_writer(terminal("writer", &visits));

        message.run(IoDirection::Write).await.unwrap();
        let err = message.run(IoDirection::Write).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MessageReused {
                kind: MessageKind::Request
            }
        ));
        assert_eq!(visits.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_run_can_rerun() {
        let attempts = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&attempts);
        let mut message = RequestMessage::new();
        message.set_writer(handler_fn("flaky", move |_message: &mut RequestMessage| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let mut attempts = counter.lock();
                *attempts += 1;
                if *attempts == 1 {
                    Err(PipelineError::transport("connection reset"))
                } else {
                    Ok(())
                }
            })
        }));

        assert!(message.run(IoDirection::Write).await.is_err());
        assert!(!message.is_completed());
        message.run(IoDirection::Write).await.unwrap();
        assert_eq!(*attempts.lock(), 2);
    }

    #[tokio::test]
    async fn test_next_past_end_is_noop() {
        let mut message = RequestMessage::new();
        message.set_writer(handler_fn("writer", |message: &mut RequestMessage| {
            Box::pin(async move {
                message.next().await?;
                message.next().await
            })
        }));
        message.run(IoDirection::Write).await.unwrap();
    }

    #[test]
    fn test_request_id_prefers_duplicate_header() {
        let mut message = RequestMessage::new();
        message.set_header(REQUEST_ID_HEADER, "own").unwrap();
        let request = http::Request::get("http://svc.local/")
            .header(REQUEST_ID_HEADER, "from-wire")
            .body(Bytes::new())
            .unwrap();
        message.set_duplicate_request(&request);
        assert_eq!(message.request_id(), "from-wire");
    }

    #[test]
    fn test_request_id_synthesized_once_and_recorded() {
        let mut message = RequestMessage::new();
        let request = http::Request::get("http://svc.local/")
            .body(Bytes::new())
            .unwrap();
        message.set_duplicate_request(&request);

        let id = message.request_id();
        assert!(!id.is_empty());
        assert_eq!(message.request_id(), id);
        assert_eq!(
            message
                .duplicate_request()
                .and_then(|d| d.header(REQUEST_ID_HEADER).map(str::to_owned)),
            Some(id)
        );
    }

    #[test]
    fn test_response_request_id_fallbacks() {
        let mut response = ResponseMessage::new();
        assert_eq!(response.request_id(), "unknown");

        let http_response = http::Response::builder()
            .header(REQUEST_ID_HEADER, "resp-id")
            .body(())
            .unwrap();
        response.set_duplicate_response(&http_response, Some(Bytes::from_static(b"{}")));
        assert_eq!(response.request_id(), "resp-id");

        let mut request = RequestMessage::new();
        request.set_request_id("linked");
        response.lend_request(request);
        assert_eq!(response.request_id(), "linked");
    }

    #[test]
    fn test_duplicate_response_sets_raw_and_attaches_request() {
        let mut request = RequestMessage::new();
        let http_request = http::Request::post("http://svc.local/")
            .header(REQUEST_ID_HEADER, "r-1")
            .body(Bytes::from_static(b"in"))
            .unwrap();
        request.set_duplicate_request(&http_request);

        let mut response = ResponseMessage::new();
        response.lend_request(request);
        let http_response = http::Response::new(());
        response.set_duplicate_response(&http_response, Some(Bytes::from_static(b"out")));

        assert_eq!(response.raw().cloned(), Some(Bytes::from_static(b"out")));
        let duplicate = response.duplicate_response().unwrap();
        assert_eq!(&duplicate.body()[..], b"out");
        assert_eq!(
            duplicate.request().map(|r| r.body().clone()),
            Some(Bytes::from_static(b"in"))
        );

        // No explicit body: the current raw bytes are captured.
        response.set_raw(Bytes::from_static(b"again"));
        response.set_duplicate_response(&http_response, None);
        assert_eq!(response.duplicate_response().unwrap().body_text(), "again");
        assert!(response.reclaim_request().is_some());
    }

    #[test]
    fn test_cancellation_shared_token() {
        let token = CancellationToken::new();
        let message = RequestMessage::with_cancellation(token.clone());
        assert!(message.ensure_not_cancelled().is_ok());
        token.cancel();
        assert!(message.is_cancelled());
        assert!(matches!(
            message.ensure_not_cancelled(),
            Err(PipelineError::Cancelled)
        ));
    }
}
