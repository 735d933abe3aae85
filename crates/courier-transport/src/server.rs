//! Server adapter for `http` requests.
//!
//! [`ServerExchange`] holds one buffered inbound request and collects the
//! outbound response; [`ServerExchange::protocol`] returns a
//! [`ServerProtocol`] wired to it. [`serve`] wraps the whole exchange around a
//! typed handler function, so any HTTP server that hands out
//! `http::Request`s can host a Courier pipeline:
//!
//! ```text
//! http::Request → read_request::<Req> → handler(Req) → response_success / response_fail
//!                                                                  ↓
//!                                       http::Response ← ServerExchange
//! ```
//!
//! ## Request decoding
//!
//! URL query parameters (first value per key) become a JSON object of
//! strings. A JSON object body is merged over it; body fields win. Any other
//! JSON body replaces the query object. With `force_json` off, bodies whose
//! content type is not JSON are ignored instead of failing to decode.
//!
//! ## Response encoding
//!
//! The status is `200 OK` unless the `http_status` metadata overrides it, so
//! business failures travel inside the envelope. The request id is echoed in
//! `x-request-id`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use courier_core::metadata::keys;
use courier_core::{
    buffer_request, handler_fn, CancellationToken, Handler, PipelineError, PipelineResult,
    RequestMessage, ResponseMessage, ServerProtocol, Validate, REQUEST_ID_HEADER,
};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Options for decoding inbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    /// Decode the body as JSON regardless of its content type.
    pub force_json: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { force_json: true }
    }
}

type Inbound = Arc<Mutex<Option<PipelineResult<http::Request<Bytes>>>>>;
type Outbound = Arc<Mutex<Option<http::Response<Bytes>>>>;

/// One inbound request and the response written for it.
#[derive(Debug, Clone, Default)]
pub struct ServerExchange {
    inbound: Inbound,
    outbound: Outbound,
    options: ServerOptions,
}

impl ServerExchange {
    /// Creates an exchange around an already buffered request.
    #[must_use]
    pub fn new(request: http::Request<Bytes>, options: ServerOptions) -> Self {
        Self {
            inbound: Arc::new(Mutex::new(Some(Ok(request)))),
            outbound: Outbound::default(),
            options,
        }
    }

    /// Buffers `request` and creates an exchange around it.
    ///
    /// A body that cannot be read is reported when the request is read, so
    /// it still produces a failure envelope.
    pub async fn buffer<B>(request: http::Request<B>, options: ServerOptions) -> Self
    where
        B: BodyExt,
        B::Error: fmt::Display,
    {
        Self {
            inbound: Arc::new(Mutex::new(Some(buffer_request(request).await))),
            outbound: Outbound::default(),
            options,
        }
    }

    /// Creates a server protocol whose I/O hooks use this exchange.
    #[must_use]
    pub fn protocol(&self) -> ServerProtocol {
        self.protocol_with_cancellation(CancellationToken::new())
    }

    /// Like [`protocol`](Self::protocol), aborting when `cancellation` fires.
    #[must_use]
    pub fn protocol_with_cancellation(&self, cancellation: CancellationToken) -> ServerProtocol {
        ServerProtocol::with_cancellation(cancellation).with_io(
            reader(Arc::clone(&self.inbound), self.options),
            writer(Arc::clone(&self.outbound)),
        )
    }

    /// Takes the written response, if the writer ran.
    pub fn take_response(&self) -> Option<http::Response<Bytes>> {
        self.outbound.lock().take()
    }
}

fn is_json(request: &http::Request<Bytes>) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("json"))
}

/// Builds the inbound payload from the query string and the body.
fn decode_payload(request: &http::Request<Bytes>, options: ServerOptions) -> PipelineResult<Option<Value>> {
    let mut query = Map::new();
    if let Some(raw_query) = request.uri().query() {
        for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            query
                .entry(key.into_owned())
                .or_insert_with(|| Value::String(value.into_owned()));
        }
    }

    let body = request.body();
    let decode_body = !body.is_empty() && (options.force_json || is_json(request));
    let body = if decode_body {
        Some(serde_json::from_slice::<Value>(body).map_err(PipelineError::decode)?)
    } else {
        None
    };

    Ok(match body {
        Some(Value::Object(fields)) => {
            query.extend(fields);
            Some(Value::Object(query))
        }
        Some(other) => Some(other),
        None if query.is_empty() => None,
        None => Some(Value::Object(query)),
    })
}

fn reader(inbound: Inbound, options: ServerOptions) -> impl Handler<courier_core::Request> {
    handler_fn("http_reader", move |message: &mut RequestMessage| {
        let inbound = Arc::clone(&inbound);
        Box::pin(async move {
            let request = inbound
                .lock()
                .take()
                .ok_or_else(|| PipelineError::transport("request was already read"))??;

            message.set_method(request.method().clone());
            message.set_url(request.uri().to_string());
            *message.headers_mut() = request.headers().clone();
            message.set_duplicate_request(&request);
            message.set_raw(request.body().clone());
            message.set_payload(decode_payload(&request, options)?);
            message.next().await
        })
    })
}

fn writer(outbound: Outbound) -> impl Handler<courier_core::Response> {
    handler_fn("http_writer", move |message: &mut ResponseMessage| {
        let outbound = Arc::clone(&outbound);
        Box::pin(async move {
            let body = match message.raw() {
                Some(raw) => raw.clone(),
                None => message.encode_payload()?,
            };
            let status = message
                .metadata()
                .get_u64(keys::HTTP_STATUS)
                .and_then(|code| u16::try_from(code).ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);
            let request_id = message.request_id();

            let mut response = http::Response::new(body.clone());
            *response.status_mut() = status;
            *response.headers_mut() = message.headers().clone();
            let headers = response.headers_mut();
            if !body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            let request_id = HeaderValue::from_str(&request_id)
                .map_err(|e| PipelineError::invalid_header(REQUEST_ID_HEADER, e))?;
            headers.insert(REQUEST_ID_HEADER, request_id);

            message.set_status(status);
            message.set_duplicate_response(&response, Some(body));
            *outbound.lock() = Some(response);
            Ok(())
        })
    })
}

fn internal_server_error() -> http::Response<Full<Bytes>> {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Runs one inbound request through a server pipeline and `handler`.
///
/// `setup` registers middlewares on the fresh [`ServerProtocol`]. A request
/// that fails to read, decode or validate never reaches `handler`; it is
/// answered with a failure envelope, as is an error from `handler`. Only a
/// failure to write the failure envelope yields a bare `500`.
pub async fn serve<B, Req, Resp, S, F, Fut>(
    request: http::Request<B>,
    options: ServerOptions,
    setup: S,
    handler: F,
) -> http::Response<Full<Bytes>>
where
    B: BodyExt,
    B::Error: fmt::Display,
    Req: DeserializeOwned + Validate,
    Resp: Serialize,
    S: FnOnce(&mut ServerProtocol),
    F: FnOnce(Req) -> Fut,
    Fut: Future<Output = PipelineResult<Resp>>,
{
    let exchange = ServerExchange::buffer(request, options).await;
    let mut server = exchange.protocol();
    setup(&mut server);

    let outcome = match server.read_request::<Req>().await {
        Ok(request) => handler(request).await,
        Err(error) => Err(error),
    };
    let written = match outcome {
        Ok(data) => server.response_success(&data).await,
        Err(error) => server.response_fail(error).await,
    };

    if let Err(error) = written {
        tracing::error!(
            request_id = %server.request_mut().request_id(),
            error = %error,
            "Aborting exchange without a response envelope"
        );
        return internal_server_error();
    }

    match exchange.take_response() {
        Some(response) => response.map(Full::new),
        None => {
            tracing::error!("Response pipeline completed without writing a response");
            internal_server_error()
        }
    }
}
