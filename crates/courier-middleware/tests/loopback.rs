//! Client and server pipelines talking over an in-memory wire.
//!
//! The client signs and sends, the server verifies and answers inside an
//! envelope, and the client unwraps it again, all with the stock middleware
//! sets.

use bytes::Bytes;
use courier_core::metadata::keys;
use courier_core::{
    handler_fn, ClientProtocol, ErrorCategory, Handler, Middleware, PipelineError, Request,
    RequestMessage, Response, ResponseMessage, ServerProtocol, REQUEST_ID_HEADER,
};
use courier_middleware::stages::signature::sign;
use courier_middleware::{
    client_middlewares, server_middlewares, CallerCredential, CallerRegistry,
};
use http::{HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

type RequestWire = Arc<Mutex<Option<http::Request<Bytes>>>>;
type ResponseWire = Arc<Mutex<Option<http::Response<Bytes>>>>;

#[derive(Clone, Default)]
struct Loopback {
    requests: RequestWire,
    responses: ResponseWire,
}

fn outgoing_body<R: courier_core::Role>(
    message: &mut courier_core::Message<R>,
) -> Result<Bytes, PipelineError> {
    match message.raw() {
        Some(raw) => Ok(raw.clone()),
        None => message.encode_payload(),
    }
}

impl Loopback {
    fn client_writer(&self) -> impl Handler<Request> {
        let wire = Arc::clone(&self.requests);
        handler_fn("client_writer", move |message: &mut RequestMessage| {
            let wire = Arc::clone(&wire);
            Box::pin(async move {
                let body = outgoing_body(message)?;
                let mut request = http::Request::new(body);
                *request.method_mut() = message.method().clone();
                *request.uri_mut() = message
                    .url()
                    .parse()
                    .map_err(|e| PipelineError::transport_source("invalid url", e))?;
                *request.headers_mut() = message.headers().clone();
                message.set_duplicate_request(&request);
                *wire.lock() = Some(request);
                Ok(())
            })
        })
    }

    fn client_reader(&self) -> impl Handler<Response> {
        let wire = Arc::clone(&self.responses);
        handler_fn("client_reader", move |message: &mut ResponseMessage| {
            let wire = Arc::clone(&wire);
            Box::pin(async move {
                let response = wire
                    .lock()
                    .take()
                    .ok_or_else(|| PipelineError::transport("no response on the wire"))?;
                let body = response.body().clone();
                message.set_status(response.status());
                message.set_metadata(keys::HTTP_STATUS, response.status().as_u16());
                message.set_duplicate_response(&response, Some(body.clone()));
                if !body.is_empty() {
                    let payload: Value =
                        serde_json::from_slice(&body).map_err(PipelineError::decode)?;
                    message.set_payload(payload);
                }
                message.next().await
            })
        })
    }

    fn server_reader(&self) -> impl Handler<Request> {
        let wire = Arc::clone(&self.requests);
        handler_fn("server_reader", move |message: &mut RequestMessage| {
            let wire = Arc::clone(&wire);
            Box::pin(async move {
                let request = wire
                    .lock()
                    .take()
                    .ok_or_else(|| PipelineError::transport("no request on the wire"))?;
                message.set_method(request.method().clone());
                message.set_url(request.uri().to_string());
                *message.headers_mut() = request.headers().clone();
                message.set_duplicate_request(&request);
                message.set_raw(request.body().clone());
                if !request.body().is_empty() {
                    let payload: Value =
                        serde_json::from_slice(request.body()).map_err(PipelineError::decode)?;
                    message.set_payload(payload);
                }
                message.next().await
            })
        })
    }

    fn server_writer(&self) -> impl Handler<Response> {
        let wire = Arc::clone(&self.responses);
        handler_fn("server_writer", move |message: &mut ResponseMessage| {
            let wire = Arc::clone(&wire);
            Box::pin(async move {
                let body = outgoing_body(message)?;
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
                if let Ok(value) = HeaderValue::from_str(&request_id) {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                message.set_status(status);
                message.set_duplicate_response(&response, Some(body));
                *wire.lock() = Some(response);
                Ok(())
            })
        })
    }

    fn client(&self, credential: Option<CallerCredential>) -> ClientProtocol {
        let mut client = ClientProtocol::new(Method::POST, "http://billing.internal/charge")
            .with_io(self.client_reader(), self.client_writer());
        let (request, response) = client_middlewares(credential);
        for middleware in request {
            client.add_request_middleware(middleware);
        }
        for middleware in response {
            client.add_response_middleware(middleware);
        }
        client
    }

    fn server(&self, registry: Option<CallerRegistry>) -> ServerProtocol {
        let mut server = ServerProtocol::new().with_io(self.server_reader(), self.server_writer());
        let (request, response) = server_middlewares(registry.map(Arc::new));
        for middleware in request {
            server.add_request_middleware(middleware);
        }
        for middleware in response {
            server.add_response_middleware(middleware);
        }
        server
    }

    fn sent_request(&self) -> http::Request<Bytes> {
        self.requests.lock().clone().expect("a request was sent")
    }
}

fn registry() -> CallerRegistry {
    CallerRegistry::new().with_caller("web", "s3cret")
}

#[tokio::test]
async fn signed_request_carries_md5_of_body_and_secret() {
    let wire = Loopback::default();
    let mut client = wire.client(Some(CallerCredential::new("web", "s3cret")));

    client.write_request(&json!({"x": 1})).await.unwrap();

    let sent = wire.sent_request();
    assert_eq!(&sent.body()[..], br#"{"x":1}"#);
    let expected = format!("{:x}", md5::compute(br#"{"x":1}_s3cret"#));
    assert_eq!(sent.headers()["x-signature"], expected.as_str());
    assert_eq!(sent.headers()["x-caller-id"], "web");
    assert!(sent.headers().contains_key(REQUEST_ID_HEADER));
}

#[tokio::test]
async fn signed_exchange_round_trips_through_envelope() {
    let wire = Loopback::default();
    let mut client = wire.client(Some(CallerCredential::new("web", "s3cret")));
    let mut server = wire.server(Some(registry()));

    client.write_request(&json!({"amount": 10})).await.unwrap();
    let request_id = wire.sent_request().headers()[REQUEST_ID_HEADER]
        .to_str()
        .unwrap()
        .to_string();

    let received: Value = server.read_request().await.unwrap();
    assert_eq!(received, json!({"amount": 10}));
    server.response_success(&json!({"charged": 10})).await.unwrap();

    let reply: Value = client.read_response().await.unwrap();
    assert_eq!(reply, json!({"charged": 10}));
    assert_eq!(client.http_status(), Some(StatusCode::OK));

    let echoed = client.response_mut().request_id();
    assert_eq!(echoed, request_id);
    let duplicate = client.response().duplicate_response().unwrap();
    assert_eq!(duplicate.header(REQUEST_ID_HEADER), Some(request_id.as_str()));
}

#[tokio::test]
async fn tampered_body_fails_verification() {
    let wire = Loopback::default();
    let mut client = wire.client(Some(CallerCredential::new("web", "s3cret")));
    let mut server = wire.server(Some(registry()));

    client.write_request(&json!({"amount": 10})).await.unwrap();
    {
        let mut slot = wire.requests.lock();
        let request = slot.as_mut().unwrap();
        *request.body_mut() = Bytes::from_static(br#"{"amount":1000}"#);
    }

    let error = server.read_request::<Value>().await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Authentication);
}

#[tokio::test]
async fn unknown_caller_is_rejected() {
    let wire = Loopback::default();
    let mut client = wire.client(Some(CallerCredential::new("mobile", "s3cret")));
    let mut server = wire.server(Some(registry()));

    client.write_request(&json!({})).await.unwrap();
    let error = server.read_request::<Value>().await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Authentication);
    assert!(error.to_string().contains("mobile"));
}

#[tokio::test]
async fn failure_is_reported_in_envelope_with_http_200() {
    let wire = Loopback::default();
    let mut client = wire.client(None);
    let mut server = wire.server(None);

    client.write_request(&json!({"id": 404})).await.unwrap();
    let _: Value = server.read_request().await.unwrap();
    server
        .response_fail(PipelineError::business("1", "not found"))
        .await
        .unwrap();

    {
        let slot = wire.responses.lock();
        let response = slot.as_ref().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            &response.body()[..],
            br#"{"code":"1","message":"not found","data":null}"#
        );
    }

    let error = client.read_response::<Value>().await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Business);
    assert_eq!(error.business_code(), "1");
    assert_eq!(error.business_message(), "not found");
}

#[tokio::test]
async fn signature_covers_bytes_after_every_payload_change() {
    let wire = Loopback::default();
    let mut client = wire.client(Some(CallerCredential::new("web", "s3cret")));
    // Registered last but ordered by stage: still runs before signing.
    client.add_request_middleware(Middleware::new(handler_fn(
        "stamp",
        |message: &mut RequestMessage| {
            Box::pin(async move {
                if let Some(Value::Object(map)) = message.payload_mut() {
                    map.insert("stamped".to_string(), json!(true));
                }
                message.next().await
            })
        },
    )));
    let mut server = wire.server(Some(registry()));

    client.write_request(&json!({"x": 1})).await.unwrap();
    let sent = wire.sent_request();
    let signature = sent.headers()["x-signature"].to_str().unwrap().to_string();
    assert_eq!(signature, sign(sent.body(), "s3cret"));
    assert_eq!(&sent.body()[..], br#"{"stamped":true,"x":1}"#);

    let received: Value = server.read_request().await.unwrap();
    assert_eq!(received, json!({"x": 1, "stamped": true}));
}

#[tokio::test]
async fn server_http_status_override_reaches_client() {
    let wire = Loopback::default();
    let mut client = wire.client(None);
    let mut server = wire.server(None);

    client.write_request(&json!({})).await.unwrap();
    let _: Value = server.read_request().await.unwrap();
    server.set_http_status(StatusCode::ACCEPTED);
    server.response_success(&json!("queued")).await.unwrap();

    let reply: Value = client.read_response().await.unwrap();
    assert_eq!(reply, json!("queued"));
    assert_eq!(client.http_status(), Some(StatusCode::ACCEPTED));
}

#[tokio::test]
async fn retried_write_sends_and_signs_the_new_payload() {
    let wire = Loopback::default();
    let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let delegate = Arc::new(wire.client_writer());
    let writer = {
        let attempts = Arc::clone(&attempts);
        handler_fn("flaky_writer", move |message: &mut RequestMessage| {
            let attempts = Arc::clone(&attempts);
            let delegate = Arc::clone(&delegate);
            Box::pin(async move {
                if attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    return Err(PipelineError::transport("connection reset"));
                }
                delegate.handle(message).await
            })
        })
    };
    let mut client = ClientProtocol::new(Method::POST, "http://billing.internal/charge")
        .with_io(wire.client_reader(), writer);
    let (request, _) = client_middlewares(Some(CallerCredential::new("web", "s3cret")));
    for middleware in request {
        client.add_request_middleware(middleware);
    }

    let error = client.write_request(&json!({"x": 1})).await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::Transport);
    client.write_request(&json!({"x": 2})).await.unwrap();

    let sent = wire.sent_request();
    assert_eq!(&sent.body()[..], br#"{"x":2}"#);
    let signatures: Vec<_> = sent.headers().get_all("x-signature").iter().collect();
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0], sign(br#"{"x":2}"#, "s3cret").as_str());
    assert_eq!(sent.headers().get_all("x-caller-id").iter().count(), 1);
}
