//! Request ID middleware.
//!
//! Makes sure both ends of an exchange agree on one correlation id, carried
//! in the `x-request-id` header.
//!
//! ## Behavior by direction
//!
//! | Message  | Direction | Action |
//! |----------|-----------|--------|
//! | request  | write     | Stamp `x-request-id` before sending (generating a UUID v7 if needed) |
//! | request  | read      | Pin the id received from the peer once the reader ran |
//! | response | write     | Echo the request's id on the response |
//! | response | read      | Pin the id from the linked request or the captured response |

use courier_core::{
    BoxFuture, Handler, IoDirection, PipelineResult, Request, RequestMessage, Response,
    ResponseMessage, REQUEST_ID_HEADER,
};

/// Middleware that stamps and propagates request ids.
///
/// The same value can be registered on request and response chains; it
/// implements [`Handler`] for both roles.
///
/// # Example
///
/// ```
/// use courier_core::{ClientProtocol, Middleware};
/// use courier_middleware::stages::RequestIdMiddleware;
/// use http::Method;
///
/// let mut client = ClientProtocol::new(Method::GET, "http://example.test/");
/// client.add_request_middleware(Middleware::new(RequestIdMiddleware::new()));
/// client.add_response_middleware(Middleware::new(RequestIdMiddleware::new()));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdMiddleware {
    _private: (),
}

impl RequestIdMiddleware {
    /// Creates a new request id middleware.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Handler<Request> for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn handle<'a>(&'a self, message: &'a mut RequestMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            if message.direction() == Some(IoDirection::Write) {
                let request_id = message.request_id();
                if message.header(REQUEST_ID_HEADER).is_none() {
                    message.set_header(REQUEST_ID_HEADER, &request_id)?;
                }
                return message.next().await;
            }

            message.next().await?;
            let request_id = message.request_id();
            tracing::trace!(request_id = %request_id, "Request id resolved");
            Ok(())
        })
    }
}

impl Handler<Response> for RequestIdMiddleware {
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn handle<'a>(&'a self, message: &'a mut ResponseMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            if message.direction() == Some(IoDirection::Write) {
                let request_id = message.request_id();
                if message.header(REQUEST_ID_HEADER).is_none() {
                    message.set_header(REQUEST_ID_HEADER, &request_id)?;
                }
                return message.next().await;
            }

            message.next().await?;
            message.request_id();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::{handler_fn, Middleware, ServerProtocol};
    use serde_json::{json, Value};

    fn sink() -> impl Handler<Request> {
        handler_fn("sink", |message: &mut RequestMessage| {
            Box::pin(async move {
                message.encode_payload()?;
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_outgoing_request_gets_generated_id() {
        let mut message = RequestMessage::new();
        message.add(Middleware::new(RequestIdMiddleware::new()));
        message.set_writer(sink());

        message.run(IoDirection::Write).await.unwrap();

        let header = message.header(REQUEST_ID_HEADER).unwrap().to_string();
        assert_eq!(header.len(), 36);
        assert_eq!(message.request_id(), header);
    }

    #[tokio::test]
    async fn test_outgoing_request_keeps_explicit_id() {
        let mut message = RequestMessage::new();
        message.set_request_id("req-123");
        message.add(Middleware::new(RequestIdMiddleware::new()));
        message.set_writer(sink());

        message.run(IoDirection::Write).await.unwrap();
        assert_eq!(message.header(REQUEST_ID_HEADER), Some("req-123"));
    }

    #[tokio::test]
    async fn test_incoming_request_keeps_peer_id() {
        let mut message = RequestMessage::new();
        message.add(Middleware::new(RequestIdMiddleware::new()));
        message.set_reader(handler_fn("reader", |message: &mut RequestMessage| {
            Box::pin(async move {
                let request = http::Request::builder()
                    .uri("/items")
                    .header(REQUEST_ID_HEADER, "from-peer")
                    .body(Vec::<u8>::new())
                    .unwrap();
                message.set_duplicate_request(&request);
                Ok(())
            })
        }));

        message.run(IoDirection::Read).await.unwrap();
        assert_eq!(message.request_id(), "from-peer");
        assert_eq!(message.header(REQUEST_ID_HEADER), None);
    }

    #[tokio::test]
    async fn test_server_response_echoes_request_id() {
        let mut server = ServerProtocol::new().with_io(
            handler_fn("reader", |message: &mut RequestMessage| {
                Box::pin(async move {
                    message.set_request_id("abc");
                    message.set_payload(json!({}));
                    Ok(())
                })
            }),
            handler_fn("writer", |message: &mut ResponseMessage| {
                Box::pin(async move {
                    message.encode_payload()?;
                    Ok(())
                })
            }),
        );
        server.add_response_middleware(Middleware::new(RequestIdMiddleware::new()));

        let _: Value = server.read_request().await.unwrap();
        server.write_response(&json!({"ok": true})).await.unwrap();
        assert_eq!(server.response().header(REQUEST_ID_HEADER), Some("abc"));
    }
}
