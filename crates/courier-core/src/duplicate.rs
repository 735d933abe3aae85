//! Replay snapshots of requests and responses.
//!
//! An HTTP body is a single-read stream, yet logging, curl reproduction and
//! signature verification all need the exact wire bytes, often after the
//! payload decoder consumed them. A duplicate is an independently owned copy
//! of the transport-level message: headers deep-copied and the body fully
//! buffered. Messages hand out clones, so:
//!
//! - every fetched copy can be read from the start, any number of times;
//! - mutating one copy never affects the live message or another copy.

use crate::error::{PipelineError, PipelineResult};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use std::borrow::Cow;
use std::fmt;
use std::io::Cursor;

/// Snapshot of a transport-level request.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
}

impl DuplicateRequest {
    /// Captures a request whose body is already buffered.
    pub fn from_request<B: AsRef<[u8]>>(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
            body: Bytes::copy_from_slice(request.body().as_ref()),
        }
    }

    /// Captures request parts together with the body they carried.
    #[must_use]
    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            body,
        }
    }

    /// Returns the method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the URI.
    #[must_use]
    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the HTTP version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the first value of `name`, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the buffered body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Returns a fresh reader positioned at the start of the body.
    #[must_use]
    pub fn body_reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    /// Rebuilds a standalone `http::Request`.
    #[must_use]
    pub fn to_http(&self) -> http::Request<Bytes> {
        let mut request = http::Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers.clone();
        request
    }

    /// Renders a curl command line reproducing this request.
    ///
    /// Headers are emitted sorted by name so the output is stable.
    ///
    /// ```
    /// use courier_core::DuplicateRequest;
    ///
    /// let request = http::Request::post("http://api.local/users")
    ///     .header("content-type", "application/json")
    ///     .body(r#"{"name":"o'neil"}"#)
    ///     .unwrap();
    /// let curl = DuplicateRequest::from_request(&request).curl_command();
    /// assert_eq!(
    ///     curl,
    ///     r#"curl -X 'POST' -d '{"name":"o'\''neil"}' -H 'content-type: application/json' 'http://api.local/users'"#
    /// );
    /// ```
    #[must_use]
    pub fn curl_command(&self) -> String {
        let mut parts = vec!["curl".to_string(), "-X".to_string(), shell_quote(self.method.as_str())];

        if !self.body.is_empty() {
            parts.push("-d".to_string());
            parts.push(shell_quote(&self.body_text()));
        }

        let mut headers: Vec<(&str, String)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();
        headers.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in headers {
            parts.push("-H".to_string());
            parts.push(shell_quote(&format!("{name}: {value}")));
        }

        parts.push(shell_quote(&self.uri.to_string()));
        parts.join(" ")
    }
}

impl fmt::Display for DuplicateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.curl_command())
    }
}

/// Snapshot of a transport-level response, optionally with the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    request: Option<DuplicateRequest>,
}

impl DuplicateResponse {
    /// Captures a response together with its already-read body.
    ///
    /// The body is passed explicitly because the live response body has
    /// usually been consumed by the payload decoder by the time this runs.
    pub fn from_response<B>(response: &http::Response<B>, body: Bytes) -> Self {
        Self::from_parts_ref(
            response.status(),
            response.version(),
            response.headers(),
            body,
        )
    }

    /// Captures response parts together with the body they carried.
    #[must_use]
    pub fn from_parts(parts: &http::response::Parts, body: Bytes) -> Self {
        Self::from_parts_ref(parts.status, parts.version, &parts.headers, body)
    }

    fn from_parts_ref(status: StatusCode, version: Version, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            version,
            headers: headers.clone(),
            body,
            request: None,
        }
    }

    /// Attaches the request that produced this response.
    #[must_use]
    pub fn with_request(mut self, request: Option<DuplicateRequest>) -> Self {
        self.request = request;
        self
    }

    /// Returns the status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the HTTP version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the headers for modification.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Returns the first value of `name`, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Returns the buffered body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Returns a fresh reader positioned at the start of the body.
    #[must_use]
    pub fn body_reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }

    /// Returns the request that produced this response, if captured.
    #[must_use]
    pub const fn request(&self) -> Option<&DuplicateRequest> {
        self.request.as_ref()
    }

    /// Rebuilds a standalone `http::Response`.
    #[must_use]
    pub fn to_http(&self) -> http::Response<Bytes> {
        let mut response = http::Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Buffers a streaming request body so the request can be both duplicated and consumed.
pub async fn buffer_request<B>(request: http::Request<B>) -> PipelineResult<http::Request<Bytes>>
where
    B: BodyExt,
    B::Error: fmt::Display,
{
    let (parts, body) = request.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| PipelineError::transport(format!("failed to read request body: {e}")))?
        .to_bytes();
    Ok(http::Request::from_parts(parts, bytes))
}

/// Buffers a streaming response body.
pub async fn buffer_response<B>(response: http::Response<B>) -> PipelineResult<http::Response<Bytes>>
where
    B: BodyExt,
    B::Error: fmt::Display,
{
    let (parts, body) = response.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| PipelineError::transport(format!("failed to read response body: {e}")))?
        .to_bytes();
    Ok(http::Response::from_parts(parts, bytes))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use std::io::Read;

    fn sample_request() -> http::Request<Bytes> {
        http::Request::builder()
            .method(Method::PUT)
            .uri("http://svc.local/items/7?dry=1")
            .header("x-request-id", "req-1")
            .header("accept", "application/json")
            .body(Bytes::from_static(br#"{"x":1}"#))
            .unwrap()
    }

    #[test]
    fn test_curl_sorts_headers_and_skips_empty_body() {
        let request = http::Request::get("http://svc.local/ping")
            .header("x-b", "2")
            .header("x-a", "1")
            .body(Bytes::new())
            .unwrap();
        let curl = DuplicateRequest::from_request(&request).curl_command();
        assert_eq!(
            curl,
            "curl -X 'GET' -H 'x-a: 1' -H 'x-b: 2' 'http://svc.local/ping'"
        );
    }

    #[test]
    fn test_body_reader_starts_fresh_each_time() {
        let duplicate = DuplicateRequest::from_request(&sample_request());

        let mut first = String::new();
        duplicate.body_reader().read_to_string(&mut first).unwrap();
        let mut second = String::new();
        duplicate.body_reader().read_to_string(&mut second).unwrap();

        assert_eq!(first, r#"{"x":1}"#);
        assert_eq!(first, second);
    }

    #[test]
    fn test_clone_headers_are_independent() {
        let original = DuplicateRequest::from_request(&sample_request());
        let mut copy = original.clone();
        copy.headers_mut()
            .append("x-extra", http::HeaderValue::from_static("1"));
        assert!(original.header("x-extra").is_none());
        assert_eq!(copy.header("x-extra"), Some("1"));
    }

    #[test]
    fn test_to_http_round_trips_parts() {
        let duplicate = DuplicateRequest::from_request(&sample_request());
        let rebuilt = duplicate.to_http();
        assert_eq!(rebuilt.method(), &Method::PUT);
        assert_eq!(rebuilt.uri().query(), Some("dry=1"));
        assert_eq!(rebuilt.headers()["x-request-id"], "req-1");
        assert_eq!(&rebuilt.body()[..], br#"{"x":1}"#);
    }

    #[test]
    fn test_response_snapshot_keeps_request() {
        let response = http::Response::builder()
            .status(StatusCode::ACCEPTED)
            .header("content-type", "application/json")
            .body(())
            .unwrap();
        let duplicate = DuplicateResponse::from_response(&response, Bytes::from_static(b"{}"))
            .with_request(Some(DuplicateRequest::from_request(&sample_request())));

        assert_eq!(duplicate.status(), StatusCode::ACCEPTED);
        assert_eq!(duplicate.body_text(), "{}");
        assert_eq!(
            duplicate.request().and_then(|r| r.header("x-request-id")),
            Some("req-1")
        );
        assert_eq!(duplicate.to_http().status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_buffer_request_collects_body() {
        let request = http::Request::post("http://svc.local/")
            .body(Full::new(Bytes::from_static(b"streamed")))
            .unwrap();
        let buffered = buffer_request(request).await.unwrap();
        assert_eq!(&buffered.body()[..], b"streamed");
        assert_eq!(buffered.method(), &Method::POST);
    }
}
