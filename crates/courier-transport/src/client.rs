//! Client adapter backed by `reqwest`.
//!
//! [`HttpClient::protocol`] returns a [`ClientProtocol`] whose I/O hooks are
//! wired to a `reqwest::Client`:
//!
//! - the **writer** encodes the message (raw bytes win over the payload),
//!   captures the duplicate request and stages the `reqwest::Request`;
//! - the **reader** sends the staged request, captures the duplicate
//!   response, records the HTTP status in metadata and decodes the JSON body.
//!
//! ## Shared client
//!
//! Connection pools are meant to be shared. One process-wide client lives
//! behind [`shared_client`]; it is built lazily with defaults on first use,
//! or explicitly with [`init_shared_client`], which returns a
//! [`SharedClientGuard`] that shuts the client down when dropped. Hold the
//! guard in `main` (next to your signal handling) for deterministic shutdown.

use std::sync::Arc;
use std::time::Duration;

use courier_core::metadata::keys;
use courier_core::{
    handler_fn, CancellationToken, ClientProtocol, Handler, PipelineError, PipelineResult,
    RequestMessage, ResponseMessage,
};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::error::{TransportError, TransportResult};

/// Default total request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default idle connection lifetime.
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default number of idle connections kept per host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 1000;

/// Default `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!("courier/", env!("CARGO_PKG_VERSION"));

/// Settings for building the underlying `reqwest::Client`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Total timeout per request.
    pub timeout: Duration,
    /// Connection establishment timeout, if any.
    pub connect_timeout: Option<Duration>,
    /// How long idle pooled connections are kept.
    pub pool_idle_timeout: Duration,
    /// Maximum idle pooled connections per host.
    pub pool_max_idle_per_host: usize,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientConfig {
    /// Builds a `reqwest::Client` from these settings.
    pub fn build(&self) -> TransportResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .user_agent(self.user_agent.clone());
        if let Some(connect_timeout) = self.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        Ok(builder.build()?)
    }
}

/// A cheaply clonable handle to a `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Builds a client from `config`.
    pub fn new(config: &ClientConfig) -> TransportResult<Self> {
        Ok(Self {
            inner: config.build()?,
        })
    }

    /// Wraps an existing `reqwest::Client`.
    #[must_use]
    pub fn from_reqwest(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    /// Returns the underlying `reqwest::Client`.
    #[must_use]
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Creates a client protocol for one call to `url`.
    #[must_use]
    pub fn protocol(&self, method: Method, url: impl Into<String>) -> ClientProtocol {
        self.protocol_with_cancellation(method, url, CancellationToken::new())
    }

    /// Creates a client protocol whose call aborts when `cancellation` fires.
    #[must_use]
    pub fn protocol_with_cancellation(
        &self,
        method: Method,
        url: impl Into<String>,
        cancellation: CancellationToken,
    ) -> ClientProtocol {
        let staged: Staged = Arc::default();
        let mut protocol = ClientProtocol::with_cancellation(method, url, cancellation).with_io(
            reader(self.inner.clone(), Arc::clone(&staged)),
            writer(staged),
        );
        protocol
            .request_mut()
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        protocol
    }
}

type Staged = Arc<Mutex<Option<reqwest::Request>>>;

fn writer(staged: Staged) -> impl Handler<courier_core::Request> {
    handler_fn("reqwest_writer", move |message: &mut RequestMessage| {
        let staged = Arc::clone(&staged);
        Box::pin(async move {
            message.ensure_not_cancelled()?;
            let body = match message.raw() {
                Some(raw) => raw.clone(),
                None => message.encode_payload()?,
            };

            let mut request = http::Request::new(body);
            *request.method_mut() = message.method().clone();
            *request.uri_mut() = message
                .url()
                .parse()
                .map_err(|e| PipelineError::transport_source(format!("invalid url {:?}", message.url()), e))?;
            *request.headers_mut() = message.headers().clone();
            message.set_duplicate_request(&request);

            let request = reqwest::Request::try_from(request)
                .map_err(|e| PipelineError::transport_source("failed to build request", e))?;
            *staged.lock() = Some(request);
            Ok(())
        })
    })
}

fn reader(client: reqwest::Client, staged: Staged) -> impl Handler<courier_core::Response> {
    handler_fn("reqwest_reader", move |message: &mut ResponseMessage| {
        let client = client.clone();
        let staged = Arc::clone(&staged);
        Box::pin(async move {
            let request = staged
                .lock()
                .take()
                .ok_or_else(|| PipelineError::transport("no request was written for this call"))?;
            let cancellation = message.cancellation().clone();

            let response = tokio::select! {
                biased;
                () = cancellation.cancelled() => return Err(PipelineError::Cancelled),
                result = client.execute(request) => result
                    .map_err(|e| PipelineError::transport_source("request failed", e))?,
            };

            let status = response.status();
            let mut head = http::Response::new(());
            *head.status_mut() = status;
            *head.version_mut() = response.version();
            *head.headers_mut() = response.headers().clone();

            let body = tokio::select! {
                biased;
                () = cancellation.cancelled() => return Err(PipelineError::Cancelled),
                result = response.bytes() => result
                    .map_err(|e| PipelineError::transport_source("failed to read response body", e))?,
            };

            message.set_status(status);
            message.set_metadata(keys::HTTP_STATUS, status.as_u16());
            *message.headers_mut() = head.headers().clone();
            message.set_duplicate_response(&head, Some(body.clone()));

            if !status.is_success() {
                return Err(PipelineError::http_status(
                    status,
                    &String::from_utf8_lossy(&body),
                ));
            }
            if !body.is_empty() {
                let payload: Value = serde_json::from_slice(&body).map_err(PipelineError::decode)?;
                message.set_payload(payload);
            }
            message.next().await
        })
    })
}

enum SharedState {
    Uninitialized,
    Active(HttpClient),
    ShutDown,
}

static SHARED: RwLock<SharedState> = parking_lot::const_rwlock(SharedState::Uninitialized);

/// Shuts the shared client down when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard shuts the shared client down immediately"]
pub struct SharedClientGuard {
    _private: (),
}

impl Drop for SharedClientGuard {
    fn drop(&mut self) {
        shutdown_shared_client();
    }
}

/// Initializes the process-wide client from `config`.
///
/// Fails if a shared client is already active. After a shutdown it may be
/// initialized again.
pub fn init_shared_client(config: &ClientConfig) -> TransportResult<SharedClientGuard> {
    let mut state = SHARED.write();
    if matches!(*state, SharedState::Active(_)) {
        return Err(TransportError::AlreadyInitialized);
    }
    *state = SharedState::Active(HttpClient::new(config)?);
    tracing::debug!(timeout = ?config.timeout, "Shared HTTP client initialized");
    Ok(SharedClientGuard { _private: () })
}

/// Returns the process-wide client, building it with defaults on first use.
pub fn shared_client() -> TransportResult<HttpClient> {
    if let SharedState::Active(client) = &*SHARED.read() {
        return Ok(client.clone());
    }

    let mut state = SHARED.write();
    match &*state {
        SharedState::Active(client) => Ok(client.clone()),
        SharedState::ShutDown => Err(TransportError::ShutDown),
        SharedState::Uninitialized => {
            let client = HttpClient::new(&ClientConfig::default())?;
            *state = SharedState::Active(client.clone());
            tracing::debug!("Shared HTTP client initialized with defaults");
            Ok(client)
        }
    }
}

/// Drops the process-wide client.
///
/// Idle pooled connections close once the last clone handed out by
/// [`shared_client`] is dropped. Calls in flight complete normally.
pub fn shutdown_shared_client() {
    let previous = std::mem::replace(&mut *SHARED.write(), SharedState::ShutDown);
    if matches!(previous, SharedState::Active(_)) {
        tracing::info!("Shared HTTP client shut down");
    }
}

/// Creates a client protocol on the shared client.
pub fn protocol(method: Method, url: impl Into<String>) -> TransportResult<ClientProtocol> {
    Ok(shared_client()?.protocol(method, url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::ErrorCategory;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.pool_idle_timeout, Duration::from_secs(90));
        assert_eq!(config.pool_max_idle_per_host, 1000);
        assert!(config.user_agent.starts_with("courier/"));
    }

    #[test]
    fn test_protocol_sets_json_content_type() {
        let client = HttpClient::new(&ClientConfig::default()).unwrap();
        let protocol = client.protocol(Method::GET, "http://localhost/");
        assert_eq!(
            protocol.request().header("content-type"),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_sending() {
        let client = HttpClient::new(&ClientConfig::default()).unwrap();
        let mut protocol = client.protocol(Method::POST, "not a url");

        let error = protocol.write_request(&json!({"a": 1})).await.unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Transport);
        assert!(protocol.request().duplicate_request().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_call_never_sends() {
        let client = HttpClient::new(&ClientConfig::default()).unwrap();
        let cancellation = CancellationToken::new();
        let mut protocol =
            client.protocol_with_cancellation(Method::GET, "http://127.0.0.1:9/", cancellation.clone());
        protocol.write_request(&json!(null)).await.unwrap();
        assert!(protocol.request().duplicate_request().is_some());

        cancellation.cancel();
        let error = protocol.read_response::<Value>().await.unwrap_err();
        assert!(matches!(error, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_read_without_write_is_transport_error() {
        let client = HttpClient::new(&ClientConfig::default()).unwrap();
        let mut protocol = client.protocol(Method::GET, "http://localhost/");

        let error = protocol.read_response::<Value>().await.unwrap_err();
        assert_eq!(error.category(), ErrorCategory::Transport);
    }
}
