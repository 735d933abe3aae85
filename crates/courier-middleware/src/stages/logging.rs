//! Request and response logging middlewares.
//!
//! Both middlewares log *after* the rest of the chain has run, so the
//! entry reflects what actually went over the wire:
//!
//! | Middleware | Logs |
//! |------------|------|
//! | [`RequestLogMiddleware`] | request id, method, URL, replay `curl` command |
//! | [`ResponseLogMiddleware`] | request id, status, body (truncated) or the reported error |
//!
//! Response bodies are cut at [`DEFAULT_BODY_LOG_LIMIT`] bytes, always on a
//! UTF-8 character boundary.

use courier_core::{
    BoxFuture, Handler, IoDirection, PipelineResult, RequestMessage, ResponseMessage,
};
use serde::{Deserialize, Serialize};

/// Default number of response body bytes written to the log.
pub const DEFAULT_BODY_LOG_LIMIT: usize = 512;

/// Level at which a logging middleware emits its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Logging disabled.
    Off,
    /// `TRACE`
    Trace,
    /// `DEBUG`
    Debug,
    /// `INFO`
    #[default]
    Info,
    /// `WARN`
    Warn,
    /// `ERROR`
    Error,
}

impl LogLevel {
    /// Returns true if entries at this level are emitted at all.
    #[must_use]
    pub const fn is_enabled(self) -> bool {
        !matches!(self, Self::Off)
    }
}

// tracing levels must be known at the call site, so dispatch by hand.
macro_rules! emit {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Off => {}
            LogLevel::Trace => tracing::trace!($($arg)+),
            LogLevel::Debug => tracing::debug!($($arg)+),
            LogLevel::Info => tracing::info!($($arg)+),
            LogLevel::Warn => tracing::warn!($($arg)+),
            LogLevel::Error => tracing::error!($($arg)+),
        }
    };
}

/// Returns the longest prefix of `text` no longer than `limit` bytes that
/// ends on a character boundary.
#[must_use]
pub fn truncate_utf8(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn direction_label(direction: Option<IoDirection>) -> &'static str {
    match direction {
        Some(IoDirection::Read) => "received",
        Some(IoDirection::Write) | None => "sent",
    }
}

/// Logs each request once the chain below it has finished.
///
/// On the client side the entry carries a `curl` command that replays the
/// exact bytes sent; on the server side it replays what was received.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogMiddleware {
    level: LogLevel,
}

impl RequestLogMiddleware {
    /// Creates a request logger at `INFO`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request logger at `level`.
    #[must_use]
    pub const fn with_level(level: LogLevel) -> Self {
        Self { level }
    }

    /// Returns the configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }
}

impl Handler<courier_core::Request> for RequestLogMiddleware {
    fn name(&self) -> &'static str {
        "request_log"
    }

    fn handle<'a>(&'a self, message: &'a mut RequestMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let result = message.next().await;
            if !self.level.is_enabled() {
                return result;
            }

            let request_id = message.request_id();
            let direction = direction_label(message.direction());
            let curl = message.curl_command().unwrap_or_default();
            match &result {
                Ok(()) => emit!(
                    self.level,
                    request_id = %request_id,
                    method = %message.method(),
                    url = %message.url(),
                    curl = %curl,
                    "Request {}", direction
                ),
                Err(error) => tracing::warn!(
                    request_id = %request_id,
                    method = %message.method(),
                    url = %message.url(),
                    curl = %curl,
                    error = %error,
                    "Request failed"
                ),
            }
            result
        })
    }
}

/// Logs each response once the chain below it has finished.
#[derive(Debug, Clone, Copy)]
pub struct ResponseLogMiddleware {
    level: LogLevel,
    body_limit: usize,
}

impl Default for ResponseLogMiddleware {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            body_limit: DEFAULT_BODY_LOG_LIMIT,
        }
    }
}

impl ResponseLogMiddleware {
    /// Creates a response logger at `INFO` with the default body limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a response logger at `level`.
    #[must_use]
    pub fn with_level(level: LogLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Sets how many body bytes are logged.
    #[must_use]
    pub const fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Returns the configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }

    fn body_of(&self, message: &ResponseMessage) -> (String, bool) {
        let body = match message.duplicate_response() {
            Some(duplicate) => duplicate.body_text().into_owned(),
            None => message
                .raw()
                .map(|raw| String::from_utf8_lossy(raw).into_owned())
                .unwrap_or_default(),
        };
        let shown = truncate_utf8(&body, self.body_limit);
        let truncated = shown.len() < body.len();
        (shown.to_string(), truncated)
    }
}

impl Handler<courier_core::Response> for ResponseLogMiddleware {
    fn name(&self) -> &'static str {
        "response_log"
    }

    fn handle<'a>(&'a self, message: &'a mut ResponseMessage) -> BoxFuture<'a, PipelineResult<()>> {
        Box::pin(async move {
            let result = message.next().await;
            if !self.level.is_enabled() {
                return result;
            }

            let request_id = message.request_id();
            let status = message
                .status()
                .map_or_else(|| "-".to_string(), |status| status.as_u16().to_string());

            if let Err(error) = &result {
                tracing::warn!(
                    request_id = %request_id,
                    http.status_code = %status,
                    error = %error,
                    "Response failed"
                );
                return result;
            }

            if let Some(reported) = message.error() {
                tracing::error!(
                    request_id = %request_id,
                    http.status_code = %status,
                    error = %reported,
                    category = %reported.category(),
                    business_code = %message.business_code(),
                    "Responded with failure"
                );
                return result;
            }

            let (body, truncated) = self.body_of(message);
            emit!(
                self.level,
                request_id = %request_id,
                http.status_code = %status,
                body = %body,
                body_truncated = truncated,
                "Response {}", direction_label(message.direction())
            );
            result
        })
    }
}
