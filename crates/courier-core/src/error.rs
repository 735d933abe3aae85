//! Error types for Courier.
//!
//! [`PipelineError`] is the single error type returned by every handler,
//! every chain run and every protocol entry point. Each variant belongs to an
//! [`ErrorCategory`] so callers can tell a wiring defect from a broken
//! network, a rejected payload, or a failed signature check.
//!
//! | `ErrorCategory` | Raised by |
//! |---|---|
//! | `Configuration` | missing/duplicated I/O hook, message reuse, bad header |
//! | `Transport` | I/O hooks (connection failure, non-2xx status) |
//! | `Decode` | I/O hooks and protocol entry points (malformed body) |
//! | `Validation` | [`Validate`](crate::Validate) implementations |
//! | `Authentication` | signature and caller-header middlewares |
//! | `Business` | business envelopes carrying a non-success code |
//! | `Cancelled` | handlers observing the cancellation token |
//! | `Internal` | business handlers and anything else |
//! | `Fatal` | the server failure path when the failure response cannot be written |

use crate::envelope::CODE_FAIL;
use crate::message::MessageKind;
use crate::stage::IoDirection;
use crate::validate::ValidationError;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Categories of errors for classification and handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Wiring defects detected before any handler runs.
    Configuration,
    /// Connection failures, timeouts and non-success HTTP statuses.
    Transport,
    /// Malformed bodies for the expected payload shape.
    Decode,
    /// Payload decoded but rejected by semantic validation.
    Validation,
    /// Missing or mismatched caller/signature headers.
    Authentication,
    /// The remote side answered with a business failure code.
    Business,
    /// The call was cancelled.
    Cancelled,
    /// Any other failure.
    Internal,
    /// Writing a failure response failed; the call cannot be recovered.
    Fatal,
}

impl ErrorCategory {
    /// Returns the category name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::Business => "business",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error type for the Courier pipeline.
///
/// # Example
///
/// ```
/// use courier_core::{ErrorCategory, PipelineError};
///
/// let err = PipelineError::business("404", "not found");
/// assert_eq!(err.category(), ErrorCategory::Business);
/// assert_eq!(err.business_code(), "404");
/// assert_eq!(err.business_message(), "not found");
/// ```
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No I/O hook was configured for the requested entry point.
    #[error("no {direction} I/O handler configured for {kind} message")]
    MissingIoHandler {
        /// The message the hook was missing on.
        kind: MessageKind,
        /// Whether a reader or a writer was expected.
        direction: IoDirection,
    },

    /// The chain contains more than one I/O handler.
    #[error("chain has {count} I/O handlers, exactly one is allowed")]
    MultipleIoHandlers {
        /// Number of I/O-stage entries found.
        count: usize,
    },

    /// The message already completed a pipeline run.
    #[error("{kind} message already completed a pipeline run; create a new protocol per call")]
    MessageReused {
        /// The message that was reused.
        kind: MessageKind,
    },

    /// A header name or value could not be represented.
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The transport failed or answered with a non-success status.
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable error message.
        message: String,
        /// The HTTP status, when one was received.
        status: Option<StatusCode>,
        /// The underlying error.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The body could not be decoded into the expected payload.
    #[error("failed to decode payload: {message}")]
    Decode {
        /// Human-readable error message.
        message: String,
        /// The underlying JSON error, if any.
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload failed semantic validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Caller identification or signature verification failed.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// A business failure with an explicit code.
    #[error("business error (code {code}): {message}")]
    Business {
        /// The business code.
        code: String,
        /// The business message.
        message: String,
    },

    /// The call was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other error, typically raised by business handlers.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    /// Writing the failure response failed.
    #[error("failed to write failure response: {write_error} (while reporting: {original})")]
    FatalResponse {
        /// The error that was being reported.
        original: Box<PipelineError>,
        /// The error raised while writing the failure response.
        write_error: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Creates a transport error without a status.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Creates a transport error wrapping an underlying cause.
    #[must_use]
    pub fn transport_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            source: Some(source.into()),
        }
    }

    /// Creates a transport error for a non-success HTTP status.
    #[must_use]
    pub fn http_status(status: StatusCode, body: &str) -> Self {
        Self::Transport {
            message: format!("http status {}, response body: {body}", status.as_u16()),
            status: Some(status),
            source: None,
        }
    }

    /// Creates a decode error from a JSON error.
    #[must_use]
    pub fn decode(source: serde_json::Error) -> Self {
        Self::Decode {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a decode error from a message.
    #[must_use]
    pub fn decode_message(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an authentication error.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Creates a business error.
    #[must_use]
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Business {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error from a message.
    #[must_use]
    pub fn internal(message: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Internal(anyhow::Error::msg(message))
    }

    /// Creates an invalid header error.
    #[must_use]
    pub fn invalid_header(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the category of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingIoHandler { .. }
            | Self::MultipleIoHandlers { .. }
            | Self::MessageReused { .. }
            | Self::InvalidHeader { .. } => ErrorCategory::Configuration,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Decode { .. } | Self::Encode(_) => ErrorCategory::Decode,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Business { .. } => ErrorCategory::Business,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal(_) => ErrorCategory::Internal,
            Self::FatalResponse { .. } => ErrorCategory::Fatal,
        }
    }

    /// Returns true for configuration errors (wiring defects).
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self.category(), ErrorCategory::Configuration)
    }

    /// Returns true if retrying the whole call with a fresh protocol may succeed.
    ///
    /// The pipeline never retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { status, .. } => match status {
                Some(status) => status.is_server_error(),
                None => true,
            },
            _ => false,
        }
    }

    /// Returns the HTTP status carried by a transport error.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Returns the business code written into failure envelopes.
    ///
    /// Business errors carry their own code; everything else maps to the
    /// generic failure code.
    #[must_use]
    pub fn business_code(&self) -> &str {
        match self {
            Self::Business { code, .. } => code,
            _ => CODE_FAIL,
        }
    }

    /// Returns the message written into failure envelopes.
    #[must_use]
    pub fn business_message(&self) -> String {
        match self {
            Self::Business { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
