//! Transport setup errors.
//!
//! Errors raised while *running* an exchange are [`PipelineError`]s; the
//! errors here only cover building and managing the shared client.
//!
//! [`PipelineError`]: courier_core::PipelineError

use thiserror::Error;

/// Errors from client construction and the shared client lifecycle.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP client could not be built from its configuration.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    /// [`init_shared_client`](crate::init_shared_client) was called while a
    /// shared client is active.
    #[error("shared HTTP client is already initialized")]
    AlreadyInitialized,

    /// The shared client was shut down and not initialized again.
    #[error("shared HTTP client has been shut down")]
    ShutDown,
}

/// Result alias for transport setup.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_messages() {
        assert_eq!(
            TransportError::AlreadyInitialized.to_string(),
            "shared HTTP client is already initialized"
        );
        assert!(TransportError::ShutDown.to_string().contains("shut down"));
    }
}
