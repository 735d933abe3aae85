//! The code/message/data business envelope.
//!
//! Servers wrap every outcome, success or failure, into an [`Envelope`] so the
//! wire format never changes shape. Clients unwrap it and turn a non-success
//! code into [`PipelineError::Business`].
//!
//! ```json
//! {"code": "0", "message": "success", "data": {"id": 7}}
//! {"code": "1", "message": "not found", "data": null}
//! ```

use crate::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Business code for success.
pub const CODE_SUCCESS: &str = "0";

/// Generic business code for failure.
pub const CODE_FAIL: &str = "1";

/// Message written alongside a success code.
pub const MESSAGE_SUCCESS: &str = "success";

/// The business envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Business code; [`CODE_SUCCESS`] means success.
    #[serde(deserialize_with = "code_from_string_or_number")]
    pub code: String,
    /// Human-readable outcome.
    #[serde(default)]
    pub message: String,
    /// Business data, `null` on failure.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Creates a success envelope around `data`.
    #[must_use]
    pub fn success(data: Value) -> Self {
        Self {
            code: CODE_SUCCESS.to_string(),
            message: MESSAGE_SUCCESS.to_string(),
            data,
        }
    }

    /// Creates a failure envelope. Failure envelopes never carry data.
    #[must_use]
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: Value::Null,
        }
    }

    /// Returns true if the code is [`CODE_SUCCESS`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == CODE_SUCCESS
    }

    /// Unwraps the data, or converts a failure code into a business error.
    ///
    /// A failure without a message falls back to the rendered data.
    pub fn into_data(self) -> PipelineResult<Value> {
        if self.is_success() {
            return Ok(self.data);
        }
        let message = if self.message.is_empty() {
            match &self.data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        } else {
            self.message
        };
        Err(PipelineError::business(self.code, message))
    }
}

// Some peers send the code as a number.
fn code_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "envelope code must be a string or number, got {other}"
        ))),
    }
}
