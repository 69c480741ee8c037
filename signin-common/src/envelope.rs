//! Error envelope returned for every failed request.

use serde::{Deserialize, Serialize};

/// `{ "code": ..., "message": ..., "errors": ... }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// HTTP status code, repeated in the body.
    pub code: u16,
    /// Short human-readable summary.
    pub message: String,
    /// Underlying error detail (may be empty).
    pub errors: String,
}

impl ErrorEnvelope {
    pub fn new(code: u16, message: impl Into<String>, errors: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            errors: errors.into(),
        }
    }
}
