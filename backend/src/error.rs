//! Sign-in failures and their HTTP representation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use signin_common::ErrorEnvelope;

use crate::auth::VerifyError;
use crate::issuer::IssueError;
use crate::resolver::ResolveError;

/// Terminal rejection reasons of a sign-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnsupportedProvider,
    Unauthorized,
    ProvisioningFailed,
    IssuanceFailed,
}

#[derive(Debug, thiserror::Error)]
pub enum SignInError {
    #[error("Provider {0:?} is not supported")]
    UnsupportedProvider(String),
    #[error("Identity token rejected: {0}")]
    Unauthorized(#[source] VerifyError),
    #[error("Account provisioning failed: {0}")]
    ProvisioningFailed(#[source] ResolveError),
    #[error("Token issuance failed: {0}")]
    IssuanceFailed(#[source] IssueError),
}

impl SignInError {
    pub fn reason(&self) -> RejectReason {
        match self {
            SignInError::UnsupportedProvider(_) => RejectReason::UnsupportedProvider,
            SignInError::Unauthorized(_) => RejectReason::Unauthorized,
            SignInError::ProvisioningFailed(_) => RejectReason::ProvisioningFailed,
            SignInError::IssuanceFailed(_) => RejectReason::IssuanceFailed,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SignInError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            // Unknown providers are treated as a server-side registration gap.
            SignInError::UnsupportedProvider(_)
            | SignInError::ProvisioningFailed(_)
            | SignInError::IssuanceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing summary placed in the envelope's `message`.
    pub fn message(&self) -> &'static str {
        match self {
            SignInError::UnsupportedProvider(_) => "The provider is not registered in our system.",
            SignInError::Unauthorized(_) => "Token rejected.",
            SignInError::ProvisioningFailed(ResolveError::Lookup(_)) => "Failed to fetch user info.",
            SignInError::ProvisioningFailed(_) => "Error creating user",
            SignInError::IssuanceFailed(_) => "Failed to generate token.",
        }
    }

    /// Detail placed in the envelope's `errors`.
    pub fn detail(&self) -> String {
        match self {
            SignInError::UnsupportedProvider(provider) => {
                format!("provider {provider:?} is not supported")
            }
            SignInError::Unauthorized(e) => e.to_string(),
            SignInError::ProvisioningFailed(e) => e.to_string(),
            SignInError::IssuanceFailed(e) => e.to_string(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.status_code().as_u16(), self.message(), self.detail())
    }
}

impl IntoResponse for SignInError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.envelope())).into_response()
    }
}

/// Failures detected before the request reaches the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("HTTP Method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error("Failed to process request body: {0}")]
    UnprocessableBody(String),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let (status, envelope) = match self {
            RequestError::MethodNotAllowed(method) => (
                StatusCode::METHOD_NOT_ALLOWED,
                ErrorEnvelope::new(
                    405,
                    "HTTP Method not allowed",
                    format!("method {method} is not allowed"),
                ),
            ),
            RequestError::UnprocessableBody(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorEnvelope::new(422, "Failed to process request body", detail),
            ),
        };
        (status, Json(envelope)).into_response()
    }
}
