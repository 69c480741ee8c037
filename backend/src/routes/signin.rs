use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::USER_AGENT;
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use signin_common::SignInRequest;

use crate::error::RequestError;
use crate::AppState;

/// Largest request body the sign-in endpoint reads.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// POST /auth/signin - exchange a provider identity token for service tokens.
///
/// Registered for every method so non-POST requests get the JSON envelope
/// instead of an empty 405.
async fn sign_in(State(state): State<Arc<AppState>>, request: Request) -> Response {
    if request.method() != Method::POST {
        return RequestError::MethodNotAllowed(request.method().to_string()).into_response();
    }

    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read sign-in body");
            return RequestError::UnprocessableBody(format!(
                "body could not be read within {MAX_BODY_BYTES} bytes: {e}"
            ))
            .into_response();
        }
    };

    let sign_in_request: SignInRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return RequestError::UnprocessableBody(e.to_string()).into_response(),
    };

    match state
        .orchestrator
        .sign_in(&sign_in_request, &user_agent)
        .await
        .into_result()
    {
        Ok(response) => Json(response).into_response(),
        Err(e) => e.into_response(),
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/signin", any(sign_in))
        .with_state(state)
}
