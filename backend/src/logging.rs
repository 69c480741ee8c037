use axum::{
    extract::Request,
    http::header::USER_AGENT,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Middleware that logs each HTTP request. Health probes are logged at DEBUG,
/// everything else at INFO, and server errors at WARN.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let response = next.run(request).await;

    let status = response.status();
    let duration_ms = start.elapsed().as_millis();

    if path == "/health" {
        tracing::debug!(method = %method, path = %path, status = %status.as_u16(), "HTTP request");
    } else if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            user_agent = %user_agent,
            "HTTP request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            user_agent = %user_agent,
            "HTTP request"
        );
    }

    response
}
