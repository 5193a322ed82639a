use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

/// Response header carrying the class a chat request was routed as.
pub const CLASS_HEADER: &str = "x-adasplit-class";

/// Middleware that logs HTTP requests. Scrape and probe endpoints log at DEBUG.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_millis();
    let class = response
        .headers()
        .get(CLASS_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    if matches!(path.as_str(), "/health" | "/metrics" | "/status") {
        tracing::debug!(
            method = %method,
            path = %path,
            status = status,
            duration_ms = %duration_ms,
            "HTTP request"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            class = %class,
            status = status,
            duration_ms = %duration_ms,
            "HTTP request"
        );
    }

    response
}
