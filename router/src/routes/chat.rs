use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use adasplit_common::ChatCompletionRequest;

use crate::logging::CLASS_HEADER;
use crate::AppState;

/// POST /v1/chat/completions - classify, schedule and relay the backend response
async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatCompletionRequest>,
) -> Response {
    let cost = state.classifier.estimate(&request);
    let class = state.classifier.class_for_cost(cost);
    state.monitor.record(cost);
    tracing::debug!("Classified request as {} (estimated cost {})", class, cost);

    let mut response = match state.scheduler.submit(class, request).await {
        Ok(forwarded) => forwarded.into_response(),
        Err(e) => e.into_response(),
    };
    response
        .headers_mut()
        .insert(CLASS_HEADER, HeaderValue::from_static(class.as_str()));
    response
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}
