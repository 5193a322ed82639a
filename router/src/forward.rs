//! Forwarding of placed requests to inference backends.
//!
//! The scheduler only needs two events from a forwarder: "response started"
//! (the future returned by [`Forwarder::forward`] resolves) and "stream ended"
//! (the returned body stream finishes or is dropped).

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::Client;
use thiserror::Error;

use adasplit_common::ChatCompletionRequest;

use crate::config::ForwardingConfig;

/// Errors at the forwarding boundary.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    #[error("Failed to connect to backend: {0}")]
    Connection(String),
    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Response stream failed: {0}")]
    Stream(String),
}

/// Where a placed request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendTarget {
    pub id: usize,
    pub url: String,
}

pub type ResponseBody = BoxStream<'static, Result<Bytes, ForwardError>>;

/// A backend response whose headers have arrived.
pub struct ForwardedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ResponseBody,
}

impl ForwardedResponse {
    /// Keep `guard` alive until the body stream is finished or dropped.
    pub fn hold_until_complete<G: Send + Unpin + 'static>(self, guard: G) -> Self {
        Self {
            status: self.status,
            content_type: self.content_type,
            body: Box::pin(Guarded {
                inner: self.body,
                guard: Some(guard),
            }),
        }
    }

    /// Collect the whole body. Mostly useful for tests and non-streaming callers.
    pub async fn collect(self) -> Result<Bytes, ForwardError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat().into())
    }
}

impl std::fmt::Debug for ForwardedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardedResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

impl IntoResponse for ForwardedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = Response::new(Body::from_stream(self.body));
        *response.status_mut() = status;
        if let Some(value) = self
            .content_type
            .and_then(|ct| header::HeaderValue::from_str(&ct).ok())
        {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

/// Stream wrapper that drops its guard once the inner stream is exhausted.
struct Guarded<G> {
    inner: ResponseBody,
    guard: Option<G>,
}

impl<G: Unpin> Stream for Guarded<G> {
    type Item = Result<Bytes, ForwardError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None) = polled {
            self.guard.take();
        }
        polled
    }
}

/// Sends a placed request to its backend.
#[async_trait]
pub trait Forwarder: Send + Sync + 'static {
    async fn forward(
        &self,
        target: &BackendTarget,
        request: &ChatCompletionRequest,
    ) -> Result<ForwardedResponse, ForwardError>;
}

/// Forwarder over HTTP using a shared connection pool.
pub struct HttpForwarder {
    http_client: Client,
}

impl HttpForwarder {
    pub fn new(config: &ForwardingConfig) -> Result<Self, ForwardError> {
        let mut builder = Client::builder()
            // backends are local; proxy env vars would only get in the way
            .no_proxy()
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http_client = builder
            .build()
            .map_err(|e| ForwardError::Connection(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        target: &BackendTarget,
        request: &ChatCompletionRequest,
    ) -> Result<ForwardedResponse, ForwardError> {
        tracing::debug!("Forwarding request to {} (backend: {})", target.url, target.id);

        let response = self
            .http_client
            .post(&target.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ForwardError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ForwardError::Status { status, body });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ForwardedResponse {
            status: response.status().as_u16(),
            content_type,
            body: response
                .bytes_stream()
                .map_err(|e| ForwardError::Stream(e.to_string()))
                .boxed(),
        })
    }
}
