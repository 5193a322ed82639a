//! Helpers shared by unit and integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};

use adasplit_common::{ChatCompletionRequest, ChatMessage};

use crate::config::{Config, SchedulerConfig};
use crate::forward::{BackendTarget, ForwardError, ForwardedResponse, Forwarder};
use crate::AppState;

/// A single-message user request.
pub fn chat_request(text: &str) -> ChatCompletionRequest {
    ChatCompletionRequest::new(vec![ChatMessage::text("user", text)])
}

/// Configuration pointing at the given backend URLs, one slot each.
pub fn test_config(backends: Vec<String>) -> Config {
    let baseline_long = backends.len() / 2;
    Config {
        scheduler: SchedulerConfig {
            backends,
            baseline_long,
            concurrency_limit: 1,
            ..SchedulerConfig::default()
        },
        ..Config::default()
    }
}

/// Build application state around the given forwarder.
pub fn create_test_state(config: Config, forwarder: Arc<dyn Forwarder>) -> Arc<AppState> {
    match AppState::new(config, forwarder) {
        Ok(state) => Arc::new(state),
        Err(e) => panic!("invalid test config: {}", e),
    }
}

/// One call made through a [`ScriptedForwarder`], waiting for the test to answer.
pub struct ForwardCall {
    pub target: BackendTarget,
    pub request: ChatCompletionRequest,
    reply: oneshot::Sender<Result<ForwardedResponse, ForwardError>>,
}

impl ForwardCall {
    /// Text of the first message.
    pub fn text(&self) -> &str {
        self.request
            .messages
            .first()
            .and_then(|m| m.content.as_ref())
            .and_then(|c| c.as_str())
            .unwrap_or_default()
    }

    /// Answer with a 200 JSON body.
    pub fn respond(self, body: &str) {
        self.respond_with(ForwardedResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: futures_util::stream::iter(vec![Ok(Bytes::from(body.to_string()))]).boxed(),
        });
    }

    pub fn respond_with(self, response: ForwardedResponse) {
        let _ = self.reply.send(Ok(response));
    }

    pub fn fail(self, error: ForwardError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Forwarder whose every call is handed to the test over a channel.
///
/// Dropping a [`ForwardCall`] without answering fails the forward with a
/// connection error.
pub struct ScriptedForwarder {
    calls: mpsc::UnboundedSender<ForwardCall>,
}

impl ScriptedForwarder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ForwardCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Self { calls }, rx)
    }
}

#[async_trait]
impl Forwarder for ScriptedForwarder {
    async fn forward(
        &self,
        target: &BackendTarget,
        request: &ChatCompletionRequest,
    ) -> Result<ForwardedResponse, ForwardError> {
        let (reply, answer) = oneshot::channel();
        let call = ForwardCall {
            target: target.clone(),
            request: request.clone(),
            reply,
        };
        self.calls
            .send(call)
            .map_err(|_| ForwardError::Connection("test harness gone".to_string()))?;
        answer
            .await
            .unwrap_or_else(|_| Err(ForwardError::Connection("call dropped".to_string())))
    }
}
