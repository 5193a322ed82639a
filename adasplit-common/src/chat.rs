//! OpenAI-compatible chat completion request, carried through the router opaquely.
//!
//! The router only looks at message contents (to estimate cost). Every other
//! field, known or not, is preserved and forwarded to the backend unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// OpenAI-compatible chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Missing `messages` reads as empty and costs nothing.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether the backend should stream the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Backend-specific fields (temperature, max_tokens, tools, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Plain text, an array of content parts, or absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatMessage {
    /// Build a plain text message.
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: Some(role.to_string()),
            content: Some(Value::String(content.into())),
            extra: Map::new(),
        }
    }

    /// Number of characters of textual content in this message.
    ///
    /// Strings count their characters, content-part arrays count the `text`
    /// of each part, and any other JSON value counts its serialized form.
    pub fn content_chars(&self) -> usize {
        match &self.content {
            None | Some(Value::Null) => 0,
            Some(Value::String(text)) => text.chars().count(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .map(|text| text.chars().count())
                .sum(),
            Some(other) => other.to_string().chars().count(),
        }
    }
}

impl ChatCompletionRequest {
    /// Build a request with the given messages and no extra fields.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            stream: None,
            extra: Map::new(),
        }
    }
}
