//! Conversation types and the model-provider seam.

use crate::ProviderError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, rename = "toolCalls", skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    #[serde(rename_all = "camelCase")]
    Tool {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Tool advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    TextDelta(String),
    ToolCall(ToolCallRequest),
    Finish(FinishReason),
}

/// One complete model response, assembled from its chunks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish: FinishReason,
}

pub type ModelStream = BoxStream<'static, Result<ModelChunk, ProviderError>>;

/// LLM completion/tool-calling provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ProviderError>;
}

/// One canned model response
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScriptedTurn {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Model that answers from a fixed script.
///
/// The turn is picked by counting assistant messages already in the request,
/// so a fresh instance (e.g. after a restart) continues where the conversation is.
pub struct ScriptedModel {
    turns: Vec<ScriptedTurn>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times the provider was actually called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let turn_index = request.messages.iter().filter(|m| m.is_assistant()).count();
        let turn = self
            .turns
            .get(turn_index)
            .cloned()
            .ok_or(ProviderError::ScriptExhausted(self.turns.len()))?;

        let mut chunks: Vec<Result<ModelChunk, ProviderError>> = split_words(&turn.text)
            .into_iter()
            .map(|delta| Ok(ModelChunk::TextDelta(delta)))
            .collect();
        let finish = if turn.tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        chunks.extend(turn.tool_calls.into_iter().map(|c| Ok(ModelChunk::ToolCall(c))));
        chunks.push(Ok(ModelChunk::Finish(finish)));

        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Split text into word-sized deltas that concatenate back to the input.
fn split_words(text: &str) -> Vec<String> {
    let mut deltas = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch == ' ' {
            deltas.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        deltas.push(current);
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_words_round_trips() {
        let deltas = split_words("Looking up flights now");
        assert_eq!(deltas, vec!["Looking ", "up ", "flights ", "now"]);
        assert_eq!(deltas.concat(), "Looking up flights now");
        assert!(split_words("").is_empty());
    }
}
