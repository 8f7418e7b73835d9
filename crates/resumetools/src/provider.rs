//! OpenAI-compatible chat completions provider (streaming).

use async_trait::async_trait;
use resumecore::{
    FinishReason, LanguageModel, Message, ModelChunk, ModelRequest, ModelStream, ProviderError,
    ToolCallRequest,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Streams completions from `POST {base_url}/chat/completions`
pub struct ChatCompletionsModel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatCompletionsModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    fn body(&self, request: &ModelRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.extend(request.messages.iter().map(wire_message));

        let tools: Vec<serde_json::Value> = request
            .tools
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::Value::Array(tools);
        }
        body
    }
}

fn wire_message(message: &Message) -> serde_json::Value {
    match message {
        Message::System { content } => serde_json::json!({ "role": "system", "content": content }),
        Message::User { content } => serde_json::json!({ "role": "user", "content": content }),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut wire = serde_json::json!({ "role": "assistant", "content": content });
            if !tool_calls.is_empty() {
                wire["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        serde_json::json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.input.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            wire
        }
        Message::Tool {
            tool_call_id,
            content,
            ..
        } => serde_json::json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        tracing::info!("Calling chat completions: {} (model: {})", url, self.model);

        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&self.body(&request));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Request(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::BadResponse(format!("API returned {}: {}", status, text)));
        }

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            loop {
                let bytes = match response.chunk().await {
                    Ok(Some(bytes)) => bytes,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(ProviderError::Request(format!("Failed to read response body: {}", e)));
                        return;
                    }
                };
                match decoder.push(&bytes) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            yield Ok(chunk);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
                if decoder.is_done() {
                    break;
                }
            }
            for chunk in decoder.finish() {
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder for server-sent completion events.
///
/// Text deltas are emitted as soon as their line is complete. Tool calls
/// arrive in fragments and are emitted whole when the stream finishes.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    calls: BTreeMap<usize, PartialCall>,
    finish: Option<FinishReason>,
    done: bool,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<ModelChunk>, ProviderError> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                break;
            }

            let event: StreamEvent = serde_json::from_str(data)
                .map_err(|e| ProviderError::BadResponse(format!("Malformed stream event: {}", e)))?;
            for choice in event.choices {
                if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                    out.push(ModelChunk::TextDelta(content));
                }
                for fragment in choice.delta.tool_calls {
                    let call = self.calls.entry(fragment.index).or_default();
                    if let Some(id) = fragment.id {
                        call.id = id;
                    }
                    if let Some(function) = fragment.function {
                        if let Some(name) = function.name {
                            call.name.push_str(&name);
                        }
                        if let Some(arguments) = function.arguments {
                            call.arguments.push_str(&arguments);
                        }
                    }
                }
                if let Some(reason) = choice.finish_reason {
                    self.finish = Some(match reason.as_str() {
                        "tool_calls" => FinishReason::ToolCalls,
                        "length" => FinishReason::Length,
                        _ => FinishReason::Stop,
                    });
                }
            }
        }
        Ok(out)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    /// Flush accumulated tool calls and the finish reason.
    fn finish(&mut self) -> Vec<ModelChunk> {
        let mut out: Vec<ModelChunk> = std::mem::take(&mut self.calls)
            .into_values()
            .map(|call| {
                // Unparseable arguments are passed on as a string so the tool
                // reports them instead of the run failing.
                let input = if call.arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&call.arguments)
                        .unwrap_or(serde_json::Value::String(call.arguments))
                };
                ModelChunk::ToolCall(ToolCallRequest {
                    id: call.id,
                    name: call.name,
                    input,
                })
            })
            .collect();

        let finish = self.finish.unwrap_or(if out.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        out.push(ModelChunk::Finish(finish));
        out
    }
}
