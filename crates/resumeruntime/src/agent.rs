//! Durable agent: drives a tool-calling model over a run.
//!
//! Each model turn is a recorded step, each tool call goes through the tool
//! set (which uses steps and hooks), and every piece of output is written to
//! the run's channel as it is produced.

use crate::RunContext;
use async_trait::async_trait;
use futures::StreamExt;
use resumecore::{
    Chunk, FinishReason, LanguageModel, Message, ModelChunk, ModelRequest, ModelTurn, RunError,
    ToolCallRequest, ToolSpec,
};
use std::sync::Arc;

/// Result of one tool invocation, as fed back to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: true,
        }
    }
}

/// The set of tools an agent can call.
///
/// Implementations dispatch on the call's name and must route side effects
/// through `ctx` steps. Returning `RunError::Suspended` parks the run;
/// `StepFailure` and `Validation` errors are recorded and reported to the
/// model instead of failing the run.
#[async_trait]
pub trait AgentTools: Send + Sync {
    fn specs(&self) -> Vec<ToolSpec>;

    async fn call(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
        history: &[Message],
    ) -> Result<ToolOutcome, RunError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Modeling,
    Streaming,
    ToolDispatch,
    Suspended,
    Done,
    Failed,
}

pub struct DurableAgent<T: AgentTools> {
    model: Arc<dyn LanguageModel>,
    system: Option<String>,
    tools: T,
    max_steps: usize,
}

impl<T: AgentTools> DurableAgent<T> {
    pub fn new(model: Arc<dyn LanguageModel>, tools: T) -> Self {
        Self {
            model,
            system: None,
            tools,
            max_steps: 10,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn tools(&self) -> &T {
        &self.tools
    }

    /// Run the model/tool loop over `messages`. Returns the full conversation.
    pub async fn stream(
        &self,
        ctx: &RunContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, RunError> {
        let mut state = AgentState::Modeling;
        let result = self.run_loop(ctx, messages, &mut state).await;

        match &result {
            Ok(_) => self.transition(ctx, &mut state, AgentState::Done),
            Err(e) if e.is_suspension() => {
                self.transition(ctx, &mut state, AgentState::Suspended)
            }
            Err(_) => self.transition(ctx, &mut state, AgentState::Failed),
        }
        result
    }

    async fn run_loop(
        &self,
        ctx: &RunContext,
        mut history: Vec<Message>,
        state: &mut AgentState,
    ) -> Result<Vec<Message>, RunError> {
        let specs = self.tools.specs();

        for _ in 0..self.max_steps {
            self.transition(ctx, state, AgentState::Modeling);
            let request = ModelRequest {
                system: self.system.clone(),
                messages: history.clone(),
                tools: specs.clone(),
            };
            let turn: ModelTurn = ctx
                .step("model.turn", request, |request| self.call_model(ctx, request))
                .await?;
            if !turn.text.is_empty() {
                self.transition(ctx, state, AgentState::Streaming);
            }

            let calls = turn.tool_calls.clone();
            history.push(Message::Assistant {
                content: turn.text,
                tool_calls: turn.tool_calls,
            });
            if calls.is_empty() {
                return Ok(history);
            }

            self.transition(ctx, state, AgentState::ToolDispatch);
            for call in calls {
                ctx.write(Chunk::ToolCallStart {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    input: call.input.clone(),
                })
                .await?;

                let outcome = match self.tools.call(ctx, &call, &history).await {
                    Ok(outcome) => outcome,
                    Err(e @ (RunError::StepFailure { .. } | RunError::Validation(_))) => {
                        tracing::warn!("Tool {} failed in run {}: {}", call.name, ctx.run_id(), e);
                        let message = ctx
                            .record_failure(&format!("tool:{}", call.id), e.to_string())
                            .await?;
                        ToolOutcome::error(message)
                    }
                    Err(e) => return Err(e),
                };

                ctx.write(Chunk::ToolResult {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    output: outcome.output.clone(),
                    is_error: outcome.is_error,
                })
                .await?;
                history.push(Message::Tool {
                    tool_call_id: call.id,
                    tool_name: call.name,
                    content: outcome.output,
                });
            }
        }

        tracing::warn!(
            "Run {} stopped after {} model turns",
            ctx.run_id(),
            self.max_steps
        );
        Ok(history)
    }

    /// Stream one model response, writing text deltas as they arrive.
    async fn call_model(
        &self,
        ctx: &RunContext,
        request: ModelRequest,
    ) -> Result<ModelTurn, RunError> {
        let mut stream = self.model.stream(request).await?;
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut finish = None;

        while let Some(chunk) = stream.next().await {
            match chunk? {
                ModelChunk::TextDelta(delta) => {
                    text.push_str(&delta);
                    ctx.write(Chunk::TextDelta { delta }).await?;
                }
                ModelChunk::ToolCall(call) => tool_calls.push(call),
                ModelChunk::Finish(reason) => finish = Some(reason),
            }
        }

        let finish = finish.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });
        Ok(ModelTurn {
            text,
            tool_calls,
            finish,
        })
    }

    fn transition(&self, ctx: &RunContext, state: &mut AgentState, next: AgentState) {
        if *state != next {
            tracing::debug!("Run {} agent {:?} -> {:?}", ctx.run_id(), state, next);
            *state = next;
        }
    }
}
