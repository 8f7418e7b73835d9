use crate::FlightTools;
use async_trait::async_trait;
use resumecore::{LanguageModel, Message, RunError};
use resumeruntime::{DurableAgent, RunContext, Workflow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CHAT_WORKFLOW: &str = "chat";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful flight booking assistant. Use the provided tools to search for flights and book them.";

/// Input of a chat run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub messages: Vec<Message>,
}

/// The flight-booking assistant as a durable workflow
pub struct ChatWorkflow {
    model: Arc<dyn LanguageModel>,
    tools: FlightTools,
    system: String,
    max_steps: usize,
}

impl ChatWorkflow {
    pub fn new(model: Arc<dyn LanguageModel>, tools: FlightTools) -> Self {
        Self {
            model,
            tools,
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: 10,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[async_trait]
impl Workflow for ChatWorkflow {
    fn name(&self) -> &str {
        CHAT_WORKFLOW
    }

    async fn run(
        &self,
        ctx: &RunContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, RunError> {
        let input: ChatInput = serde_json::from_value(input)?;
        tracing::debug!(
            "Run {} chat with {} messages on {}",
            ctx.run_id(),
            input.messages.len(),
            self.model.model_id()
        );

        let agent = DurableAgent::new(self.model.clone(), self.tools.clone())
            .with_system(self.system.clone())
            .with_max_steps(self.max_steps);
        let history = agent.stream(ctx, input.messages).await?;

        let reply = history
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::Assistant { content, .. } if !content.is_empty() => Some(content.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(serde_json::json!({ "reply": reply, "messages": history }))
    }
}
