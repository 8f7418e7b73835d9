use crate::RunContext;
use async_trait::async_trait;
use resumecore::RunError;
use std::collections::HashMap;
use std::sync::Arc;

/// A durable program.
///
/// `run` may be invoked several times for the same run: after a suspension or
/// a process restart the program is re-driven from the top, and every step it
/// already completed returns its recorded result. Anything with a side effect
/// must therefore go through [`RunContext::step`].
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Unique name, persisted with each run so recovery can find the program.
    fn name(&self) -> &str;

    async fn run(
        &self,
        ctx: &RunContext,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, RunError>;
}

/// Registry of runnable workflow programs
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<dyn Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: HashMap::new(),
        }
    }

    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        let name = workflow.name().to_string();
        tracing::info!("Registering workflow: {}", name);
        self.workflows.insert(name, workflow);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Workflow>, RunError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| RunError::UnknownWorkflow(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workflows.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
