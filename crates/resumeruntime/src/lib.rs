//! Durable run execution runtime
//!
//! This crate provides the engine that executes workflow programs durably:
//! the step executor (`RunContext`), the hook registry, the run manager that
//! owns run lifecycle, and the agent loop that turns model tool calls into
//! steps and hooks.

mod agent;
mod config;
mod context;
mod handle;
mod hooks;
mod manager;
mod workflow;

pub use agent::{AgentState, AgentTools, DurableAgent, ToolOutcome};
pub use config::RuntimeConfig;
pub use context::RunContext;
pub use handle::Activity;
pub use hooks::{Delivery, HookRegistry};
pub use manager::{RecoveryReport, RunManager, RunRef, StartedRun};
pub use workflow::{Workflow, WorkflowRegistry};
