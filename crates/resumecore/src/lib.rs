//! Core abstractions for durable runs
//!
//! This crate holds the data model every other component shares: run and step
//! records, hooks, output chunks and channels, payload schemas, the storage
//! seam, and the model-provider seam. It contains no execution logic.

mod channel;
mod chunk;
mod error;
pub mod model;
mod run;
mod schema;
pub mod store;

pub use channel::{ChannelClosed, OutputChannel};
pub use chunk::{Chunk, ChunkIndex, IndexedChunk};
pub use error::{ProviderError, RunError, StoreError, ValidationError};
pub use model::{
    FinishReason, LanguageModel, Message, ModelChunk, ModelRequest, ModelStream, ModelTurn,
    ScriptedModel, ScriptedTurn, ToolCallRequest, ToolSpec,
};
pub use run::{
    step_identity, HookRecord, HookToken, RunId, RunRecord, RunStatus, RunSummary, StepKind,
    StepRecord,
};
pub use schema::{FieldSpec, FieldType, HookPayload, PayloadSchema};
pub use store::{FileRunStore, MemoryRunStore, RunStore};

/// Result type for run operations
pub type Result<T> = std::result::Result<T, RunError>;
