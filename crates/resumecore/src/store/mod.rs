//! Durable storage for run records and their output chunks.

mod file;
mod memory;

pub use file::FileRunStore;
pub use memory::MemoryRunStore;

use crate::{IndexedChunk, RunId, RunRecord, StoreError};
use async_trait::async_trait;

/// Backend that keeps runs alive across process restarts.
///
/// Chunks are appended separately from the run record so streaming output does
/// not rewrite the whole record on every token.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    async fn load_run(&self, id: RunId) -> Result<Option<RunRecord>, StoreError>;

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError>;

    async fn append_chunk(&self, id: RunId, chunk: &IndexedChunk) -> Result<(), StoreError>;

    async fn load_chunks(&self, id: RunId) -> Result<Vec<IndexedChunk>, StoreError>;

    async fn delete_run(&self, id: RunId) -> Result<(), StoreError>;
}
