use super::RunStore;
use crate::{IndexedChunk, RunId, RunRecord, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-process store. Sharing one instance between two managers simulates a
/// restart without touching disk.
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<RunId, RunRecord>>,
    chunks: RwLock<HashMap<RunId, Vec<IndexedChunk>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load_run(&self, id: RunId) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.runs.read().await.get(&id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<RunId>, StoreError> {
        Ok(self.runs.read().await.keys().copied().collect())
    }

    async fn append_chunk(&self, id: RunId, chunk: &IndexedChunk) -> Result<(), StoreError> {
        let mut chunks = self.chunks.write().await;
        let log = chunks.entry(id).or_default();
        if chunk.index != log.len() as u64 {
            return Err(StoreError::Corrupt {
                run_id: id,
                reason: format!(
                    "chunk index {} appended after {} chunks",
                    chunk.index,
                    log.len()
                ),
            });
        }
        log.push(chunk.clone());
        Ok(())
    }

    async fn load_chunks(&self, id: RunId) -> Result<Vec<IndexedChunk>, StoreError> {
        Ok(self.chunks.read().await.get(&id).cloned().unwrap_or_default())
    }

    async fn delete_run(&self, id: RunId) -> Result<(), StoreError> {
        self.runs.write().await.remove(&id);
        self.chunks.write().await.remove(&id);
        Ok(())
    }
}
