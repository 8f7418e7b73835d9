use resumecore::{
    Chunk, ChunkIndex, IndexedChunk, OutputChannel, RunError, RunId, RunRecord, RunStatus,
    RunStore,
};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Mutable part of a live run. `driving` is held under the same lock as the
/// record so suspension and hook delivery cannot miss each other.
pub(crate) struct RunState {
    pub record: RunRecord,
    pub driving: bool,
}

/// Observable activity of a run: its status and whether an executor owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    pub status: RunStatus,
    pub driving: bool,
}

impl Activity {
    /// No executor is working on the run and none will start on its own.
    pub fn is_settled(&self) -> bool {
        !self.driving
    }
}

/// A run loaded into this process: persisted state, output channel, store.
pub(crate) struct RunHandle {
    pub id: RunId,
    pub workflow: String,
    pub input: serde_json::Value,
    state: Mutex<RunState>,
    pub channel: OutputChannel,
    pub store: Arc<dyn RunStore>,
    publish: Mutex<()>,
    activity: watch::Sender<Activity>,
}

impl RunHandle {
    pub fn new(record: RunRecord, channel: OutputChannel, store: Arc<dyn RunStore>) -> Self {
        let (activity, _) = watch::channel(Activity {
            status: record.status,
            driving: false,
        });
        Self {
            id: record.id,
            workflow: record.workflow.clone(),
            input: record.input.clone(),
            state: Mutex::new(RunState {
                record,
                driving: false,
            }),
            channel,
            store,
            publish: Mutex::new(()),
            activity,
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().await
    }

    /// Persist the record and broadcast the new activity. Call with the state lock held.
    pub async fn commit(&self, state: &mut RunState) -> Result<(), RunError> {
        state.record.touch();
        self.store.save_run(&state.record).await?;
        self.activity.send_replace(Activity {
            status: state.record.status,
            driving: state.driving,
        });
        Ok(())
    }

    /// Apply `change` to the state and persist it. If either fails, the
    /// in-memory state is put back so it keeps matching the store.
    pub async fn update<R>(
        &self,
        state: &mut RunState,
        change: impl FnOnce(&mut RunState) -> Result<R, RunError>,
    ) -> Result<R, RunError> {
        let record = state.record.clone();
        let driving = state.driving;

        let result = match change(state) {
            Ok(result) => self.commit(state).await.map(|_| result),
            Err(e) => Err(e),
        };
        if result.is_err() {
            state.record = record;
            state.driving = driving;
        }
        result
    }

    pub fn activity(&self) -> watch::Receiver<Activity> {
        self.activity.subscribe()
    }

    /// Persist a chunk, then make it visible to readers.
    pub async fn publish(&self, index: ChunkIndex, chunk: Chunk) -> Result<(), RunError> {
        let _guard = self.publish.lock().await;
        let len = self.channel.len().await;
        if index < len {
            return Ok(());
        }
        if index > len {
            return Err(RunError::step_failure(
                "channel.write",
                format!("write cursor {} ahead of channel length {}", index, len),
            ));
        }

        let indexed = IndexedChunk { index, chunk };
        self.store.append_chunk(self.id, &indexed).await?;
        self.channel.write(indexed.chunk).await.map_err(|e| {
            RunError::step_failure("channel.write", e.to_string())
        })?;
        Ok(())
    }
}
