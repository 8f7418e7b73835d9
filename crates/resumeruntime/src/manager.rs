//! Run manager: owns run lifecycle (start, lookup, hook delivery, resume,
//! recovery after restart, expiry).

use crate::handle::{Activity, RunHandle};
use crate::hooks::HookRegistry;
use crate::{RunContext, RuntimeConfig, Workflow, WorkflowRegistry};
use chrono::Utc;
use futures::stream::BoxStream;
use resumecore::{
    Chunk, ChunkIndex, IndexedChunk, OutputChannel, RunError, RunId, RunRecord, RunStatus,
    RunStore, RunSummary,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct ManagerInner {
    store: Arc<dyn RunStore>,
    workflows: RwLock<WorkflowRegistry>,
    runs: RwLock<HashMap<RunId, Arc<RunHandle>>>,
    hooks: HookRegistry,
    config: RuntimeConfig,
}

/// Entry point for starting, attaching to, and resuming durable runs
#[derive(Clone)]
pub struct RunManager {
    inner: Arc<ManagerInner>,
}

/// A freshly started run with a reader attached at offset 0
pub struct StartedRun {
    pub id: RunId,
    pub readable: BoxStream<'static, IndexedChunk>,
}

/// Handle to a run for attaching readers or inspecting its state
#[derive(Clone)]
pub struct RunRef {
    handle: Arc<RunHandle>,
}

/// Counts of what `recover` found in the store
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: usize,
    pub suspended: usize,
    pub finished: usize,
}

impl RunRef {
    pub fn id(&self) -> RunId {
        self.handle.id
    }

    pub fn workflow(&self) -> &str {
        &self.handle.workflow
    }

    /// Attach a reader starting at `from`.
    pub fn readable(&self, from: ChunkIndex) -> BoxStream<'static, IndexedChunk> {
        self.handle.channel.read(from)
    }

    pub fn channel(&self) -> &OutputChannel {
        &self.handle.channel
    }

    pub async fn status(&self) -> RunStatus {
        self.handle.lock().await.record.status
    }

    pub async fn summary(&self) -> RunSummary {
        let chunks = self.handle.channel.len().await;
        self.handle.lock().await.record.summary(chunks)
    }

    pub async fn record(&self) -> RunRecord {
        self.handle.lock().await.record.clone()
    }

    /// Wait until no executor is working on the run: it completed, failed, or
    /// parked on a hook.
    pub async fn settled(&self) -> Activity {
        let mut activity = self.handle.activity();
        loop {
            let current = *activity.borrow_and_update();
            if current.is_settled() {
                return current;
            }
            if activity.changed().await.is_err() {
                return current;
            }
        }
    }
}

impl RunManager {
    pub fn new(store: Arc<dyn RunStore>, config: RuntimeConfig) -> Self {
        Self::with_registry(store, WorkflowRegistry::new(), config)
    }

    pub fn with_registry(
        store: Arc<dyn RunStore>,
        workflows: WorkflowRegistry,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                workflows: RwLock::new(workflows),
                runs: RwLock::new(HashMap::new()),
                hooks: HookRegistry::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.inner.hooks
    }

    pub async fn register(&self, workflow: Arc<dyn Workflow>) {
        self.inner.workflows.write().await.register(workflow);
    }

    pub async fn workflow_names(&self) -> Vec<String> {
        self.inner.workflows.read().await.names()
    }

    /// Allocate a run, persist it, and begin executing `workflow` with `input`.
    pub async fn start(
        &self,
        workflow: &str,
        input: serde_json::Value,
        owner: Option<String>,
    ) -> Result<StartedRun, RunError> {
        self.inner.workflows.read().await.get(workflow)?;

        let record = RunRecord::new(workflow, input, owner);
        let id = record.id;
        self.inner.store.save_run(&record).await?;

        let handle = Arc::new(RunHandle::new(
            record,
            OutputChannel::new(),
            self.inner.store.clone(),
        ));
        self.inner.runs.write().await.insert(id, handle.clone());
        let readable = handle.channel.read(0);

        {
            let mut state = handle.lock().await;
            handle
                .update(&mut state, |state| {
                    state.driving = true;
                    Ok(())
                })
                .await?;
        }
        tracing::info!("Started run {} of workflow {}", id, workflow);
        self.spawn_drive(handle);

        Ok(StartedRun { id, readable })
    }

    /// Look up a run, loading it from the store if this process has not seen it.
    pub async fn get(&self, id: RunId) -> Result<RunRef, RunError> {
        if let Some(handle) = self.inner.runs.read().await.get(&id) {
            return Ok(RunRef {
                handle: handle.clone(),
            });
        }
        let handle = self.load(id).await?;
        Ok(RunRef { handle })
    }

    pub async fn status(&self, id: RunId) -> Result<RunSummary, RunError> {
        Ok(self.get(id).await?.summary().await)
    }

    /// Deliver an external payload to the hook identified by `token`.
    pub async fn resolve_hook(
        &self,
        token: &str,
        payload: serde_json::Value,
    ) -> Result<RunId, RunError> {
        let run_id = self
            .inner
            .hooks
            .owner_of(token)
            .await
            .ok_or_else(|| RunError::UnknownHook(token.to_string()))?;
        let handle = self.get(run_id).await?.handle;

        let delivery = self.inner.hooks.deliver(&handle, token, payload).await?;
        if delivery.wake {
            tracing::info!("Resuming run {} after hook {}", run_id, token);
            self.spawn_drive(handle);
        }
        Ok(run_id)
    }

    /// Re-drive a run that is marked running but has no executor, e.g. after
    /// the previous process died mid-run. Returns whether a drive was started.
    pub async fn resume(&self, id: RunId) -> Result<bool, RunError> {
        let handle = self.get(id).await?.handle;
        let claimed = {
            let mut state = handle.lock().await;
            if state.record.status != RunStatus::Running || state.driving {
                false
            } else {
                handle
                    .update(&mut state, |state| {
                        state.driving = true;
                        Ok(())
                    })
                    .await?;
                true
            }
        };
        if claimed {
            tracing::info!("Re-driving run {}", id);
            self.spawn_drive(handle);
        }
        Ok(claimed)
    }

    /// Load every stored run: re-drive the ones that were running, re-index
    /// hook tokens of suspended ones, and keep finished ones attachable.
    pub async fn recover(&self) -> Result<RecoveryReport, RunError> {
        let mut report = RecoveryReport::default();
        for id in self.inner.store.list_runs().await? {
            let status = self.get(id).await?.status().await;
            match status {
                RunStatus::Running => {
                    if self.resume(id).await? {
                        report.resumed += 1;
                    }
                }
                RunStatus::Suspended => report.suspended += 1,
                RunStatus::Completed | RunStatus::Failed => report.finished += 1,
            }
        }
        tracing::info!(
            "Recovered runs: {} resumed, {} suspended, {} finished",
            report.resumed,
            report.suspended,
            report.finished
        );
        Ok(report)
    }

    /// Drop finished runs older than the configured TTL from memory and store.
    pub async fn prune_expired(&self) -> Result<usize, RunError> {
        let ttl = chrono::Duration::from_std(self.inner.config.run_ttl)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let now = Utc::now();

        let mut expired = Vec::new();
        for id in self.inner.store.list_runs().await? {
            let live = self.inner.runs.read().await.get(&id).cloned();
            let record = match live {
                Some(handle) => Some(handle.lock().await.record.clone()),
                None => self.inner.store.load_run(id).await?,
            };
            if let Some(record) = record {
                if record.status.is_terminal() && record.updated_at + ttl <= now {
                    expired.push(id);
                }
            }
        }

        for id in &expired {
            self.inner.runs.write().await.remove(id);
            self.inner.hooks.forget_run(*id).await;
            self.inner.store.delete_run(*id).await?;
            tracing::debug!("Pruned expired run {}", id);
        }
        Ok(expired.len())
    }

    /// Prune on an interval until `shutdown` fires.
    pub async fn run_pruner(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.prune_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.prune_expired().await {
                        tracing::warn!("Pruning runs failed: {}", e);
                    }
                }
            }
        }
    }

    async fn load(&self, id: RunId) -> Result<Arc<RunHandle>, RunError> {
        let record = self
            .inner
            .store
            .load_run(id)
            .await?
            .ok_or(RunError::RunNotFound(id))?;
        let chunks = self.inner.store.load_chunks(id).await?;
        let closed = record.status.is_terminal();
        let channel = OutputChannel::restore(chunks.into_iter().map(|c| c.chunk).collect(), closed);

        // Resolved tokens too, so a late second resolution is still rejected.
        for token in record.hooks.keys() {
            self.inner.hooks.index(token.clone(), id).await;
        }

        let handle = Arc::new(RunHandle::new(record, channel, self.inner.store.clone()));
        let mut runs = self.inner.runs.write().await;
        // Another caller may have loaded it while we were reading the store.
        let handle = runs.entry(id).or_insert(handle).clone();
        Ok(handle)
    }

    fn spawn_drive(&self, handle: Arc<RunHandle>) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.drive(handle).await;
        });
    }

    /// Execute the run's program until it completes, fails, or parks on a hook.
    /// The caller must have set `driving` on the run.
    async fn drive(&self, handle: Arc<RunHandle>) {
        let workflow = match self.inner.workflows.read().await.get(&handle.workflow) {
            Ok(workflow) => workflow,
            Err(e) => {
                self.finish(&handle, Err(e)).await;
                return;
            }
        };

        loop {
            let ctx = RunContext::new(handle.clone(), self.inner.hooks.clone());
            let result = workflow.run(&ctx, handle.input.clone()).await;

            match result {
                Err(RunError::Suspended { token }) => {
                    let mut state = handle.lock().await;
                    let resolved = state
                        .record
                        .hooks
                        .get(&token)
                        .is_some_and(|hook| hook.is_resolved());
                    if resolved {
                        // Resolution landed while this drive was on its way to suspend.
                        continue;
                    }
                    state.record.transition(RunStatus::Suspended);
                    state.record.awaiting = Some(token.clone());
                    state.driving = false;
                    if let Err(e) = handle.commit(&mut state).await {
                        tracing::error!("Failed to persist suspension of run {}: {}", handle.id, e);
                    }
                    tracing::info!("Run {} suspended awaiting hook {}", handle.id, token);
                    return;
                }
                other => {
                    self.finish(&handle, other).await;
                    return;
                }
            }
        }
    }

    /// Record the outcome and end the output with a terminal chunk.
    async fn finish(&self, handle: &RunHandle, result: Result<serde_json::Value, RunError>) {
        let (status, output, error) = match result {
            Ok(output) => (RunStatus::Completed, Some(output), None),
            Err(e) => (RunStatus::Failed, None, Some(e.to_string())),
        };

        // The end marker goes after everything already in the channel, even
        // when the drive stopped while still replaying earlier output. A
        // marker left by a drive that died before saving its outcome is kept.
        let len = handle.channel.len().await;
        let ended = match len.checked_sub(1) {
            Some(last) => handle
                .channel
                .snapshot(last)
                .await
                .iter()
                .any(|c| matches!(c.chunk, Chunk::StreamEnd { .. })),
            None => false,
        };
        let end = Chunk::StreamEnd {
            error: error.clone(),
        };
        let written = if ended {
            Ok(())
        } else {
            handle.publish(len, end).await
        };
        if let Err(e) = written {
            tracing::error!("Failed to write end of stream for run {}: {}", handle.id, e);
        }

        {
            let mut state = handle.lock().await;
            state.record.output = output;
            state.record.error = error.clone();
            state.record.transition(status);
            state.driving = false;
            if let Err(e) = handle.commit(&mut state).await {
                tracing::error!("Failed to persist final state of run {}: {}", handle.id, e);
            }
        }
        // Closed last, so a reader that sees the end also sees the final status.
        handle.channel.close().await;

        match error {
            None => tracing::info!("Run {} completed", handle.id),
            Some(e) => tracing::error!("Run {} failed: {}", handle.id, e),
        }
    }
}
