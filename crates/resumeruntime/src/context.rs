//! Step executor: the run context threaded through a workflow program.

use crate::handle::RunHandle;
use crate::hooks::HookRegistry;
use chrono::{DateTime, Utc};
use resumecore::{
    step_identity, Chunk, HookPayload, RunError, RunId, StepKind, StepRecord,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Execution context of one drive of a run.
///
/// A fresh context is built every time the program is (re-)driven. It walks
/// the run's step log in program order: a step whose position is already
/// recorded returns the recorded result, and only new positions execute.
/// Steps of one run are sequential; do not run two steps of the same context
/// concurrently.
pub struct RunContext {
    handle: Arc<RunHandle>,
    hooks: HookRegistry,
    /// Next step position.
    step_cursor: AtomicUsize,
    /// Index the next chunk written by the program will get.
    write_cursor: AtomicU64,
    /// Chunks written by the last step body that failed.
    failed_writes: AtomicU64,
}

impl RunContext {
    pub(crate) fn new(handle: Arc<RunHandle>, hooks: HookRegistry) -> Self {
        Self {
            handle,
            hooks,
            step_cursor: AtomicUsize::new(0),
            write_cursor: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.handle.id
    }

    pub async fn owner(&self) -> Option<String> {
        self.handle.lock().await.record.owner.clone()
    }

    /// Number of step positions this drive has passed so far.
    pub fn position(&self) -> usize {
        self.step_cursor.load(Ordering::SeqCst)
    }

    /// Run `body` at most once per program position.
    ///
    /// If the log holds a record for this position its result is returned and
    /// `body` is not called. Otherwise `body` runs, and its result is appended
    /// to the log before being returned. A failing body leaves no record and
    /// does not consume the position, unless the program keeps the failure
    /// with [`RunContext::record_failure`].
    pub async fn step<I, O, F, Fut>(&self, name: &str, input: I, body: F) -> Result<O, RunError>
    where
        I: Serialize + Send,
        O: Serialize + DeserializeOwned + Send,
        F: FnOnce(I) -> Fut + Send,
        Fut: Future<Output = Result<O, RunError>> + Send,
    {
        self.run_step(name, StepKind::Step, input, body).await
    }

    /// Durable sleep. The deadline is recorded as a step, so a re-driven run
    /// only waits for whatever is left of the original duration.
    pub async fn sleep(&self, duration: Duration) -> Result<(), RunError> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let deadline: DateTime<Utc> = self
            .run_step("sleep", StepKind::Sleep, millis, |millis| async move {
                let deadline = chrono::Duration::from_std(Duration::from_millis(millis))
                    .ok()
                    .and_then(|delta| Utc::now().checked_add_signed(delta));
                Ok(deadline.unwrap_or(DateTime::<Utc>::MAX_UTC))
            })
            .await?;

        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if !remaining.is_zero() {
            tracing::debug!("Run {} sleeping {:?}", self.handle.id, remaining);
            tokio::time::sleep(remaining).await;
        }
        Ok(())
    }

    /// Await an externally delivered payload for `token`.
    ///
    /// Returns `RunError::Suspended` when no resolution exists yet; the caller
    /// must propagate it so the run parks. Once resolved, the value is recorded
    /// in the step log like any other step result.
    pub async fn hook<T: HookPayload>(&self, token: &str) -> Result<T, RunError> {
        let name = format!("hook:{}", token);
        let position = self.position();

        if let Some(value) = self.replayed(position, &name, StepKind::Hook).await? {
            return Ok(serde_json::from_value(value)?);
        }

        let resolution = self
            .hooks
            .create(&self.handle, token, T::schema())
            .await?;
        let Some(value) = resolution else {
            return Err(RunError::Suspended {
                token: token.to_string(),
            });
        };

        let payload: T = serde_json::from_value(value.clone())?;
        self.record(StepRecord {
            position,
            name,
            kind: StepKind::Hook,
            input: serde_json::Value::String(token.to_string()),
            result: value,
            chunks_written: 0,
            completed_at: Utc::now(),
        })
        .await?;
        Ok(payload)
    }

    /// Record that the program handled a failed step, so the position it
    /// occupied stays taken on replay.
    ///
    /// A re-driven program reaching the failed step again gets the recorded
    /// failure back without running the body, and the call to this method
    /// then returns the recorded message instead of `message`.
    pub async fn record_failure(&self, name: &str, message: String) -> Result<String, RunError> {
        let position = self.position();
        if let Some(value) = self.replayed(position, name, StepKind::Failure).await? {
            return Ok(serde_json::from_value(value)?);
        }

        self.record(StepRecord {
            position,
            name: name.to_string(),
            kind: StepKind::Failure,
            input: serde_json::Value::Null,
            result: serde_json::Value::String(message.clone()),
            chunks_written: self.failed_writes.swap(0, Ordering::SeqCst),
            completed_at: Utc::now(),
        })
        .await?;
        Ok(message)
    }

    /// Write a chunk to the run's output channel.
    ///
    /// Writes are replayed like steps: a chunk at an index the channel already
    /// holds was emitted by an earlier drive and is skipped.
    pub async fn write(&self, chunk: Chunk) -> Result<(), RunError> {
        let index = self.write_cursor.fetch_add(1, Ordering::SeqCst);
        self.handle.publish(index, chunk).await
    }

    async fn run_step<I, O, F, Fut>(
        &self,
        name: &str,
        kind: StepKind,
        input: I,
        body: F,
    ) -> Result<O, RunError>
    where
        I: Serialize + Send,
        O: Serialize + DeserializeOwned + Send,
        F: FnOnce(I) -> Fut + Send,
        Fut: Future<Output = Result<O, RunError>> + Send,
    {
        let position = self.position();
        if let Some(value) = self.replayed(position, name, kind).await? {
            return Ok(serde_json::from_value(value)?);
        }

        let input_value = serde_json::to_value(&input)?;
        let writes_before = self.write_cursor.load(Ordering::SeqCst);
        tracing::debug!(
            "Run {} executing step {}",
            self.handle.id,
            step_identity(position, name)
        );

        let output = match body(input).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    "Run {} step {} failed: {}",
                    self.handle.id,
                    step_identity(position, name),
                    e
                );
                let written = self.write_cursor.load(Ordering::SeqCst) - writes_before;
                self.failed_writes.store(written, Ordering::SeqCst);
                return Err(e);
            }
        };

        let result = serde_json::to_value(&output)?;
        self.record(StepRecord {
            position,
            name: name.to_string(),
            kind,
            input: input_value,
            result,
            chunks_written: self.write_cursor.load(Ordering::SeqCst) - writes_before,
            completed_at: Utc::now(),
        })
        .await?;
        Ok(output)
    }

    /// Look up a recorded result for `position`, advancing both cursors past it.
    async fn replayed(
        &self,
        position: usize,
        name: &str,
        kind: StepKind,
    ) -> Result<Option<serde_json::Value>, RunError> {
        let state = self.handle.lock().await;
        let Some(record) = state.record.step_at(position) else {
            return Ok(None);
        };
        if record.kind == StepKind::Failure && kind != StepKind::Failure {
            tracing::debug!("Run {} replayed failure {}", self.handle.id, record.identity());
            let message = record.result.as_str().unwrap_or_default();
            return Err(RunError::step_failure(name, message));
        }
        if record.name != name || record.kind != kind {
            return Err(RunError::NonDeterministic {
                position,
                expected: record.name.clone(),
                found: name.to_string(),
            });
        }

        tracing::debug!("Run {} replayed step {}", self.handle.id, record.identity());
        self.write_cursor
            .fetch_add(record.chunks_written, Ordering::SeqCst);
        self.step_cursor.store(position + 1, Ordering::SeqCst);
        Ok(Some(record.result.clone()))
    }

    async fn record(&self, record: StepRecord) -> Result<(), RunError> {
        let position = record.position;
        let mut state = self.handle.lock().await;
        self.handle
            .update(&mut state, |state| {
                let len = state.record.steps.len();
                if state.record.push_step(record) {
                    Ok(())
                } else {
                    Err(RunError::step_failure(
                        "step log",
                        format!("position {} does not follow log of length {}", position, len),
                    ))
                }
            })
            .await?;
        self.step_cursor.store(position + 1, Ordering::SeqCst);
        Ok(())
    }
}
