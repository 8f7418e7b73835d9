//! Hook registry: durable suspension points resolved from outside the run.

use crate::handle::RunHandle;
use chrono::Utc;
use resumecore::{HookRecord, HookToken, PayloadSchema, RunError, RunId, RunStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of delivering a hook payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub run_id: RunId,
    /// The run was parked on this hook and now needs an executor.
    pub wake: bool,
}

/// Maps hook tokens to the run that owns them. Hook state itself lives in the
/// owning run's record so it is persisted with the run.
#[derive(Clone, Default)]
pub struct HookRegistry {
    tokens: Arc<RwLock<HashMap<HookToken, RunId>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn owner_of(&self, token: &str) -> Option<RunId> {
        self.tokens.read().await.get(token).copied()
    }

    /// Re-index a token for a run loaded from the store.
    pub(crate) async fn index(&self, token: HookToken, run_id: RunId) {
        self.tokens.write().await.insert(token, run_id);
    }

    pub(crate) async fn forget_run(&self, run_id: RunId) {
        self.tokens.write().await.retain(|_, owner| *owner != run_id);
    }

    /// Register a pending hook for `token` on the run, or find the existing one.
    ///
    /// Returns the stored resolution when the hook was already resolved, which
    /// makes consuming a hook idempotent under replay.
    pub(crate) async fn create(
        &self,
        handle: &RunHandle,
        token: &str,
        schema: PayloadSchema,
    ) -> Result<Option<serde_json::Value>, RunError> {
        {
            let mut tokens = self.tokens.write().await;
            match tokens.get(token) {
                Some(owner) if *owner != handle.id => {
                    return Err(RunError::step_failure(
                        format!("hook:{}", token),
                        format!("token already belongs to run {}", owner),
                    ));
                }
                Some(_) => {}
                None => {
                    tokens.insert(token.to_string(), handle.id);
                }
            }
        }

        let mut state = handle.lock().await;
        if let Some(existing) = state.record.hooks.get(token) {
            return Ok(existing.resolution.clone());
        }

        handle
            .update(&mut state, |state| {
                state
                    .record
                    .hooks
                    .insert(token.to_string(), HookRecord::new(token, schema));
                Ok(())
            })
            .await?;
        tracing::info!("Run {} created hook {}", handle.id, token);
        Ok(None)
    }

    /// Validate and store a resolution. The first resolution wins; later ones
    /// fail with `AlreadyResolved` and leave the stored value untouched.
    ///
    /// When the run is parked on this token it is flipped back to running here,
    /// under the run lock, and the caller must start an executor for it.
    pub(crate) async fn deliver(
        &self,
        handle: &RunHandle,
        token: &str,
        payload: serde_json::Value,
    ) -> Result<Delivery, RunError> {
        let mut state = handle.lock().await;
        let wake = handle
            .update(&mut state, |state| {
                let hook = state
                    .record
                    .hooks
                    .get_mut(token)
                    .ok_or_else(|| RunError::UnknownHook(token.to_string()))?;

                if hook.is_resolved() {
                    return Err(RunError::AlreadyResolved(token.to_string()));
                }
                hook.schema.validate(&payload)?;
                hook.resolution = Some(payload);
                hook.resolved_at = Some(Utc::now());

                let wake = state.record.status == RunStatus::Suspended
                    && state.record.awaiting.as_deref() == Some(token)
                    && !state.driving;
                if wake {
                    state.record.transition(RunStatus::Running);
                    state.driving = true;
                }
                Ok(wake)
            })
            .await?;

        tracing::info!("Hook {} resolved for run {} (wake: {})", token, handle.id, wake);
        Ok(Delivery {
            run_id: handle.id,
            wake,
        })
    }
}
