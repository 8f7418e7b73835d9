use crate::PayloadSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type RunId = Uuid;

/// Stable identifier of a hook, e.g. the id of the tool call that created it.
pub type HookToken = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Suspended)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Suspended, RunStatus::Running)
                | (RunStatus::Suspended, RunStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Suspended => write!(f, "suspended"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// An ordinary step body.
    Step,
    /// A consumed hook resolution.
    Hook,
    /// A durable sleep; the recorded result is the wake-up deadline.
    Sleep,
    /// A step failure the program handled; the recorded result is the message.
    Failure,
}

/// Persisted outcome of one step invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    /// Program position; equals the record's index in the run's step log.
    pub position: usize,
    pub name: String,
    pub kind: StepKind,
    pub input: serde_json::Value,
    pub result: serde_json::Value,
    /// Chunks the body wrote to the output channel, so a replay can skip them.
    #[serde(default)]
    pub chunks_written: u64,
    pub completed_at: DateTime<Utc>,
}

impl StepRecord {
    /// Identity used to match a replayed invocation against the log.
    pub fn identity(&self) -> String {
        step_identity(self.position, &self.name)
    }
}

pub fn step_identity(position: usize, name: &str) -> String {
    format!("{}:{}", position, name)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookRecord {
    pub token: HookToken,
    pub schema: PayloadSchema,
    pub resolution: Option<serde_json::Value>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl HookRecord {
    pub fn new(token: impl Into<HookToken>, schema: PayloadSchema) -> Self {
        Self {
            token: token.into(),
            schema,
            resolution: None,
            resolved_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

/// Persisted state of one run: everything needed to re-drive it after a restart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub workflow: String,
    pub input: serde_json::Value,
    /// Caller identity, passed through untouched.
    pub owner: Option<String>,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub hooks: BTreeMap<HookToken, HookRecord>,
    /// Token the run is parked on while suspended.
    pub awaiting: Option<HookToken>,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(
        workflow: impl Into<String>,
        input: serde_json::Value,
        owner: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workflow: workflow.into(),
            input,
            owner,
            status: RunStatus::Running,
            steps: Vec::new(),
            hooks: BTreeMap::new(),
            awaiting: None,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step_at(&self, position: usize) -> Option<&StepRecord> {
        self.steps.get(position)
    }

    /// Append a completed step. The log is append-only: the record must land
    /// exactly at the end.
    pub fn push_step(&mut self, record: StepRecord) -> bool {
        if record.position != self.steps.len() {
            return false;
        }
        self.steps.push(record);
        self.touch();
        true
    }

    /// Apply a status change if the lifecycle allows it.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next != RunStatus::Suspended {
            self.awaiting = None;
        }
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self, chunks: u64) -> RunSummary {
        RunSummary {
            id: self.id,
            workflow: self.workflow.clone(),
            status: self.status,
            steps: self.steps.len(),
            chunks,
            pending_hook: self.awaiting.clone(),
            owner: self.owner.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub id: RunId,
    pub workflow: String,
    pub status: RunStatus,
    pub steps: usize,
    pub chunks: u64,
    pub pending_hook: Option<HookToken>,
    pub owner: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
