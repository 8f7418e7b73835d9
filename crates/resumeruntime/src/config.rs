use std::time::Duration;

/// Configuration for the run manager and the agent loop
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on model turns per agent invocation.
    pub max_agent_steps: usize,
    /// How long a completed or failed run stays attachable. Running and
    /// suspended runs never expire.
    pub run_ttl: Duration,
    /// Interval of the background pruning task.
    pub prune_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_agent_steps: 10,
            run_ttl: Duration::from_secs(60 * 60),
            prune_interval: Duration::from_secs(60),
        }
    }
}
