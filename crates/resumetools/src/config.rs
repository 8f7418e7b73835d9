use std::time::Duration;

/// Tunables for the flight-booking tools
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Simulated latency of a flight search.
    pub search_latency: Duration,
    /// Durable pause after `fetchData` has fetched its URL.
    pub fetch_delay: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            search_latency: Duration::from_secs(1),
            fetch_delay: Duration::from_secs(5),
        }
    }
}

impl ToolConfig {
    /// No artificial delays. Used by tests and the CLI.
    pub fn instant() -> Self {
        Self {
            search_latency: Duration::ZERO,
            fetch_delay: Duration::ZERO,
        }
    }
}
