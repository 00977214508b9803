//! Configuration types.

use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many recent history entries are handed to the extraction oracle.
    pub context_window: usize,
    /// Upper bound on a single extraction call. Past it the turn falls back
    /// to deterministic extraction.
    pub extraction_timeout: Duration,
    /// Upper bound on a single persistence call made by the engine. Past it
    /// the turn proceeds and the failure is logged.
    pub persistence_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: 5,
            extraction_timeout: Duration::from_secs(20),
            persistence_timeout: Duration::from_secs(5),
        }
    }
}
