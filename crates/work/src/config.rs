//! Controller configuration.

use std::time::Duration;

/// Stage controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Quiet period before a state change is written; later changes within
    /// it replace the pending snapshot
    pub write_debounce: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            write_debounce: Duration::from_millis(500),
        }
    }
}

impl ControllerConfig {
    /// Set the write debounce.
    pub fn with_write_debounce(mut self, debounce: Duration) -> Self {
        self.write_debounce = debounce;
        self
    }
}
