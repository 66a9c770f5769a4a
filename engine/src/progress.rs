//! Progress reporting for multi-step sync calls.

use serde::{Deserialize, Serialize};

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    /// What was just finished, e.g. `"SystemInfo"` or `"Event"`
    pub resource: String,
    /// Steps finished so far
    pub done: usize,
    /// Total steps of the call
    pub total: usize,
    /// Set on the final notification
    pub complete: bool,
}

impl SyncProgress {
    pub fn percentage(&self) -> Option<f64> {
        (self.total > 0).then(|| self.done as f64 * 100.0 / self.total as f64)
    }
}

/// Counts finished steps of a call with a known number of steps.
#[derive(Debug, Clone)]
pub struct ProgressManager {
    total: usize,
    done: usize,
}

impl ProgressManager {
    pub fn new(total: usize) -> Self {
        Self { total, done: 0 }
    }

    /// Record one finished step.
    pub fn increase(&mut self, resource: impl ToString, complete: bool) -> SyncProgress {
        self.done = (self.done + 1).min(self.total);
        SyncProgress {
            resource: resource.to_string(),
            done: self.done,
            total: self.total,
            complete,
        }
    }
}
