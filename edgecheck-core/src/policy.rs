//! Timing policy shared by the client and the convergence poller.

use std::time::Duration;

/// Maximum time to wait for response headers from the edge.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Responses slower than this are flagged on the test case.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_secs(1);

/// Attempts made before giving up on edge convergence.
pub const CONVERGENCE_MAX_RETRIES: u32 = 20;

/// Pause between two unsuccessful convergence attempts.
pub const CONVERGENCE_ATTEMPT_INTERVAL: Duration = Duration::from_secs(2);

/// Extra wait after a late match, for probe state to reach every edge node.
pub const CONVERGENCE_PROPAGATION_GRACE: Duration = Duration::from_secs(5);

/// Retry budget for waiting on the edge to route to a given backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Sleep between attempts that did not match.
    pub attempt_interval: Duration,
    /// Sleep after a match that was not the first attempt.
    pub propagation_grace: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            max_retries: CONVERGENCE_MAX_RETRIES,
            attempt_interval: CONVERGENCE_ATTEMPT_INTERVAL,
            propagation_grace: CONVERGENCE_PROPAGATION_GRACE,
        }
    }
}

impl ConvergencePolicy {
    /// Worst-case time spent polling before a failure is reported.
    pub fn worst_case(&self) -> Duration {
        self.attempt_interval * (self.max_retries + 1)
    }
}
