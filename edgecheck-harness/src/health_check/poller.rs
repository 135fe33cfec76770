//! Waits for the edge to route traffic to a given backend.
//!
//! The edge decides backend health from its own periodic probes, so after a
//! backend comes up there is a delay before traffic reaches it. The poller
//! sends fresh uncacheable requests one at a time and looks at which backend
//! answered.

use edgecheck_core::{ConvergencePolicy, HarnessError, UniqueRequestFactory};
use tracing::{debug, info};

use crate::client::{EdgeClient, EdgeRequest};

/// Polls the edge until the identity header names the expected backend.
#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    client: EdgeClient,
    requests: UniqueRequestFactory,
    policy: ConvergencePolicy,
}

impl ConvergencePoller {
    /// A poller using the default policy.
    pub fn new(client: EdgeClient, requests: UniqueRequestFactory) -> Self {
        Self::with_policy(client, requests, ConvergencePolicy::default())
    }

    /// A poller with an explicit retry budget.
    pub fn with_policy(
        client: EdgeClient,
        requests: UniqueRequestFactory,
        policy: ConvergencePolicy,
    ) -> Self {
        Self {
            client,
            requests,
            policy,
        }
    }

    /// Retry budget in use.
    pub fn policy(&self) -> &ConvergencePolicy {
        &self.policy
    }

    /// Block until a request through the edge is answered by `expected`.
    ///
    /// Returns the number of attempts it took. A transport error ends the wait
    /// immediately: it points at the environment, not at probe timing.
    pub async fn wait_for_backend(&self, expected: &str) -> Result<u32, HarnessError> {
        info!(backend = expected, "checking health");

        for attempt in 0..=self.policy.max_retries {
            let request = EdgeRequest::get(self.requests.unique_url());
            let response = self.client.round_trip(&request).await?;
            let served_by = response.backend_name();

            if served_by == Some(expected) {
                if attempt != 0 {
                    // Probe state may not have reached every edge node yet.
                    tokio::time::sleep(self.policy.propagation_grace).await;
                }
                info!(backend = expected, attempts = attempt + 1, "backend is up");
                return Ok(attempt + 1);
            }

            debug!(
                backend = expected,
                attempt = attempt + 1,
                served_by = served_by.unwrap_or("-"),
                status = response.status.as_u16(),
                "edge not routing to backend yet"
            );
            tokio::time::sleep(self.policy.attempt_interval).await;
        }

        Err(HarnessError::NotConverged {
            backend: expected.to_string(),
            attempts: self.policy.max_retries,
        })
    }
}
