//! Error types for environment and setup failures.
//!
//! Anything returned as a [`HarnessError`] means the test environment itself
//! is unusable: a port could not be bound, the edge could not be resolved or
//! reached, or the edge never converged on a backend. Assertion mismatches are
//! not errors; they are recorded on the running test case.

use std::io;
use std::time::Duration;

/// Environment and setup errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// Backend listener could not be bound.
    #[error("backend {backend} could not bind port {port}: {source}")]
    Bind {
        /// Backend name.
        backend: String,
        /// Port that was requested.
        port: u16,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// TLS material could not be loaded or generated.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// The edge hostname did not resolve to any address.
    #[error("could not resolve {host}: {reason}")]
    Resolve {
        /// Hostname that was looked up.
        host: String,
        /// Resolver failure.
        reason: String,
    },

    /// The request never produced a response.
    #[error("transport error for {url}: {reason}")]
    Transport {
        /// Target of the request.
        url: String,
        /// Transport failure.
        reason: String,
    },

    /// No response headers arrived within the header timeout.
    #[error("no response from {url} within {timeout:?}")]
    Timeout {
        /// Target of the request.
        url: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The edge never routed traffic to the expected backend.
    #[error("{backend} still not available after {attempts} attempts")]
    NotConverged {
        /// Backend the poller waited for.
        backend: String,
        /// Attempts made.
        attempts: u32,
    },

    /// A fixture file could not be used.
    #[error("fixture {path}: {reason}")]
    Fixture {
        /// Fixture path.
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl HarnessError {
    /// True for errors raised while talking to the edge or a backend.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HarnessError::Transport { .. } | HarnessError::Timeout { .. }
        )
    }
}
