//! Backend identity models.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

/// Response header carrying the name of the backend that produced a response.
pub const BACKEND_NAME_HEADER: &str = "Backend-Name";

/// Header set on the answer to a health probe.
pub const PROBE_HEADER: &str = "PING";

/// Value of [`PROBE_HEADER`] on the answer to a health probe.
pub const PROBE_HEADER_VALUE: &str = "PONG";

/// Path probed by the edge with `HEAD` requests.
pub const PROBE_PATH: &str = "/";

/// Name of the highest-priority backend.
pub const ORIGIN_NAME: &str = "origin";

/// Names of the mirror backends, in priority order.
pub const MIRROR_NAMES: [&str; 2] = ["backup1", "backup2"];

/// Lifecycle of a backend server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    /// Created but never started.
    NotStarted = 0,
    /// Bound and serving.
    Started = 1,
    /// Was serving, listener and connections are now closed.
    Stopped = 2,
}

impl Lifecycle {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Lifecycle::Started,
            2 => Lifecycle::Stopped,
            _ => Lifecycle::NotStarted,
        }
    }
}

/// Identity of a single test backend: the name it stamps on every response,
/// the port it listens on and where it is in its lifecycle.
#[derive(Debug)]
pub struct BackendIdentity {
    name: String,
    /// Zero until the kernel assigns a port on first start.
    port: AtomicU16,
    lifecycle: AtomicU8,
}

impl BackendIdentity {
    /// Create a new identity. A port of `0` asks the kernel for one on first start.
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port: AtomicU16::new(port),
            lifecycle: AtomicU8::new(Lifecycle::NotStarted as u8),
        }
    }

    /// The marker value stamped into [`BACKEND_NAME_HEADER`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured or previously assigned port.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::Acquire)
    }

    /// Keep the port the kernel handed out so later restarts reuse it.
    pub fn remember_port(&self, port: u16) {
        let _ = self
            .port
            .compare_exchange(0, port, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    /// Move to a new lifecycle state.
    pub fn set_lifecycle(&self, state: Lifecycle) {
        self.lifecycle.store(state as u8, Ordering::Release);
    }

    /// Whether the backend is currently serving.
    pub fn is_started(&self) -> bool {
        self.lifecycle() == Lifecycle::Started
    }
}
