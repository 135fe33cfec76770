//! The priority-ordered set of backends behind the edge.

use std::sync::Arc;

use edgecheck_core::{reset_plan, HarnessConfig, HarnessError, ResetStep};
use rustls::ServerConfig;
use tracing::info;

use crate::backend::BackendServer;
use crate::health_check::ConvergencePoller;
use crate::tls;

/// Origin first, then each mirror in the order the edge falls back to them.
#[derive(Debug)]
pub struct BackendFleet {
    backends: Vec<BackendServer>,
}

impl BackendFleet {
    /// A fleet of already constructed backends, in priority order.
    pub fn new(backends: Vec<BackendServer>) -> Result<Self, HarnessError> {
        if backends.is_empty() {
            return Err(HarnessError::Config("a fleet needs at least one backend".into()));
        }
        Ok(Self { backends })
    }

    /// The fleet described by `config`. No backend is started.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        let tls = backend_tls(config)?;
        let backends = config
            .fleet_layout()
            .into_iter()
            .map(|(name, port)| BackendServer::new(name, port, tls.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(backends)
    }

    /// Highest-priority backend.
    pub fn origin(&self) -> &BackendServer {
        &self.backends[0]
    }

    /// Backend at `index` in priority order.
    pub fn get(&self, index: usize) -> Option<&BackendServer> {
        self.backends.get(index)
    }

    /// Backend with the given name.
    pub fn by_name(&self, name: &str) -> Option<&BackendServer> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// All backends in priority order.
    pub fn backends(&self) -> &[BackendServer] {
        &self.backends
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Always false; a fleet has at least one backend.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Bring every backend up with its default handler and wait until the edge
    /// routes to the origin again.
    ///
    /// Backends that are already serving only get their handler reset. When a
    /// stopped one is found, everything ahead of it is stopped too, and the
    /// fleet is brought back one backend at a time from the bottom up,
    /// confirming each through the edge before moving on.
    pub async fn reset(&self, poller: &ConvergencePoller) -> Result<(), HarnessError> {
        let started: Vec<bool> = self.backends.iter().map(BackendServer::is_started).collect();

        for step in reset_plan(&started) {
            match step {
                ResetStep::ResetHandler(index) => self.backends[index].reset_handler(),
                ResetStep::Stop(index) => {
                    let backend = &self.backends[index];
                    info!(backend = backend.name(), "stopping ahead of bring-up");
                    backend.stop().await;
                }
                ResetStep::StartAndConfirm(index) => {
                    let backend = &self.backends[index];
                    backend.start().await?;
                    poller.wait_for_backend(backend.name()).await?;
                }
            }
        }

        Ok(())
    }

    /// Stop every backend.
    pub async fn stop_all(&self) {
        for backend in &self.backends {
            backend.stop().await;
        }
    }
}

fn backend_tls(config: &HarnessConfig) -> Result<Option<Arc<ServerConfig>>, HarnessError> {
    if config.disable_backend_tls {
        return Ok(None);
    }
    match (&config.backend_cert, &config.backend_key) {
        (Some(cert), Some(key)) => tls::load_tls_config(cert, key).map(Some),
        (None, None) => tls::self_signed_config().map(Some),
        _ => Err(HarnessError::Config(
            "--backend-cert and --backend-key must be given together".into(),
        )),
    }
}
