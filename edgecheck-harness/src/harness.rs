//! The per-run context every scenario receives.

use std::sync::Mutex;

use edgecheck_core::{ConvergencePolicy, HarnessConfig, HarnessError, UniqueRequestFactory, Vendor};
use tracing::info;

use crate::backend::BackendServer;
use crate::client::{ClientOptions, EdgeClient, EdgeRequest, EdgeResponse};
use crate::fleet::BackendFleet;
use crate::health_check::ConvergencePoller;
use crate::report::{CaseResult, Fatal, TestCase};

/// Number of backends failover scenarios need: origin and two mirrors.
pub const FAILOVER_FLEET_SIZE: usize = 3;

/// Everything a run shares: the client, the fleet and how to reach the edge.
///
/// Scenarios run one after another against the same fleet and must not assume
/// anything installed by an earlier scenario survives; each starts with
/// [`Harness::reset_for`].
#[derive(Debug)]
pub struct Harness {
    client: EdgeClient,
    requests: UniqueRequestFactory,
    poller: ConvergencePoller,
    fleet: BackendFleet,
    vendor: Option<Vendor>,
    setup_failure: Mutex<Option<HarnessError>>,
}

impl Harness {
    /// Assemble a harness from explicit parts, with the default convergence
    /// policy and no vendor.
    pub fn new(client: EdgeClient, requests: UniqueRequestFactory, fleet: BackendFleet) -> Self {
        let poller = ConvergencePoller::new(client.clone(), requests.clone());
        Self {
            client,
            requests,
            poller,
            fleet,
            vendor: None,
            setup_failure: Mutex::new(None),
        }
    }

    /// Build the client, request factory and fleet for `config`. No backend
    /// is started.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let client = EdgeClient::new(ClientOptions::from_config(config)?)?;
        let requests = UniqueRequestFactory::for_edge_host(config.edge_host()?)?;
        let fleet = BackendFleet::from_config(config)?;
        Ok(Self::new(client, requests, fleet).with_vendor(config.vendor))
    }

    /// Replace the convergence retry budget.
    pub fn with_policy(mut self, policy: ConvergencePolicy) -> Self {
        self.poller = ConvergencePoller::with_policy(self.client.clone(), self.requests.clone(), policy);
        self
    }

    /// Set the vendor used to gate vendor-specific scenarios.
    pub fn with_vendor(mut self, vendor: Option<Vendor>) -> Self {
        self.vendor = vendor;
        self
    }

    /// Shared edge client.
    pub fn client(&self) -> &EdgeClient {
        &self.client
    }

    /// Unique URL factory for the edge.
    pub fn requests(&self) -> &UniqueRequestFactory {
        &self.requests
    }

    /// Convergence poller used by resets.
    pub fn poller(&self) -> &ConvergencePoller {
        &self.poller
    }

    /// The backend fleet.
    pub fn fleet(&self) -> &BackendFleet {
        &self.fleet
    }

    /// The origin backend.
    pub fn origin(&self) -> &BackendServer {
        self.fleet.origin()
    }

    /// Mirror `n`, counting from 1.
    pub fn mirror(&self, n: usize) -> Option<&BackendServer> {
        if n == 0 {
            return None;
        }
        self.fleet.get(n)
    }

    /// Configured vendor, if any.
    pub fn vendor(&self) -> Option<Vendor> {
        self.vendor
    }

    /// Whether the fleet has the mirrors failover scenarios need.
    pub fn supports_failover(&self) -> bool {
        self.fleet.len() >= FAILOVER_FLEET_SIZE
    }

    /// A `GET` for a fresh uncacheable URL.
    pub fn unique_get(&self) -> EdgeRequest {
        EdgeRequest::get(self.requests.unique_url())
    }

    /// Bring the fleet back to every backend serving its default handler,
    /// with the edge routing to origin.
    pub async fn reset(&self) -> Result<(), HarnessError> {
        self.fleet.reset(&self.poller).await
    }

    /// [`Self::reset`] for a running scenario.
    ///
    /// A failure aborts the scenario and is kept for the runner, which stops
    /// the whole run: nothing after it would be testing a known topology.
    pub async fn reset_for(&self, case: &mut TestCase) -> CaseResult {
        match self.reset().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let fatal = case.fatal(format!("resetting backends: {e}"));
                if let Ok(mut slot) = self.setup_failure.lock() {
                    slot.get_or_insert(e);
                }
                Err(fatal)
            }
        }
    }

    /// Take the setup failure recorded by [`Self::reset_for`], if any.
    pub fn take_setup_failure(&self) -> Option<HarnessError> {
        self.setup_failure.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Send a request to the edge on behalf of `case`.
    pub async fn send(&self, case: &mut TestCase, request: &EdgeRequest) -> Result<EdgeResponse, Fatal> {
        self.client.round_trip_checked(case, request).await
    }

    /// Origin and both mirrors, or a skip if the fleet runs origin only.
    pub fn failover_fleet(
        &self,
        case: &mut TestCase,
    ) -> Result<[&BackendServer; FAILOVER_FLEET_SIZE], Fatal> {
        match (self.fleet.get(0), self.fleet.get(1), self.fleet.get(2)) {
            (Some(origin), Some(first), Some(second)) => Ok([origin, first, second]),
            _ => Err(case.skip("failover backends are disabled")),
        }
    }

    /// Stop every backend.
    pub async fn stop_all(&self) {
        info!("stopping all backends");
        self.fleet.stop_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn harness(args: &[&str]) -> Harness {
        let mut argv = vec!["edgecheck", "--edge-host", "edge.test", "--disable-backend-tls"];
        argv.extend_from_slice(args);
        Harness::from_config(&HarnessConfig::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn mirrors_are_counted_from_one() {
        let h = harness(&[]);
        assert_eq!(h.origin().name(), "origin");
        assert!(h.mirror(0).is_none());
        assert_eq!(h.mirror(1).map(|b| b.name()), Some("backup1"));
        assert_eq!(h.mirror(2).map(|b| b.name()), Some("backup2"));
        assert!(h.mirror(3).is_none());
        assert!(h.supports_failover());
    }

    #[test]
    fn single_backend_mode_skips_failover() {
        let h = harness(&["--skip-failover", "--vendor", "cloudflare"]);
        assert!(!h.supports_failover());
        assert_eq!(h.vendor(), Some(Vendor::Cloudflare));

        let mut case = TestCase::new("failover");
        assert!(h.failover_fleet(&mut case).is_err());
        let report = case.finish(Err(Fatal));
        assert_eq!(report.outcome, crate::report::Outcome::Skipped);
    }

    #[test]
    fn unique_get_targets_edge_root() {
        let h = harness(&[]);
        let request = h.unique_get();
        assert_eq!(request.url().host_str(), Some("edge.test"));
        assert_eq!(request.url().path(), "/");
        assert!(request.url().query().unwrap().starts_with("nocache="));
    }
}
