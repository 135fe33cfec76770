//! The scenario catalogue run by the `edgecheck` binary.
//!
//! Every scenario is a thin consumer of the [`Harness`]: it resets the fleet,
//! installs handlers, sends requests and records mismatches on its
//! [`TestCase`]. Scenarios run one at a time against the shared fleet.

use edgecheck_core::{HarnessError, Vendor};
use futures::future::LocalBoxFuture;
use tracing::{info, warn};

use crate::harness::Harness;
use crate::report::{CaseReport, CaseResult, Outcome, TestCase};

pub mod cache;
pub mod failover;
pub mod fastly;
pub mod misc;
pub mod nocache;
pub mod nomanipulate;
pub mod req_headers;
pub mod resp_headers;
pub mod serve_stale;

/// Signature of a scenario body.
pub type ScenarioFn = for<'a> fn(&'a Harness, &'a mut TestCase) -> LocalBoxFuture<'a, CaseResult>;

/// Message used when a scenario does not apply to the selected vendor.
pub const SKIP_VENDOR_MSG: &str = "Skipping test; not applicable to your selected vendor";

/// Turn an `async fn(&Harness, &mut TestCase) -> CaseResult` into a
/// [`Scenario`].
macro_rules! scenario {
    ($name:literal, $body:path) => {
        $crate::suite::Scenario::new($name, |h, case| Box::pin($body(h, case)))
    };
}
pub(crate) use scenario;

/// A named scenario and the conditions it runs under.
#[derive(Clone)]
pub struct Scenario {
    name: &'static str,
    needs_failover: bool,
    only_vendor: Option<Vendor>,
    skip_vendor: Option<Vendor>,
    run: ScenarioFn,
}

impl Scenario {
    /// A scenario that always runs.
    pub fn new(name: &'static str, run: ScenarioFn) -> Self {
        Self {
            name,
            needs_failover: false,
            only_vendor: None,
            skip_vendor: None,
            run,
        }
    }

    /// Skip when the fleet has no mirrors.
    pub fn needs_failover(mut self) -> Self {
        self.needs_failover = true;
        self
    }

    /// Only run against `vendor`.
    pub fn only_for(mut self, vendor: Vendor) -> Self {
        self.only_vendor = Some(vendor);
        self
    }

    /// Never run against `vendor`.
    pub fn not_for(mut self, vendor: Vendor) -> Self {
        self.skip_vendor = Some(vendor);
        self
    }

    /// Scenario name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Why the scenario cannot run against `h`, if it cannot.
    pub fn skip_reason(&self, h: &Harness) -> Option<&'static str> {
        if self.needs_failover && !h.supports_failover() {
            return Some("failover backends are disabled");
        }
        if let Some(only) = self.only_vendor {
            if h.vendor() != Some(only) {
                return Some(SKIP_VENDOR_MSG);
            }
        }
        if self.skip_vendor.is_some() && h.vendor() == self.skip_vendor {
            return Some(SKIP_VENDOR_MSG);
        }
        None
    }

    /// Run the scenario and produce its report.
    pub async fn run(&self, h: &Harness) -> CaseReport {
        let mut case = TestCase::new(self.name);
        let result = match self.skip_reason(h) {
            Some(reason) => Err(case.skip(reason)),
            None => (self.run)(h, &mut case).await,
        };
        case.finish(result)
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("needs_failover", &self.needs_failover)
            .field("only_vendor", &self.only_vendor)
            .field("skip_vendor", &self.skip_vendor)
            .finish()
    }
}

/// Every scenario, in run order.
pub fn catalogue() -> Vec<Scenario> {
    let mut all = Vec::new();
    all.extend(misc::scenarios());
    all.extend(cache::scenarios());
    all.extend(nocache::scenarios());
    all.extend(nomanipulate::scenarios());
    all.extend(req_headers::scenarios());
    all.extend(resp_headers::scenarios());
    all.extend(failover::scenarios());
    all.extend(serve_stale::scenarios());
    all.extend(fastly::scenarios());
    all
}

/// Reports of one run.
#[derive(Debug, Default)]
pub struct SuiteOutcome {
    /// One report per scenario that was attempted.
    pub reports: Vec<CaseReport>,
    /// Set when a reset failed and the run was stopped.
    pub aborted: Option<HarnessError>,
}

impl SuiteOutcome {
    /// Number of reports with the given outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.reports.iter().filter(|r| r.outcome == outcome).count()
    }

    /// True if nothing failed and the run was not aborted.
    pub fn success(&self) -> bool {
        self.aborted.is_none() && self.count(Outcome::Failed) == 0
    }
}

/// Run `scenarios` whose name contains `filter` (all of them without one).
///
/// A scenario whose reset fails stops the run: the edge's view of the fleet
/// is unknown from then on.
pub async fn run_suite(h: &Harness, scenarios: &[Scenario], filter: Option<&str>) -> SuiteOutcome {
    let mut outcome = SuiteOutcome::default();

    for scenario in scenarios {
        if filter.is_some_and(|f| !scenario.name().contains(f)) {
            continue;
        }

        info!(scenario = scenario.name(), "running");
        let report = scenario.run(h).await;
        info!(scenario = %report.name, outcome = %report.outcome, "finished");
        outcome.reports.push(report);

        if let Some(err) = h.take_setup_failure() {
            warn!(error = %err, "aborting run");
            outcome.aborted = Some(err);
            break;
        }
    }

    outcome
}
