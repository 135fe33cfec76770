//! Per-scenario result reporting.
//!
//! A [`TestCase`] collects the failures and warnings of one scenario. Handlers
//! running on backend server tasks cannot borrow the case, so they report
//! through a [`ViolationSink`], a lock-free queue that is drained into the
//! case's failures when it finishes.

use std::fmt;
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use edgecheck_core::HarnessError;
use tracing::{error, info, warn};

/// Thread-safe collector for failures observed off the scenario's task.
#[derive(Clone, Default)]
pub struct ViolationSink {
    queue: Arc<SegQueue<String>>,
}

impl ViolationSink {
    /// Record a failure.
    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        error!(%message, "backend saw unexpected traffic");
        self.queue.push(message);
    }

    /// Take every failure recorded so far.
    pub fn drain(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(message) = self.queue.pop() {
            out.push(message);
        }
        out
    }
}

impl fmt::Debug for ViolationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViolationSink")
            .field("pending", &self.queue.len())
            .finish()
    }
}

/// Marker returned when a scenario cannot continue.
///
/// The reason has already been recorded on the [`TestCase`]; propagate it
/// with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("test case aborted")]
pub struct Fatal;

/// What a scenario body returns.
pub type CaseResult = Result<(), Fatal>;

/// How a scenario ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No failures recorded.
    Passed,
    /// At least one failure recorded.
    Failed,
    /// Skipped before any failure was recorded.
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("PASS"),
            Outcome::Failed => f.write_str("FAIL"),
            Outcome::Skipped => f.write_str("SKIP"),
        }
    }
}

/// Final record of one scenario.
#[derive(Debug, Clone)]
pub struct CaseReport {
    /// Scenario name.
    pub name: String,
    /// Overall outcome.
    pub outcome: Outcome,
    /// Failure messages, in the order they were recorded.
    pub failures: Vec<String>,
    /// Warnings that did not fail the scenario.
    pub warnings: Vec<String>,
    /// Why the scenario was skipped, if it was.
    pub skip_reason: Option<String>,
}

/// Running record of one scenario.
#[derive(Debug)]
pub struct TestCase {
    name: String,
    failures: Vec<String>,
    warnings: Vec<String>,
    skipped: Option<String>,
    violations: ViolationSink,
}

impl TestCase {
    /// Start recording a scenario.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failures: Vec::new(),
            warnings: Vec::new(),
            skipped: None,
            violations: ViolationSink::default(),
        }
    }

    /// Scenario name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a failure and carry on.
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(case = %self.name, %message, "assertion failed");
        self.failures.push(message);
    }

    /// Record a failure the scenario cannot continue from.
    pub fn fatal(&mut self, message: impl Into<String>) -> Fatal {
        self.error(message);
        Fatal
    }

    /// Record a warning that does not fail the scenario.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(case = %self.name, %message);
        self.warnings.push(message);
    }

    /// Log progress.
    pub fn log(&self, message: impl AsRef<str>) {
        info!(case = %self.name, "{}", message.as_ref());
    }

    /// Mark the scenario skipped and stop it.
    pub fn skip(&mut self, reason: impl Into<String>) -> Fatal {
        let reason = reason.into();
        info!(case = %self.name, %reason, "skipping");
        self.skipped = Some(reason);
        Fatal
    }

    /// Unwrap a harness result, turning an error into a fatal failure.
    pub fn require<T>(&mut self, result: Result<T, HarnessError>) -> Result<T, Fatal> {
        result.map_err(|e| self.fatal(e.to_string()))
    }

    /// Sink for handlers that must report failures from server tasks.
    pub fn violations(&self) -> ViolationSink {
        self.violations.clone()
    }

    /// Whether any failure has been recorded so far, including pending
    /// violations.
    pub fn failed(&mut self) -> bool {
        self.collect_violations();
        !self.failures.is_empty()
    }

    /// Failures recorded so far.
    pub fn failures(&mut self) -> &[String] {
        self.collect_violations();
        &self.failures
    }

    /// Warnings recorded so far.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Close the case. The result of the scenario body only matters for its
    /// side effects on the record: a [`Fatal`] has already been recorded.
    pub fn finish(mut self, _result: CaseResult) -> CaseReport {
        self.collect_violations();
        let outcome = if !self.failures.is_empty() {
            Outcome::Failed
        } else if self.skipped.is_some() {
            Outcome::Skipped
        } else {
            Outcome::Passed
        };

        CaseReport {
            name: self.name,
            outcome,
            failures: self.failures,
            warnings: self.warnings,
            skip_reason: self.skipped,
        }
    }

    fn collect_violations(&mut self) {
        self.failures.extend(self.violations.drain());
    }
}
