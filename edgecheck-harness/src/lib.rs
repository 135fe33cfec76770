//! Edgecheck harness.
//!
//! Runs the origin and mirror backends a CDN edge is configured to forward
//! to, drives requests through the edge, and checks from the edge's answers
//! and the traffic each backend saw that the edge caches, fails over and
//! forwards headers the way it should.

pub mod assertions;
pub mod backend;
pub mod client;
pub mod fleet;
pub mod harness;
pub mod health_check;
pub mod logging;
pub mod recorder;
pub mod report;
pub mod suite;
pub mod tls;

pub use backend::{BackendHandler, BackendRequest, BackendResponse, BackendServer};
pub use client::{ClientOptions, EdgeClient, EdgeRequest, EdgeResponse};
pub use fleet::BackendFleet;
pub use harness::Harness;
pub use health_check::ConvergencePoller;
pub use recorder::RequestLog;
pub use report::{CaseReport, CaseResult, Fatal, Outcome, TestCase, ViolationSink};
pub use suite::{catalogue, run_suite, Scenario, SuiteOutcome};
