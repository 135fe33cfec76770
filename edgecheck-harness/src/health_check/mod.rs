//! Edge health convergence.

pub mod poller;

pub use poller::ConvergencePoller;
