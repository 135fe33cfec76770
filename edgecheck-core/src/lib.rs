//! Edgecheck core.
//!
//! This crate contains the domain model, configuration and timing policy shared
//! by the edgecheck CDN acceptance harness: the identity marker contract every
//! backend honours, the bring-up plan for a priority-ordered fleet, and the
//! factory for collision-free edge URLs.

pub mod config;
pub mod domain;
pub mod error;
pub mod policy;
pub mod unique;

pub use config::{HarnessConfig, Vendor};
pub use domain::backend::{BackendIdentity, Lifecycle};
pub use domain::plan::{reset_plan, ResetStep};
pub use error::HarnessError;
pub use policy::ConvergencePolicy;
pub use unique::{new_uuid, UniqueRequestFactory};
