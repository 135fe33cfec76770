//! Domain models for backends and their bring-up order.

pub mod backend;
pub mod plan;
