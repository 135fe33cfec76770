//! HTTP client side of the harness.

pub mod edge;
pub mod request;
pub mod resolver;

pub use edge::{ClientOptions, EdgeClient, EdgeResponse};
pub use request::EdgeRequest;
pub use resolver::PinnedResolver;
