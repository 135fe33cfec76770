//! Backend servers the edge forwards to.

pub mod handler;
pub mod server;

pub use handler::{BackendHandler, BackendRequest, BackendResponse, DefaultHandler, HandlerSlot};
pub use server::BackendServer;
