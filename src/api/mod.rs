//! API module
//!
//! Health and outbox monitoring endpoints.

pub mod routes;

pub use routes::{build_router, create_router, ApiState};
