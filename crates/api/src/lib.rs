//! Application services and HTTP surface for grants, security settings and
//! login identity providers.

pub mod app;
pub mod context;
pub mod error;
pub mod middleware;

pub use context::RequestContext;
pub use error::ServiceError;
