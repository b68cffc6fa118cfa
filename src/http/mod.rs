//! Streamable-HTTP transport

mod auth;
mod routes;

pub use auth::{require_token, AuthConfig};
pub use routes::{create_router, serve};
