//! figma-rest-mcp - MCP server for the Figma REST API with a sandboxed query evaluator

pub mod config;
pub mod error;
pub mod types;

pub mod script;
pub mod query;
pub mod figma;
pub mod mcp;
pub mod http;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
