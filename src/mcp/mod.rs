//! MCP server exposing the Figma tools

pub mod server;

pub use server::FigmaServer;
