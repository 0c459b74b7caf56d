//! MCP (Model Context Protocol) module
//!
//! Server and client sides of the tool-invocation protocol.

pub mod client;
pub mod server;
pub mod session;
pub mod tools;
pub mod types;
