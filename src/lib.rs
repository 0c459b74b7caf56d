//! Gmail Reader MCP Library
//!
//! A Model Context Protocol (MCP) server exposing read-only Gmail tools, and
//! a typed client that launches and talks to it.

pub mod config;
pub mod error;
pub mod gmail;
pub mod mcp;

pub use config::Config;
pub use error::{GmailMcpError, Result};
pub use mcp::client::{GmailMcpClient, SessionState};
