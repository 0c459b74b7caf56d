//! Gmail API module
//!
//! Authentication, REST client, MIME extraction and the mail data service
//! that backs the tools.

pub mod auth;
pub mod client;
pub mod mime;
pub mod service;
pub mod types;
