//! Error types for the Gmail reader MCP server and client
//!
//! This module defines the error hierarchy for all operations in the crate.

use thiserror::Error;

/// Main error type for the Gmail reader
#[derive(Error, Debug)]
pub enum GmailMcpError {
    /// OAuth authentication errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Gmail API errors
    #[error("Gmail API error: {0}")]
    Gmail(#[from] GmailApiError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// OAuth authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth client secret file not found: {path}")]
    KeysFileNotFound { path: String },

    #[error("Invalid OAuth keys format: expected 'installed' or 'web' credentials")]
    InvalidKeysFormat,

    #[error("No stored credentials at {path} and interactive authorization is disabled")]
    NoCredentials { path: String },

    #[error("Failed to refresh access token: {message}")]
    TokenRefreshFailed { message: String },

    #[error("OAuth callback error: {message}")]
    CallbackError { message: String },

    #[error("No authorization code provided")]
    NoAuthCode,

    #[error("Token exchange failed: {message}")]
    TokenExchangeFailed { message: String },
}

/// Gmail API errors
#[derive(Error, Debug)]
pub enum GmailApiError {
    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("API request failed: {message}")]
    RequestFailed { message: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found: {path}")]
    DirNotFound { path: String },

    #[error("Failed to create config directory: {path}")]
    DirCreationFailed { path: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("invalid base64 data: {message}")]
    InvalidBase64 { message: String },

    #[error("body is not valid UTF-8: {message}")]
    InvalidUtf8 { message: String },
}

/// MCP protocol errors
#[derive(Error, Debug)]
pub enum McpError {
    /// The remote endpoint could not be reached or rejected the handshake
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A call was attempted outside the Ready state
    #[error("client is not connected")]
    NotConnected,

    /// No reply arrived within the request timeout
    #[error("request timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("unknown tool: {name}")]
    ToolNotFound { name: String },

    /// A tool handler failed while fulfilling a call
    #[error("error executing {tool}: {message}")]
    RemoteExecution { tool: String, message: String },

    /// Empty or undecodable content block
    #[error("malformed response: {message}")]
    MalformedResponse { message: String },

    /// JSON-RPC error object returned by the peer
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("tool registration error: {message}")]
    Registration { message: String },
}

impl McpError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        McpError::Connection {
            message: message.into(),
        }
    }

    /// Create a malformed-response error
    pub fn malformed(message: impl Into<String>) -> Self {
        McpError::MalformedResponse {
            message: message.into(),
        }
    }

    /// Whether this failure belongs to the transport rather than to a tool
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            McpError::Connection { .. } | McpError::NotConnected | McpError::Timeout { .. }
        )
    }
}

/// Result type alias for Gmail reader operations
pub type Result<T> = std::result::Result<T, GmailMcpError>;
