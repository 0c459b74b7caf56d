//! Configuration management for the Gmail reader
//!
//! Handles paths, environment variables, and configuration loading.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, GmailMcpError, Result};

/// Default per-request timeout for MCP calls, in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default OAuth callback port
const DEFAULT_OAUTH_PORT: u16 = 3000;

/// Configuration for the Gmail reader
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing configuration files
    pub config_dir: PathBuf,

    /// Path to the OAuth client secret file
    pub oauth_path: PathBuf,

    /// Path to the persisted token (access/refresh tokens)
    pub credentials_path: PathBuf,

    /// OAuth callback URL
    pub oauth_callback_url: String,

    /// OAuth callback port
    pub oauth_callback_port: u16,

    /// Gmail API base URL
    pub api_base_url: String,

    /// Whether a browser-based authorization may be started when no usable
    /// token is stored
    pub interactive_auth: bool,

    /// Per-request timeout for MCP calls
    pub request_timeout: Duration,

    /// Gmail API scopes
    pub scopes: Vec<String>,
}

impl Config {
    /// Create a new configuration from the environment with default paths
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var("GMAIL_MCP_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => Self::default_config_dir()?,
        };
        Self::ensure_dir(&config_dir)?;

        let mut config = Self::with_dir(&config_dir);

        if let Ok(path) = std::env::var("GMAIL_OAUTH_PATH") {
            config.oauth_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GMAIL_CREDENTIALS_PATH") {
            config.credentials_path = PathBuf::from(path);
        }
        if let Ok(port) = std::env::var("GMAIL_OAUTH_PORT") {
            let port: u16 = port.parse().map_err(|_| {
                GmailMcpError::Config(ConfigError::InvalidConfig {
                    message: format!("GMAIL_OAUTH_PORT is not a valid port: {}", port),
                })
            })?;
            config.set_callback_port(port);
        }
        if let Ok(url) = std::env::var("GMAIL_API_BASE_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(flag) = std::env::var("GMAIL_INTERACTIVE_AUTH") {
            config.interactive_auth = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(secs) = std::env::var("GMAIL_MCP_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                GmailMcpError::Config(ConfigError::InvalidConfig {
                    message: format!("GMAIL_MCP_TIMEOUT_SECS is not a number: {}", secs),
                })
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Build a configuration rooted at `dir` without consulting the environment
    pub fn with_dir(dir: impl AsRef<Path>) -> Self {
        let config_dir = dir.as_ref().to_path_buf();
        Self {
            oauth_path: config_dir.join("credentials.json"),
            credentials_path: config_dir.join("token.json"),
            oauth_callback_url: callback_url(DEFAULT_OAUTH_PORT),
            oauth_callback_port: DEFAULT_OAUTH_PORT,
            api_base_url: gmail::API_BASE_URL.to_string(),
            interactive_auth: false,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            scopes: vec![gmail::READONLY_SCOPE.to_string()],
            config_dir,
        }
    }

    /// Change the OAuth callback port and the derived callback URL
    pub fn set_callback_port(&mut self, port: u16) {
        self.oauth_callback_port = port;
        self.oauth_callback_url = callback_url(port);
    }

    fn default_config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            GmailMcpError::Config(ConfigError::DirNotFound {
                path: "~".to_string(),
            })
        })?;
        Ok(home.join(".gmail-mcp"))
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|_| {
                GmailMcpError::Config(ConfigError::DirCreationFailed {
                    path: dir.display().to_string(),
                })
            })?;
        }
        Ok(())
    }

    /// Check if the OAuth client secret file exists
    pub fn oauth_keys_exist(&self) -> bool {
        self.oauth_path.exists()
    }

    /// Check if a persisted token exists
    pub fn credentials_exist(&self) -> bool {
        self.credentials_path.exists()
    }

    /// Try to find a client secret file in the current directory and copy it
    /// to the config dir
    pub fn find_and_copy_oauth_keys(&self) -> Result<bool> {
        let local_oauth = std::env::current_dir()?.join("credentials.json");

        if local_oauth.exists() && local_oauth != self.oauth_path && !self.oauth_keys_exist() {
            std::fs::copy(&local_oauth, &self.oauth_path)?;
            tracing::info!(
                "Copied OAuth client secret from {} to {}",
                local_oauth.display(),
                self.oauth_path.display()
            );
            return Ok(true);
        }

        Ok(false)
    }
}

fn callback_url(port: u16) -> String {
    format!("http://localhost:{}/oauth2callback", port)
}

/// Gmail API constants
pub mod gmail {
    /// Base URL for Gmail API
    pub const API_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

    /// User ID for the authenticated user
    pub const USER_ID: &str = "me";

    /// Read-only mailbox access
    pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Search predicate selecting unread messages
    pub const UNREAD_QUERY: &str = "is:unread";
}
