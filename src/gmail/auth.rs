//! OAuth authentication for Gmail API
//!
//! Handles the credential lifecycle:
//! - Loading the persisted token
//! - Refreshing an expired access token
//! - Interactive browser-based authorization
//! - Persisting the token after every refresh or authorization

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{AuthError, GmailMcpError, Result};

/// Seconds before the recorded expiry at which a token is treated as expired
const EXPIRY_SKEW_SECS: i64 = 60;

/// OAuth client credentials
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthKeys {
    /// Client ID
    pub client_id: String,

    /// Client secret
    pub client_secret: String,

    /// Auth URI
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,

    /// Token URI
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

/// OAuth keys file format (can be "installed" or "web")
#[derive(Debug, Deserialize)]
struct OAuthKeysFile {
    #[serde(alias = "web")]
    installed: Option<OAuthKeys>,
}

/// Stored credentials (tokens)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Access token
    pub access_token: String,

    /// Refresh token
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Expiry timestamp (Unix seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,

    /// Scopes
    #[serde(default)]
    pub scope: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredCredentials {
    /// Whether the access token has passed (or is about to pass) its expiry
    pub fn is_expired(&self) -> bool {
        match self.expiry_date {
            Some(expiry) => expiry - now_unix() < EXPIRY_SKEW_SECS,
            None => false,
        }
    }

    /// Whether the access token can be used as is
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired()
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Token response from OAuth token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: Option<i64>,
    #[serde(default)]
    scope: String,
}

impl TokenResponse {
    fn into_credentials(self, previous_refresh_token: Option<String>) -> StoredCredentials {
        StoredCredentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh_token),
            token_type: self.token_type,
            expiry_date: self.expires_in.map(|e| now_unix() + e),
            scope: self.scope,
        }
    }
}

/// OAuth authenticator
pub struct Authenticator {
    /// Configuration
    config: Config,

    /// HTTP client
    http_client: reqwest::Client,

    /// Current credentials (tokens)
    credentials: RwLock<Option<StoredCredentials>>,
}

impl Authenticator {
    /// Create a new authenticator; nothing is loaded until
    /// [`ensure_credentials`](Self::ensure_credentials) runs
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http_client: reqwest::Client::new(),
            credentials: RwLock::new(None),
        }
    }

    /// Configuration this authenticator was built from
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load OAuth keys from file
    fn load_oauth_keys(path: &Path) -> Result<OAuthKeys> {
        if !path.exists() {
            return Err(GmailMcpError::Auth(AuthError::KeysFileNotFound {
                path: path.display().to_string(),
            }));
        }

        let content = std::fs::read_to_string(path)?;
        let keys_file: OAuthKeysFile =
            serde_json::from_str(&content).map_err(|_| AuthError::InvalidKeysFormat)?;

        keys_file
            .installed
            .ok_or(GmailMcpError::Auth(AuthError::InvalidKeysFormat))
    }

    fn keys(&self) -> Result<OAuthKeys> {
        if let Err(e) = self.config.find_and_copy_oauth_keys() {
            tracing::debug!("Could not look for a local client secret file: {}", e);
        }
        Self::load_oauth_keys(&self.config.oauth_path)
    }

    /// Load the persisted token; an unreadable file counts as absent
    async fn load_credentials(&self) -> Option<StoredCredentials> {
        let path = &self.config.credentials_path;
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read token file {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(creds) => Some(creds),
            Err(e) => {
                tracing::warn!("Ignoring corrupt token file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Save credentials to file
    async fn save_credentials(&self, credentials: &StoredCredentials) -> Result<()> {
        let path = &self.config.credentials_path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(credentials)?;
        tokio::fs::write(path, content).await?;
        tracing::debug!("Persisted token to {}", path.display());
        Ok(())
    }

    /// Establish usable credentials
    ///
    /// Uses the persisted token when it is still valid, refreshes it when it
    /// is expired but carries a refresh token, and otherwise falls back to
    /// interactive authorization if the configuration allows it.
    pub async fn ensure_credentials(&self) -> Result<()> {
        let credentials = match self.load_credentials().await {
            Some(creds) if creds.is_valid() => {
                tracing::debug!("Using stored Gmail token");
                creds
            }
            Some(StoredCredentials {
                refresh_token: Some(refresh_token),
                ..
            }) => {
                tracing::info!("Stored Gmail token expired, refreshing");
                self.refresh(&refresh_token).await?
            }
            _ => {
                if !self.config.interactive_auth {
                    return Err(GmailMcpError::Auth(AuthError::NoCredentials {
                        path: self.config.credentials_path.display().to_string(),
                    }));
                }
                self.authenticate_interactive().await?
            }
        };

        *self.credentials.write().await = Some(credentials);
        Ok(())
    }

    /// Get a valid access token, refreshing if necessary
    pub async fn access_token(&self) -> Result<String> {
        {
            let creds = self.credentials.read().await;
            match creds.as_ref() {
                Some(c) if c.is_valid() => return Ok(c.access_token.clone()),
                Some(_) => {}
                None => return Err(self.no_credentials()),
            }
        }

        let mut creds = self.credentials.write().await;
        // Another caller may have refreshed while we waited for the lock
        let refresh_token = match creds.as_ref() {
            Some(c) if c.is_valid() => return Ok(c.access_token.clone()),
            Some(c) => c.refresh_token.clone().ok_or_else(|| {
                GmailMcpError::Auth(AuthError::TokenRefreshFailed {
                    message: "No refresh token available".to_string(),
                })
            })?,
            None => return Err(self.no_credentials()),
        };

        let refreshed = self.refresh(&refresh_token).await?;
        let token = refreshed.access_token.clone();
        *creds = Some(refreshed);
        Ok(token)
    }

    fn no_credentials(&self) -> GmailMcpError {
        GmailMcpError::Auth(AuthError::NoCredentials {
            path: self.config.credentials_path.display().to_string(),
        })
    }

    /// Refresh the access token using the refresh token and persist the result
    async fn refresh(&self, refresh_token: &str) -> Result<StoredCredentials> {
        let keys = self.keys()?;

        let params = [
            ("client_id", keys.client_id.as_str()),
            ("client_secret", keys.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(&keys.token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenRefreshFailed {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GmailMcpError::Auth(AuthError::TokenRefreshFailed {
                message: format!("{}: {}", status, text),
            }));
        }

        let token_response: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| AuthError::TokenRefreshFailed {
                    message: e.to_string(),
                })?;

        let credentials = token_response.into_credentials(Some(refresh_token.to_string()));
        self.save_credentials(&credentials).await?;
        tracing::info!("Refreshed Gmail access token");

        Ok(credentials)
    }

    /// Generate the authorization URL
    pub fn generate_auth_url(&self, keys: &OAuthKeys) -> String {
        let scopes = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            keys.auth_uri,
            urlencoding::encode(&keys.client_id),
            urlencoding::encode(&self.config.oauth_callback_url),
            urlencoding::encode(&scopes)
        )
    }

    /// Exchange authorization code for tokens and persist them
    pub async fn exchange_code(&self, keys: &OAuthKeys, code: &str) -> Result<StoredCredentials> {
        let params = [
            ("client_id", keys.client_id.as_str()),
            ("client_secret", keys.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.config.oauth_callback_url.as_str()),
        ];

        let response = self
            .http_client
            .post(&keys.token_uri)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GmailMcpError::Auth(AuthError::TokenExchangeFailed {
                message: text,
            }));
        }

        let token_response: TokenResponse = response.json().await?;
        let credentials = token_response.into_credentials(None);
        self.save_credentials(&credentials).await?;

        Ok(credentials)
    }

    /// Run interactive authentication flow with local HTTP server
    pub async fn authenticate_interactive(&self) -> Result<StoredCredentials> {
        use axum::{extract::Query, response::Html, routing::get, Router};
        use std::collections::HashMap;
        use tokio::sync::oneshot;

        let keys = self.keys()?;
        let auth_url = self.generate_auth_url(&keys);
        eprintln!("\nPlease visit this URL to authorize Gmail access:");
        eprintln!("{}\n", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Could not open browser automatically: {}", e);
            eprintln!("Please open the URL manually.");
        }

        let (tx, rx) = oneshot::channel::<String>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let tx_clone = tx.clone();
        let callback_handler = move |Query(params): Query<HashMap<String, String>>| async move {
            if let Some(code) = params.get("code") {
                if let Some(tx) = tx_clone.lock().ok().and_then(|mut slot| slot.take()) {
                    let _ = tx.send(code.clone());
                }
                Html("<html><body><h1>Authorization successful!</h1><p>You can close this window.</p></body></html>")
            } else {
                Html("<html><body><h1>Authorization failed</h1><p>No authorization code received.</p></body></html>")
            }
        };

        let app = Router::new().route("/oauth2callback", get(callback_handler));

        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.oauth_callback_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!(
            "Waiting for authorization callback on port {}",
            self.config.oauth_callback_port
        );

        let server = axum::serve(listener, app);

        tokio::select! {
            result = server => {
                match result {
                    Err(e) => Err(GmailMcpError::Auth(AuthError::CallbackError {
                        message: e.to_string(),
                    })),
                    Ok(()) => Err(GmailMcpError::Auth(AuthError::NoAuthCode)),
                }
            }
            code = rx => {
                let code = code.map_err(|_| AuthError::NoAuthCode)?;
                tracing::info!("Received authorization code, exchanging for tokens");
                self.exchange_code(&keys, &code).await
            }
        }
    }
}
