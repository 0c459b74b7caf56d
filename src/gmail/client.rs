//! Gmail API client
//!
//! Thin REST client over the two read endpoints the tools need.

use std::sync::Arc;

use crate::config::gmail::USER_ID;
use crate::error::{GmailApiError, GmailMcpError, Result};
use crate::gmail::auth::Authenticator;
use crate::gmail::types::{Message, MessageList, MessageRef};

/// Gmail API client
pub struct GmailClient {
    /// HTTP client
    http_client: reqwest::Client,

    /// OAuth authenticator
    authenticator: Arc<Authenticator>,

    /// API base URL, without trailing slash
    base_url: String,
}

impl GmailClient {
    /// Create a new Gmail client
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        let base_url = authenticator.config().api_base_url.clone();
        Self {
            http_client: reqwest::Client::new(),
            authenticator,
            base_url,
        }
    }

    /// Get a valid access token
    async fn access_token(&self) -> Result<String> {
        self.authenticator.access_token().await
    }

    /// Base URL for messages
    fn messages_url(&self) -> String {
        format!("{}/users/{}/messages", self.base_url, USER_ID)
    }

    /// List message references, newest first, optionally filtered by a
    /// Gmail search predicate
    pub async fn list_messages(&self, query: Option<&str>, max_results: u32) -> Result<Vec<MessageRef>> {
        let token = self.access_token().await?;

        let mut url = format!("{}?maxResults={}", self.messages_url(), max_results);
        if let Some(q) = query {
            url.push_str("&q=");
            url.push_str(&urlencoding::encode(q));
        }

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GmailMcpError::Gmail(GmailApiError::RequestFailed {
                message: format!("Failed to list messages ({}): {}", status, text),
            }));
        }

        let list: MessageList = response.json().await?;
        Ok(list.messages)
    }

    /// Get a message by ID with its full MIME structure
    pub async fn get_message(&self, message_id: &str) -> Result<Message> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/{}?format=full",
            self.messages_url(),
            urlencoding::encode(message_id)
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else if response.status().as_u16() == 404 {
            Err(GmailMcpError::Gmail(GmailApiError::MessageNotFound {
                message_id: message_id.to_string(),
            }))
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(GmailMcpError::Gmail(GmailApiError::RequestFailed {
                message: format!("Failed to get message ({}): {}", status, text),
            }))
        }
    }
}
