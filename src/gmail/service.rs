//! Mail data service
//!
//! Owns the Gmail handle for the lifetime of the server and implements the
//! four read-only tool contracts on top of it.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::gmail::UNREAD_QUERY;
use crate::config::Config;
use crate::error::{GmailMcpError, Result};
use crate::gmail::auth::Authenticator;
use crate::gmail::client::GmailClient;
use crate::gmail::mime::{extract_plain_text, SummaryHeaders};
use crate::gmail::types::{Email, EmailListPayload, Message, ToolPayload};

/// Gmail-backed implementation of the tools
pub struct MailService {
    config: Config,

    /// Initialized once, on first use
    client: OnceCell<GmailClient>,
}

impl MailService {
    /// Create a service; credentials are not touched until the first call
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    /// Whether initialization has already completed
    pub fn is_initialized(&self) -> bool {
        self.client.initialized()
    }

    /// Authenticate and build the Gmail handle, at most once per process
    ///
    /// Concurrent callers wait for the first one to finish. A failed attempt
    /// leaves the service uninitialized so a later call can retry.
    pub async fn ensure_authenticated(&self) -> Result<&GmailClient> {
        self.client
            .get_or_try_init(|| async {
                let authenticator = Arc::new(Authenticator::new(self.config.clone()));
                authenticator.ensure_credentials().await?;
                tracing::info!("Gmail service initialized");
                Ok::<_, GmailMcpError>(GmailClient::new(authenticator))
            })
            .await
    }

    /// Most recent messages in the mailbox
    pub async fn get_recent_emails(&self, count: u32) -> Result<EmailListPayload> {
        let emails = self.collect(None, count).await?;
        Ok(EmailListPayload::new("get_recent_emails", None, emails))
    }

    /// Most recent unread messages
    pub async fn get_unread_emails(&self, count: u32) -> Result<EmailListPayload> {
        let emails = self.collect(Some(UNREAD_QUERY), count).await?;
        Ok(EmailListPayload::new("get_unread_emails", None, emails))
    }

    /// Messages matching a Gmail search query, passed through verbatim
    pub async fn search_emails(&self, query: &str, count: u32) -> Result<EmailListPayload> {
        let emails = self.collect(Some(query), count).await?;
        Ok(EmailListPayload::new(
            "search_emails",
            Some(query.to_string()),
            emails,
        ))
    }

    /// Full details of one message; a failed fetch becomes an error payload
    pub async fn get_email_details(&self, message_id: &str) -> Result<ToolPayload> {
        let client = self.ensure_authenticated().await?;
        Ok(match fetch_email(client, message_id).await {
            Ok(email) => ToolPayload::Email(email),
            Err(e) => ToolPayload::error(format!("failed to fetch email {}: {}", message_id, e)),
        })
    }

    /// List ids then fetch each message in listing order. Messages whose
    /// fetch fails are left out of the result.
    async fn collect(&self, query: Option<&str>, count: u32) -> Result<Vec<Email>> {
        let client = self.ensure_authenticated().await?;
        let refs = client.list_messages(query, count).await?;

        let mut emails = Vec::with_capacity(refs.len());
        for msg_ref in refs.iter().take(count as usize) {
            match fetch_email(client, &msg_ref.id).await {
                Ok(email) => emails.push(email),
                Err(e) => tracing::warn!("Dropping message {}: {}", msg_ref.id, e),
            }
        }

        Ok(emails)
    }
}

async fn fetch_email(client: &GmailClient, message_id: &str) -> Result<Email> {
    let message = client.get_message(message_id).await?;
    email_from_message(message)
}

/// Flatten an API message into the tool representation
///
/// Fails when the plain-text body cannot be decoded.
pub fn email_from_message(message: Message) -> Result<Email> {
    let (headers, body) = match message.payload.as_ref() {
        Some(payload) => (SummaryHeaders::from_part(payload), extract_plain_text(payload)?),
        None => (SummaryHeaders::default(), String::new()),
    };

    Ok(Email {
        id: message.id,
        thread_id: message.thread_id.unwrap_or_default(),
        from: headers.from,
        to: headers.to,
        subject: headers.subject,
        date: headers.date,
        body,
        snippet: message.snippet.unwrap_or_default(),
        labels: message.label_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    #[test]
    fn test_email_from_message() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX"],
            "snippet": "Hello",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "ana@example.com"},
                    {"name": "To", "value": "me@example.com"},
                    {"name": "Subject", "value": "Greeting"},
                    {"name": "Date", "value": "Mon, 1 Sep 2025 10:00:00 +0000"},
                    {"name": "Received", "value": "by mx"}
                ],
                "parts": [
                    {"mimeType": "text/plain", "body": {"data": "SGVsbG8="}},
                    {"mimeType": "text/html", "body": {"data": "PGI+SGVsbG88L2I+"}}
                ]
            }
        }))
        .unwrap();

        let email = email_from_message(message).unwrap();
        assert_eq!(email.id, "m1");
        assert_eq!(email.thread_id, "t1");
        assert_eq!(email.from, "ana@example.com");
        assert_eq!(email.to, "me@example.com");
        assert_eq!(email.subject, "Greeting");
        assert_eq!(email.body, "Hello");
        assert_eq!(email.labels, vec!["INBOX"]);
    }

    #[test]
    fn test_email_without_payload() {
        let message: Message = serde_json::from_str(r#"{"id": "m2"}"#).unwrap();
        let email = email_from_message(message).unwrap();
        assert_eq!(email.id, "m2");
        assert!(email.body.is_empty());
        assert!(email.labels.is_empty());
    }

    #[test]
    fn test_email_with_garbled_body_is_rejected() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "m3",
            "payload": {"mimeType": "text/plain", "body": {"data": "__4="}}
        }))
        .unwrap();
        assert!(email_from_message(message).is_err());
    }

    #[tokio::test]
    async fn test_uninitialized_without_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let service = MailService::new(Config::with_dir(dir.path()));

        let err = service.ensure_authenticated().await.err().unwrap();
        assert!(matches!(err, GmailMcpError::Auth(AuthError::NoCredentials { .. })));
        assert!(!service.is_initialized());
    }
}
