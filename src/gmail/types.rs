//! Gmail API type definitions
//!
//! The first half mirrors the Gmail API responses; the second half holds the
//! JSON payloads the tools return to MCP callers.

use serde::{Deserialize, Serialize};

/// A Gmail message part (MIME part)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    /// Part ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,

    /// MIME type of this part
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Filename for attachments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Headers for this part
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,

    /// Body of this part
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<MessagePartBody>,

    /// Nested parts (for multipart messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
}

/// Header in a message part
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Header name
    pub name: String,

    /// Header value
    pub value: String,
}

/// Body of a message part
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    /// Attachment ID (if this is an attachment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,

    /// Size in bytes
    #[serde(default)]
    pub size: i64,

    /// Base64url-encoded data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A Gmail message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message ID
    pub id: String,

    /// Thread ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    /// Label IDs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<String>,

    /// Snippet (preview text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,

    /// Message payload (MIME structure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessagePart>,

    /// Internal date (epoch millis)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_date: Option<String>,
}

/// List of messages response
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    /// Messages in this page
    #[serde(default)]
    pub messages: Vec<MessageRef>,

    /// Next page token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,

    /// Result size estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_size_estimate: Option<u32>,
}

/// Reference to a message (id and thread_id only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    /// Message ID
    pub id: String,

    /// Thread ID
    #[serde(default)]
    pub thread_id: String,
}

// ==================== Tool payloads ====================

/// An email as returned by the tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    /// Decoded plain-text body
    pub body: String,
    pub snippet: String,
    pub labels: Vec<String>,
}

/// Successful result of the list-style tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailListPayload {
    /// Name of the tool that produced this payload
    pub tool: String,

    /// Query echoed back by `search_emails`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    pub success: bool,

    /// Number of emails actually returned
    pub count: usize,

    pub emails: Vec<Email>,
}

impl EmailListPayload {
    /// Build a successful payload, deriving `count` from the emails
    pub fn new(tool: impl Into<String>, query: Option<String>, emails: Vec<Email>) -> Self {
        Self {
            tool: tool.into(),
            query,
            success: true,
            count: emails.len(),
            emails,
        }
    }
}

/// Error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// JSON payload carried in a tool's text content block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolPayload {
    Error(ErrorPayload),
    EmailList(EmailListPayload),
    Email(Email),
}

impl ToolPayload {
    /// Create an error payload
    pub fn error(message: impl Into<String>) -> Self {
        ToolPayload::Error(ErrorPayload {
            error: message.into(),
        })
    }

    /// Render any failure as an error payload, for layers that must always
    /// have something to display
    pub fn from_failure(err: &crate::error::GmailMcpError) -> Self {
        Self::error(err.to_string())
    }

    /// Whether this is an error payload
    pub fn is_error(&self) -> bool {
        matches!(self, ToolPayload::Error(_))
    }

    /// Error message, if this is an error payload
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ToolPayload::Error(e) => Some(&e.error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_deserialize() {
        let json = r#"{
            "id": "18c1",
            "threadId": "18c0",
            "labelIds": ["INBOX", "UNREAD"],
            "snippet": "Hi there",
            "payload": {
                "mimeType": "text/plain",
                "headers": [{"name": "Subject", "value": "Hello"}],
                "body": {"size": 5, "data": "SGVsbG8="}
            }
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.thread_id.as_deref(), Some("18c0"));
        assert_eq!(message.label_ids, vec!["INBOX", "UNREAD"]);
        let payload = message.payload.unwrap();
        assert_eq!(payload.headers[0].value, "Hello");
        assert!(payload.parts.is_empty());
    }

    #[test]
    fn test_empty_message_list() {
        let list: MessageList = serde_json::from_str(r#"{"resultSizeEstimate": 0}"#).unwrap();
        assert!(list.messages.is_empty());
    }

    #[test]
    fn test_email_json_shape() {
        let email = Email {
            id: "1".to_string(),
            thread_id: "t1".to_string(),
            labels: vec!["INBOX".to_string()],
            ..Default::default()
        };
        let value = serde_json::to_value(&email).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec!["body", "date", "from", "id", "labels", "snippet", "subject", "thread_id", "to"]
        );
    }

    #[test]
    fn test_payload_untagged_decoding() {
        let err: ToolPayload = serde_json::from_str(r#"{"error": "boom"}"#).unwrap();
        assert_eq!(err.error_message(), Some("boom"));

        let list: ToolPayload = serde_json::from_str(
            r#"{"tool": "get_unread_emails", "success": true, "count": 0, "emails": []}"#,
        )
        .unwrap();
        assert!(matches!(list, ToolPayload::EmailList(ref p) if p.tool == "get_unread_emails"));

        let single = serde_json::to_string(&Email::default()).unwrap();
        let single: ToolPayload = serde_json::from_str(&single).unwrap();
        assert!(matches!(single, ToolPayload::Email(_)));
    }

    #[test]
    fn test_search_payload_echoes_query() {
        let payload = EmailListPayload::new("search_emails", Some("from:ana".to_string()), vec![]);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["query"], "from:ana");
        assert_eq!(value["count"], 0);

        let recent = EmailListPayload::new("get_recent_emails", None, vec![]);
        let value = serde_json::to_value(&recent).unwrap();
        assert!(value.get("query").is_none());
    }
}
