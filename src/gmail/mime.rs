//! MIME body and header extraction
//!
//! Gmail returns a message as a tree of parts. The body shown to callers is
//! the first `text/plain` leaf found by [`extract_plain_text`]; parts are never
//! concatenated.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{GmailMcpError, Result, ValidationError};
use crate::gmail::types::MessagePart;

const TEXT_PLAIN: &str = "text/plain";

/// Decode base64url data from Gmail API
/// Handles both padded and non-padded base64url encoding
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(data))
        .or_else(|_| base64::engine::general_purpose::STANDARD.decode(data))
        .map_err(|e| {
            GmailMcpError::Validation(ValidationError::InvalidBase64 {
                message: e.to_string(),
            })
        })
}

/// Extract the plain-text body of a message payload
///
/// A leaf payload is decoded only when it is `text/plain` with inline data.
/// Otherwise children are examined in order: a `text/plain` child with data
/// wins immediately, a child with sub-parts is searched recursively and wins
/// if it yields non-empty text, anything else is skipped.
///
/// Data that is not valid base64url or not valid UTF-8 is an error.
pub fn extract_plain_text(payload: &MessagePart) -> Result<String> {
    let body = if payload.parts.is_empty() {
        match inline_data(payload) {
            Some(data) if is_plain_text(payload) => decode_text(data)?,
            _ => String::new(),
        }
    } else {
        let mut found = String::new();
        for part in &payload.parts {
            if is_plain_text(part) {
                if let Some(data) = inline_data(part) {
                    found = decode_text(data)?;
                    break;
                }
            } else if !part.parts.is_empty() {
                found = extract_plain_text(part)?;
                if !found.is_empty() {
                    break;
                }
            }
        }
        found
    };

    Ok(body.trim().to_string())
}

fn is_plain_text(part: &MessagePart) -> bool {
    part.mime_type.as_deref() == Some(TEXT_PLAIN)
}

fn inline_data(part: &MessagePart) -> Option<&str> {
    part.body.as_ref().and_then(|b| b.data.as_deref())
}

fn decode_text(data: &str) -> Result<String> {
    let bytes = decode_base64url(data)?;
    String::from_utf8(bytes).map_err(|e| {
        GmailMcpError::Validation(ValidationError::InvalidUtf8 {
            message: e.to_string(),
        })
    })
}

/// Find header value by name (case-insensitive)
pub fn find_header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// The headers kept on an [`Email`](crate::gmail::types::Email)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryHeaders {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
}

impl SummaryHeaders {
    /// Pick From/To/Subject/Date out of a payload; other headers are ignored
    pub fn from_part(part: &MessagePart) -> Self {
        let get = |name| find_header(part, name).unwrap_or("").to_string();
        Self {
            from: get("from"),
            to: get("to"),
            subject: get("subject"),
            date: get("date"),
        }
    }
}
