//! Shared fixtures: a mock Gmail API with an OAuth token endpoint, and
//! helpers wiring a server and client together over an in-memory pipe.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

use gmail_reader_mcp::config::Config;
use gmail_reader_mcp::gmail::auth::StoredCredentials;
use gmail_reader_mcp::gmail::service::MailService;
use gmail_reader_mcp::mcp::client::GmailMcpClient;
use gmail_reader_mcp::mcp::server::McpServer;
use gmail_reader_mcp::mcp::session::{McpSession, ServerCommand};

pub const VALID_TOKEN: &str = "valid-token";
pub const REFRESHED_TOKEN: &str = "refreshed-token";

/// Requests observed by the mock
#[derive(Clone, Default)]
pub struct MockState {
    pub list_params: Arc<Mutex<Vec<HashMap<String, String>>>>,
    pub bearer_tokens: Arc<Mutex<Vec<String>>>,
    pub token_calls: Arc<AtomicUsize>,
}

impl MockState {
    pub fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub fn last_list_params(&self) -> HashMap<String, String> {
        self.list_params
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

/// A running mock; `base_url` has no trailing slash
pub struct MockGmail {
    pub base_url: String,
    pub state: MockState,
}

impl MockGmail {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/gmail/v1/users/me/messages", get(list_messages))
            .route("/gmail/v1/users/me/messages/:id", get(get_message))
            .route("/token", post(issue_token))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Config rooted at `dir` that talks to this mock
    pub fn config(&self, dir: &Path) -> Config {
        let mut config = Config::with_dir(dir);
        config.api_base_url = format!("{}/gmail/v1", self.base_url);
        config
    }

    /// Write a client secret file pointing at the mock token endpoint
    pub fn write_client_secret(&self, config: &Config) {
        let secret = json!({
            "installed": {
                "client_id": "test-client",
                "client_secret": "test-secret",
                "token_uri": format!("{}/token", self.base_url)
            }
        });
        std::fs::write(&config.oauth_path, secret.to_string()).unwrap();
    }
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Persist a token expiring `expires_in` seconds from now
pub fn write_token(config: &Config, access_token: &str, refresh_token: Option<&str>, expires_in: i64) {
    let creds = StoredCredentials {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        token_type: "Bearer".to_string(),
        expiry_date: Some(now_unix() + expires_in),
        scope: String::new(),
    };
    std::fs::write(
        &config.credentials_path,
        serde_json::to_string(&creds).unwrap(),
    )
    .unwrap();
}

pub fn read_token(config: &Config) -> StoredCredentials {
    let content = std::fs::read_to_string(&config.credentials_path).unwrap();
    serde_json::from_str(&content).unwrap()
}

/// Start a server task on one end of a pipe and return the other end
pub fn spawn_server(service: Arc<MailService>) -> DuplexStream {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut server = McpServer::new(service).unwrap();
    tokio::spawn(async move {
        let (reader, writer) = tokio::io::split(server_io);
        server.run(reader, writer).await.unwrap();
    });
    client_io
}

pub async fn open_session(io: DuplexStream, timeout: Duration) -> McpSession {
    let (reader, writer) = tokio::io::split(io);
    McpSession::connect_io(reader, writer, None, timeout)
        .await
        .unwrap()
}

/// A client with no launch command, for use with `connect_with`
pub fn detached_client(timeout: Duration) -> GmailMcpClient {
    GmailMcpClient::new(ServerCommand::new("unused", vec![]), timeout)
}

/// Client connected to a real server backed by `service`
pub async fn connected_client(service: Arc<MailService>) -> GmailMcpClient {
    let timeout = Duration::from_secs(10);
    let session = open_session(spawn_server(service), timeout).await;
    let client = detached_client(timeout);
    client.connect_with(session).await.unwrap();
    client
}

/// A server that completes the handshake and lists no tools, but never
/// answers `tools/call`
pub fn spawn_silent_server() -> DuplexStream {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(server_io);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let result = match request["method"].as_str() {
                Some("initialize") => json!({
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": "silent", "version": "0"},
                    "capabilities": {"tools": {}}
                }),
                Some("tools/list") => json!({"tools": []}),
                _ => continue,
            };
            let response = json!({"jsonrpc": "2.0", "id": request["id"], "result": result});
            let mut line = response.to_string();
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });
    client_io
}

// ==================== Mock handlers ====================

fn record_bearer(state: &MockState, headers: &HeaderMap) {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        let token = value.trim_start_matches("Bearer ").to_string();
        state.bearer_tokens.lock().unwrap().push(token);
    }
}

/// Newest first; `broken` always fails to fetch and `garbled` has a body
/// that is not UTF-8
fn ids_for(query: Option<&str>) -> Vec<&'static str> {
    match query {
        None => vec!["m2", "m1", "broken", "garbled"],
        Some("is:unread") => vec!["m1"],
        Some("from:ana@example.com") => vec!["m1"],
        Some(_) => vec![],
    }
}

async fn list_messages(
    State(state): State<MockState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    record_bearer(&state, &headers);
    state.list_params.lock().unwrap().push(params.clone());

    let max: usize = params
        .get("maxResults")
        .and_then(|m| m.parse().ok())
        .unwrap_or(100);
    let ids: Vec<_> = ids_for(params.get("q").map(String::as_str))
        .into_iter()
        .take(max)
        .collect();

    if ids.is_empty() {
        return Json(json!({"resultSizeEstimate": 0}));
    }
    let messages: Vec<_> = ids
        .iter()
        .map(|id| json!({"id": id, "threadId": format!("t-{}", id)}))
        .collect();
    Json(json!({"messages": messages, "resultSizeEstimate": ids.len()}))
}

async fn get_message(
    State(state): State<MockState>,
    headers: HeaderMap,
    UrlPath(id): UrlPath<String>,
) -> impl IntoResponse {
    record_bearer(&state, &headers);

    match id.as_str() {
        "m1" => (StatusCode::OK, Json(message_m1())),
        "m2" => (StatusCode::OK, Json(message_m2())),
        "garbled" => (StatusCode::OK, Json(message_garbled())),
        "broken" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": {"code": 500, "message": "backend error"}})),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"code": 404, "message": "Requested entity was not found."}})),
        ),
    }
}

async fn issue_token(State(state): State<MockState>) -> Json<Value> {
    state.token_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "access_token": REFRESHED_TOKEN,
        "expires_in": 3599,
        "token_type": "Bearer",
        "scope": "https://www.googleapis.com/auth/gmail.readonly"
    }))
}

/// Single-part plain text message
pub fn message_m1() -> Value {
    json!({
        "id": "m1",
        "threadId": "t-m1",
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": "Hello",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": "ana@example.com"},
                {"name": "To", "value": "me@example.com"},
                {"name": "Subject", "value": "First"},
                {"name": "Date", "value": "Mon, 1 Sep 2025 10:00:00 +0000"}
            ],
            "body": {"size": 5, "data": "SGVsbG8="}
        }
    })
}

/// Alternative message whose html part comes first, with lowercase headers
pub fn message_m2() -> Value {
    json!({
        "id": "m2",
        "threadId": "t-m2",
        "labelIds": ["INBOX"],
        "snippet": "oi",
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                {"name": "from", "value": "bia@example.com"},
                {"name": "to", "value": "me@example.com"},
                {"name": "subject", "value": "Second"},
                {"name": "date", "value": "Tue, 2 Sep 2025 10:00:00 +0000"},
                {"name": "X-Mailer", "value": "test"}
            ],
            "parts": [
                {"mimeType": "text/html", "body": {"size": 9, "data": "PGI+b2k8L2I+"}},
                {"mimeType": "text/plain", "body": {"size": 2, "data": "b2k="}}
            ]
        }
    })
}

/// Plain text part whose data decodes to bytes 0xff 0xfe
pub fn message_garbled() -> Value {
    json!({
        "id": "garbled",
        "threadId": "t-garbled",
        "labelIds": ["INBOX"],
        "snippet": "",
        "payload": {
            "mimeType": "text/plain",
            "headers": [{"name": "Subject", "value": "Garbled"}],
            "body": {"size": 2, "data": "__4="}
        }
    })
}
