//! Typed client for the Gmail reader tools
//!
//! Wraps an [`McpSession`] with a small lifecycle state machine and one method
//! per tool. Every method returns the decoded JSON payload the server put in
//! the first content block.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::{McpError, Result};
use crate::gmail::types::ToolPayload;
use crate::mcp::session::{McpSession, ServerCommand};
use crate::mcp::tools::ToolName;
use crate::mcp::types::{CallToolResult, ToolDescriptor};

/// Lifecycle of a client
///
/// `Disconnected -> Connecting -> Ready -> Closed`. A failed connect falls
/// back to `Disconnected`; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
    Closed,
}

/// Client for a Gmail reader MCP server
pub struct GmailMcpClient {
    command: ServerCommand,
    request_timeout: Duration,
    state: StdMutex<SessionState>,
    session: RwLock<Option<Arc<McpSession>>>,
}

impl GmailMcpClient {
    /// Create a client that will launch `command` on [`connect`](Self::connect)
    pub fn new(command: ServerCommand, request_timeout: Duration) -> Self {
        Self {
            command,
            request_timeout,
            state: StdMutex::new(SessionState::Disconnected),
            session: RwLock::new(None),
        }
    }

    /// Client that launches this binary in server mode
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(ServerCommand::current_exe()?, config.request_timeout))
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(SessionState::Closed)
    }

    fn set_state(&self, next: SessionState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    /// Move from `from` to `to`; false if another transition got there first
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        match self.state.lock() {
            Ok(mut state) if *state == from => {
                *state = to;
                true
            }
            _ => false,
        }
    }

    /// Claim the `Connecting` state; `Ok(false)` means already connected
    fn begin_connect(&self) -> Result<bool> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| McpError::connection("client state poisoned"))?;
        match *state {
            SessionState::Ready => Ok(false),
            SessionState::Connecting => {
                Err(McpError::connection("a connection attempt is already in progress").into())
            }
            SessionState::Closed => {
                Err(McpError::connection("client has been closed; create a new one").into())
            }
            SessionState::Disconnected => {
                *state = SessionState::Connecting;
                Ok(true)
            }
        }
    }

    /// Launch the server and complete the handshake
    pub async fn connect(&self) -> Result<()> {
        if !self.begin_connect()? {
            return Ok(());
        }

        tracing::info!("Starting MCP server {}", self.command.program.display());
        match McpSession::spawn(&self.command, self.request_timeout).await {
            Ok(session) => self.adopt(session).await,
            Err(e) => {
                self.transition(SessionState::Connecting, SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Use an already established session instead of spawning a server
    pub async fn connect_with(&self, session: McpSession) -> Result<()> {
        if !self.begin_connect()? {
            session.close().await;
            return Ok(());
        }
        self.adopt(session).await
    }

    async fn adopt(&self, session: McpSession) -> Result<()> {
        let tools = match session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                session.close().await;
                self.transition(SessionState::Connecting, SessionState::Disconnected);
                return Err(e);
            }
        };
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        tracing::info!("Connected to server with tools: {:?}", names);

        let mut slot = self.session.write().await;
        if !self.transition(SessionState::Connecting, SessionState::Ready) {
            // disconnect() ran while the handshake was in flight
            drop(slot);
            session.close().await;
            return Err(McpError::connection("client was closed while connecting").into());
        }
        *slot = Some(Arc::new(session));
        Ok(())
    }

    /// Close the session and terminate the server
    ///
    /// Calls still waiting for a reply fail with a connection error. The
    /// client cannot be reconnected afterwards.
    pub async fn disconnect(&self) {
        self.set_state(SessionState::Closed);
        let session = self.session.write().await.take();
        if let Some(session) = session {
            session.close().await;
            tracing::info!("Disconnected from MCP server");
        }
    }

    async fn ready_session(&self) -> Result<Arc<McpSession>> {
        if self.state() != SessionState::Ready {
            return Err(McpError::NotConnected.into());
        }
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::NotConnected.into())
    }

    /// Tools the server advertises
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ready_session().await?.list_tools().await
    }

    /// Most recent emails
    pub async fn get_recent_emails(&self, count: u32) -> Result<ToolPayload> {
        self.call(ToolName::GetRecentEmails, json!({ "count": count }))
            .await
    }

    /// Unread emails
    pub async fn get_unread_emails(&self, count: u32) -> Result<ToolPayload> {
        self.call(ToolName::GetUnreadEmails, json!({ "count": count }))
            .await
    }

    /// Emails matching a Gmail search query
    pub async fn search_emails(&self, query: &str, count: u32) -> Result<ToolPayload> {
        self.call(
            ToolName::SearchEmails,
            json!({ "query": query, "count": count }),
        )
        .await
    }

    /// Full details of one email
    pub async fn get_email_details(&self, message_id: &str) -> Result<ToolPayload> {
        self.call(
            ToolName::GetEmailDetails,
            json!({ "message_id": message_id }),
        )
        .await
    }

    async fn call(&self, tool: ToolName, arguments: Value) -> Result<ToolPayload> {
        let session = self.ready_session().await?;
        tracing::debug!("Calling {}", tool);
        let result = session.call_tool(tool.as_str(), arguments).await?;
        decode_payload(&result)
    }
}

fn decode_payload(result: &CallToolResult) -> Result<ToolPayload> {
    let text = result
        .first_text()
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| McpError::malformed("empty response from server"))?;

    serde_json::from_str(text)
        .map_err(|e| McpError::malformed(format!("undecodable tool payload: {}", e)).into())
}
