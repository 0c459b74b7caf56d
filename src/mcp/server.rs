//! MCP Server implementation
//!
//! Reads newline-delimited JSON-RPC requests from a byte stream and writes
//! one response line per request. Requests are handled sequentially, so
//! responses leave in the order requests arrived.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::Result;
use crate::gmail::service::MailService;
use crate::mcp::tools::ToolDispatcher;
use crate::mcp::types::*;

/// MCP Server info
const SERVER_NAME: &str = "gmail-reader";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server for the Gmail reader tools
pub struct McpServer {
    /// Tool dispatcher
    dispatcher: ToolDispatcher,

    /// Whether the client has sent `initialize`
    initialized: bool,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(service: Arc<MailService>) -> Result<Self> {
        Ok(Self {
            dispatcher: ToolDispatcher::new(service)?,
            initialized: false,
        })
    }

    /// Run the server on stdio
    pub async fn run_stdio(&mut self) -> Result<()> {
        self.run(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve requests until the reader reaches end of stream
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                let response_str = serde_json::to_string(&response)?;
                writer.write_all(response_str.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        tracing::info!("Client closed the stream, shutting down");
        Ok(())
    }

    /// Handle an incoming JSON-RPC message
    async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!("Unparseable message: {}", e);
                return Some(JsonRpcResponse::error(
                    RequestId::Number(0),
                    JsonRpcError::parse_error(e.to_string()),
                ));
            }
        };

        let Some(id) = request.id.clone() else {
            self.handle_notification(&request);
            return None;
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request(format!("unsupported jsonrpc version: {}", request.jsonrpc)),
            ));
        }

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(&request),
            methods::PING => Ok(serde_json::json!({})),
            methods::LIST_TOOLS | methods::CALL_TOOL if !self.initialized => {
                Err(JsonRpcError::not_initialized())
            }
            methods::LIST_TOOLS => self.handle_list_tools(),
            methods::CALL_TOOL => self.handle_call_tool(&request).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn handle_notification(&mut self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            methods::INITIALIZED => tracing::debug!("Client finished initialization"),
            other => tracing::debug!("Ignoring notification {}", other),
        }
    }

    /// Handle initialize request
    fn handle_initialize(&mut self, request: &JsonRpcRequest) -> std::result::Result<Value, JsonRpcError> {
        if let Some(params) = request.params.clone() {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(params) => tracing::info!(
                    "Initialize from {} {} (protocol {})",
                    params.client_info.name,
                    params.client_info.version,
                    params.protocol_version
                ),
                Err(e) => return Err(JsonRpcError::invalid_params(e.to_string())),
            }
        }

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            server_info: Implementation {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability::default()),
            },
        };

        self.initialized = true;
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Handle list tools request
    fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: self.dispatcher.list_tools(),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }

    /// Handle call tool request
    async fn handle_call_tool(&self, request: &JsonRpcRequest) -> std::result::Result<Value, JsonRpcError> {
        let params: CallToolParams = match request.params.clone() {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tool parameters: {}", e)))?,
            None => return Err(JsonRpcError::invalid_params("Missing tool parameters")),
        };

        tracing::info!("Tool call: {}", params.name);
        let result = self.dispatcher.dispatch(&params.name, params.arguments).await;
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}
