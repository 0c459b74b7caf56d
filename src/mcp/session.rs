//! Client side of the MCP transport
//!
//! A session owns one bidirectional stream (usually a spawned server's
//! stdin/stdout). A background task reads reply lines and routes them to the
//! waiting caller by request id. A second task owns the write half and drains
//! an outgoing queue, so a stalled server can never wedge `close`.
//! Request/response exchanges are serialized by a fair async mutex, so
//! concurrent callers queue and replies come back in send order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{McpError, Result};
use crate::mcp::types::*;

const CLIENT_NAME: &str = "gmail-reader-client";

/// Grace period for a server process to exit after its stdin closes
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(5);

type PendingMap = HashMap<i64, oneshot::Sender<JsonRpcResponse>>;

/// `None` once the session is closed
type Pending = Arc<StdMutex<Option<PendingMap>>>;

/// A framed line and the channel its write result is reported on
type Outgoing = (Vec<u8>, oneshot::Sender<std::io::Result<()>>);

/// How to launch the server process
#[derive(Debug, Clone)]
pub struct ServerCommand {
    /// Executable
    pub program: PathBuf,

    /// Arguments
    pub args: Vec<String>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ServerCommand {
    /// Launch `program` with `args`
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    /// Launch the currently running binary in server mode
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec!["serve".to_string()]))
    }
}

/// An established MCP session
pub struct McpSession {
    /// `None` once the session is closed
    outgoing: StdMutex<Option<mpsc::UnboundedSender<Outgoing>>>,

    writer_task: StdMutex<Option<JoinHandle<()>>>,

    /// Held for a whole request/response exchange
    exchange: Mutex<()>,

    pending: Pending,

    reader_task: StdMutex<Option<JoinHandle<()>>>,

    child: Mutex<Option<Child>>,

    next_id: AtomicI64,

    closed: AtomicBool,

    request_timeout: Duration,

    server_info: Option<Implementation>,
}

impl McpSession {
    /// Spawn the server process and perform the handshake over its stdio
    pub async fn spawn(command: &ServerCommand, request_timeout: Duration) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            McpError::connection(format!(
                "failed to spawn MCP server '{}': {}",
                command.program.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::connection("failed to get server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::connection("failed to get server stdout"))?;

        Self::connect_io(stdout, stdin, Some(child), request_timeout).await
    }

    /// Perform the handshake over an existing stream
    ///
    /// On failure every resource acquired so far (the I/O tasks and the
    /// child process) is released before the error is returned.
    pub async fn connect_io<R, W>(
        reader: R,
        writer: W,
        child: Option<Child>,
        request_timeout: Duration,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: Pending = Arc::new(StdMutex::new(Some(HashMap::new())));
        let reader_task = tokio::spawn(read_loop(reader, Arc::clone(&pending)));
        let (outgoing, queue) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, queue));

        let mut session = Self {
            outgoing: StdMutex::new(Some(outgoing)),
            writer_task: StdMutex::new(Some(writer_task)),
            exchange: Mutex::new(()),
            pending,
            reader_task: StdMutex::new(Some(reader_task)),
            child: Mutex::new(child),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            request_timeout,
            server_info: None,
        };

        match session.handshake().await {
            Ok(info) => {
                tracing::info!("Connected to MCP server {} {}", info.name, info.version);
                session.server_info = Some(info);
                Ok(session)
            }
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<Implementation> {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ClientCapabilities::default(),
        };

        let result = match self.request(methods::INITIALIZE, Some(serde_json::to_value(params)?)).await {
            Ok(result) => result,
            Err(crate::error::GmailMcpError::Mcp(e)) if !e.is_transport() => {
                return Err(McpError::connection(format!("handshake rejected: {}", e)).into())
            }
            Err(e) => return Err(e),
        };

        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| McpError::connection(format!("invalid initialize result: {}", e)))?;

        if result.protocol_version != MCP_VERSION {
            return Err(McpError::connection(format!(
                "unsupported protocol version {} (expected {})",
                result.protocol_version, MCP_VERSION
            ))
            .into());
        }
        if result.capabilities.tools.is_none() {
            return Err(McpError::connection("server does not offer tools").into());
        }

        self.notify(methods::INITIALIZED).await?;
        Ok(result.server_info)
    }

    /// Server identity reported during the handshake
    pub fn server_info(&self) -> Option<&Implementation> {
        self.server_info.as_ref()
    }

    /// Whether [`close`](Self::close) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tools advertised by the server, in server order
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.request(methods::LIST_TOOLS, None).await?;
        let result: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| McpError::malformed(format!("invalid tools/list result: {}", e)))?;
        Ok(result.tools)
    }

    /// Call a tool and wait for its result
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result = self.request(methods::CALL_TOOL, Some(serde_json::to_value(params)?)).await?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|e| McpError::malformed(format!("invalid tools/call result: {}", e)))?;
        Ok(result)
    }

    /// Liveness check
    pub async fn ping(&self) -> Result<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// Send a request and wait for its reply
    ///
    /// The deadline covers the whole exchange, including a write that blocks
    /// because the server stopped reading.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let _turn = self.exchange.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(RequestId::Number(id), method, params);

        let response = match tokio::time::timeout(self.request_timeout, self.exchange_once(id, &request)).await {
            Ok(response) => response?,
            Err(_) => {
                self.forget(id);
                tracing::warn!("{} (id {}) timed out", method, id);
                return Err(self.timeout_error());
            }
        };

        match response.error {
            Some(error) => Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            }
            .into()),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    async fn exchange_once(&self, id: i64, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self
                .pending
                .lock()
                .map_err(|_| McpError::connection("pending request table poisoned"))?;
            match pending.as_mut() {
                Some(map) => {
                    map.insert(id, tx);
                }
                None => return Err(McpError::connection("session is closed").into()),
            }
        }

        if let Err(e) = self.send(request).await {
            self.forget(id);
            return Err(e);
        }

        rx.await
            .map_err(|_| McpError::connection("connection closed before a reply arrived").into())
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let notification = JsonRpcRequest::notification(method);
        match tokio::time::timeout(self.request_timeout, self.send(&notification)).await {
            Ok(sent) => sent,
            Err(_) => {
                tracing::warn!("{} notification timed out", method);
                Err(self.timeout_error())
            }
        }
    }

    fn timeout_error(&self) -> crate::error::GmailMcpError {
        McpError::Timeout {
            millis: self.request_timeout.as_millis() as u64,
        }
        .into()
    }

    /// Queue one line for the writer task and wait until it is flushed
    async fn send(&self, message: &JsonRpcRequest) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let outgoing = self
            .outgoing
            .lock()
            .ok()
            .and_then(|o| o.clone())
            .ok_or_else(|| McpError::connection("session is closed"))?;

        let (ack, written) = oneshot::channel();
        outgoing
            .send((line, ack))
            .map_err(|_| McpError::connection("session is closed"))?;

        match written.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(McpError::connection(format!("failed to write to server: {}", e)).into()),
            Err(_) => Err(McpError::connection("session is closed").into()),
        }
    }

    fn forget(&self, id: i64) {
        if let Ok(mut pending) = self.pending.lock() {
            if let Some(map) = pending.as_mut() {
                map.remove(&id);
            }
        }
    }

    /// Release the stream and the server process
    ///
    /// Every call still waiting for a reply resolves with a connection error.
    /// Calling this more than once is harmless.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut pending) = self.pending.lock() {
            if let Some(map) = pending.take() {
                if !map.is_empty() {
                    tracing::warn!("Closing session with {} pending request(s)", map.len());
                }
            }
        }

        if let Some(handle) = self.reader_task.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }

        if let Ok(mut outgoing) = self.outgoing.lock() {
            outgoing.take();
        }

        // Aborting drops the write half even mid-write, closing the server's stdin
        if let Some(handle) = self.writer_task.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("MCP server exited with {}", status),
                Ok(Err(e)) => tracing::warn!("Failed to reap MCP server: {}", e),
                Err(_) => {
                    tracing::warn!("MCP server did not exit, killing it");
                    child.kill().await.ok();
                }
            }
        }

        tracing::debug!("MCP session closed");
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_task.get_mut().ok().and_then(|h| h.take()) {
            handle.abort();
        }
        if let Some(handle) = self.writer_task.get_mut().ok().and_then(|h| h.take()) {
            handle.abort();
        }
        // The child, if any, is killed by `kill_on_drop`
    }
}

/// Route reply lines to their waiters until the stream ends
async fn read_loop<R>(reader: R, pending: Pending)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(response) => route(&pending, response),
                    Err(e) => tracing::debug!("Ignoring non-response message: {}", e),
                }
            }
            Ok(None) => {
                tracing::debug!("MCP server closed the stream");
                break;
            }
            Err(e) => {
                tracing::warn!("Error reading from MCP server: {}", e);
                break;
            }
        }
    }

    // Dropping the senders wakes every waiter with a closed channel
    if let Ok(mut pending) = pending.lock() {
        pending.take();
    }
}

/// Write queued lines in order, acknowledging each one
async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Outgoing>)
where
    W: AsyncWrite + Unpin,
{
    while let Some((line, ack)) = queue.recv().await {
        let written = async {
            writer.write_all(&line).await?;
            writer.flush().await
        }
        .await;

        let failed = written.is_err();
        if let Err(e) = &written {
            tracing::warn!("Error writing to MCP server: {}", e);
        }
        if ack.send(written).is_err() {
            tracing::debug!("Writer for a dropped request finished");
        }
        if failed {
            break;
        }
    }

    writer.shutdown().await.ok();
}

fn route(pending: &Pending, response: JsonRpcResponse) {
    let RequestId::Number(id) = response.id else {
        tracing::warn!("Reply with unexpected id {}", response.id);
        return;
    };

    let waiter = pending
        .lock()
        .ok()
        .and_then(|mut p| p.as_mut().and_then(|map| map.remove(&id)));

    match waiter {
        Some(tx) => {
            if tx.send(response).is_err() {
                tracing::debug!("Waiter for request {} is gone", id);
            }
        }
        None => tracing::warn!("Reply for unknown request {}", id),
    }
}
