//! MCP connection management
//!
//! Spawns one subprocess per configured MCP server and mediates its
//! JSON-RPC request/response protocol over stdio. Requests may be
//! pipelined; responses are demultiplexed by request id, so they can
//! arrive in any order.

use super::protocol::{
    initialize_params, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, McpServerConfig,
    McpSettings, McpTool, ToolsListResult,
};
use crate::error::McpError;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Lifecycle state of one MCP server connection.
///
/// `Unstarted` is the implicit state before [`McpConnection::connect`] is
/// called (no connection object exists yet). Tool listing and tool calls
/// run while the connection is `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Subprocess spawned, handshake in progress
    Starting,
    /// Handshake complete, requests accepted
    Ready,
    /// Spawn or handshake failed, or the transport died
    Failed,
    /// Explicitly shut down
    Closed,
}

type PendingMap = Arc<DashMap<i64, oneshot::Sender<Result<Value, McpError>>>>;

/// A live connection to one MCP server subprocess.
pub struct McpConnection {
    server: String,
    settings: McpSettings,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<BufWriter<ChildStdin>>>,
    next_id: AtomicI64,
    pending: PendingMap,
    state: Arc<StdMutex<ConnectionState>>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("server", &self.server)
            .field("state", &self.state.lock().map(|s| *s).ok())
            .finish_non_exhaustive()
    }
}

impl McpConnection {
    /// Spawn the configured server and complete the initialize handshake.
    ///
    /// Distinguishes spawn failure ([`McpError::Spawn`]), handshake timeout
    /// ([`McpError::HandshakeTimeout`]), and protocol violations
    /// ([`McpError::Protocol`]).
    pub async fn connect(
        server: &str,
        config: &McpServerConfig,
        settings: McpSettings,
    ) -> Result<Self, McpError> {
        debug!("Connecting MCP server '{}': {}", server, config.command);

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                server: server.to_string(),
                reason: e.to_string(),
            })?;

        let child_stdin = child.stdin.take().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            reason: "failed to capture stdin".to_string(),
        })?;
        let child_stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            reason: "failed to capture stdout".to_string(),
        })?;

        let pending: PendingMap = Arc::new(DashMap::new());
        let state = Arc::new(StdMutex::new(ConnectionState::Starting));

        let reader_handle = tokio::spawn(reader_loop(
            child_stdout,
            Arc::clone(&pending),
            Arc::clone(&state),
            server.to_string(),
        ));

        let connection = Self {
            server: server.to_string(),
            settings,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(BufWriter::new(child_stdin))),
            next_id: AtomicI64::new(1),
            pending,
            state,
            _reader_handle: reader_handle,
        };

        match timeout(connection.settings.connect_timeout, connection.handshake()).await {
            Ok(Ok(())) => {
                connection.set_state(ConnectionState::Ready);
                debug!("MCP server '{}' ready", server);
                Ok(connection)
            }
            Ok(Err(e)) => {
                connection.set_state(ConnectionState::Failed);
                connection.close().await;
                Err(e)
            }
            Err(_) => {
                connection.set_state(ConnectionState::Failed);
                connection.close().await;
                Err(McpError::HandshakeTimeout {
                    server: server.to_string(),
                })
            }
        }
    }

    /// Initialize request followed by the initialized notification.
    async fn handshake(&self) -> Result<(), McpError> {
        let result = self
            .request("initialize", Some(initialize_params()))
            .await?;
        if !result.is_object() {
            return Err(McpError::Protocol(format!(
                "initialize result is not an object: {result}"
            )));
        }
        self.notify("notifications/initialized", None).await
    }

    /// Name of the server this connection talks to.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, new: ConnectionState) {
        *self.state.lock().expect("state lock poisoned") = new;
    }

    /// Discover the tools the server currently advertises.
    ///
    /// The list is fetched fresh on every call; a timeout here is
    /// retryable and leaves the connection usable.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        self.ensure_ready()?;
        let result = self
            .request("tools/list", Some(serde_json::json!({})))
            .await?;
        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("malformed tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    /// Invoke a tool by name and return its raw result payload.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, McpError> {
        self.ensure_ready()?;
        self.request(
            "tools/call",
            Some(serde_json::json!({
                "name": tool,
                "arguments": arguments,
            })),
        )
        .await
    }

    fn ensure_ready(&self) -> Result<(), McpError> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed | ConnectionState::Failed => Err(McpError::ConnectionClosed),
            ConnectionState::Starting => Err(McpError::NotReady),
        }
    }

    /// Send a request and wait for its correlated response.
    ///
    /// Requests may be issued concurrently; each waits on its own channel
    /// keyed by id. On timeout only this request's pending entry is
    /// dropped — the connection itself stays usable.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if let Err(e) = self.write_message(&serde_json::to_value(&request).map_err(to_protocol)?).await
        {
            self.pending.remove(&id);
            return Err(e);
        }

        match timeout(self.settings.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_message(&serde_json::to_value(&notification).map_err(to_protocol)?)
            .await
    }

    /// Write one newline-delimited JSON message. The stdin lock serializes
    /// concurrent writers so messages never interleave mid-line.
    async fn write_message(&self, message: &Value) -> Result<(), McpError> {
        let mut line = serde_json::to_string(message).map_err(to_protocol)?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| McpError::Io(e.to_string()))?;

        debug!("MCP '{}' -> {}", self.server, line.trim_end());
        Ok(())
    }

    /// Terminate the subprocess.
    ///
    /// Closing stdin signals the server to exit; if it does not within the
    /// configured grace period it is killed. Safe to call more than once.
    pub async fn close(&self) {
        if self.state() != ConnectionState::Failed {
            self.set_state(ConnectionState::Closed);
        }

        // Dropping the writer closes the pipe, which is the stdio
        // transport's shutdown signal.
        self.stdin.lock().await.take();

        let mut child_guard = self.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            match timeout(self.settings.shutdown_grace, child.wait()).await {
                Ok(_) => debug!("MCP server '{}' exited cleanly", self.server),
                Err(_) => {
                    warn!(
                        "MCP server '{}' did not exit within grace period, killing",
                        self.server
                    );
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }

        fail_all_pending(&self.pending);
    }
}

fn to_protocol(e: serde_json::Error) -> McpError {
    McpError::Protocol(e.to_string())
}

/// Resolve every pending request with a connection-closed error.
fn fail_all_pending(pending: &PendingMap) {
    let ids: Vec<i64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in ids {
        if let Some((_, tx)) = pending.remove(&id) {
            let _ = tx.send(Err(McpError::ConnectionClosed));
        }
    }
}

/// Background task: read newline-delimited responses from the server's
/// stdout and dispatch each to its pending request by id.
///
/// Generic over the reader so the demultiplexing logic is testable
/// without a subprocess.
async fn reader_loop<R>(
    stdout: R,
    pending: PendingMap,
    state: Arc<StdMutex<ConnectionState>>,
    server: String,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                debug!("MCP '{}' <- {}", server, line);

                let response: JsonRpcResponse = match serde_json::from_str(line) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("MCP '{}' sent unparseable line: {}", server, e);
                        continue;
                    }
                };

                // Server-initiated notifications carry no id; skip them.
                let Some(id) = response.id else {
                    continue;
                };

                if let Some((_, tx)) = pending.remove(&id) {
                    let outcome = match response.error {
                        Some(err) => Err(McpError::Tool {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(response.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                } else {
                    debug!("MCP '{}' response for unknown id {}", server, id);
                }
            }
            Ok(None) | Err(_) => break,
        }
    }

    // Transport is gone. Unless this was a deliberate close, mark the
    // connection failed so the pool reconnects on next use.
    {
        let mut guard = state.lock().expect("state lock poisoned");
        if *guard != ConnectionState::Closed {
            *guard = ConnectionState::Failed;
        }
    }
    fail_all_pending(&pending);
}
