//! Stdio transport for MCP servers running as local child processes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::adapters::mcp::transports::{McpTransport, TransportKind};
use crate::errors::{FabricError, FabricResult};

/// Live channel state: the child process and its piped streams.
struct StdioChannel {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Transport that spawns an MCP server as a child process and speaks
/// newline-delimited JSON-RPC over its stdin/stdout.
///
/// Requests are serialized: the channel lock is held for the full
/// write/read cycle, so responses are always consumed in issue order.
pub struct StdioTransport {
    /// Command to execute (e.g. "python", "node", "npx").
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Extra environment variables for the child (parent env is inherited).
    pub env: HashMap<String, String>,
    channel: Mutex<Option<StdioChannel>>,
    next_id: AtomicU64,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            channel: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn connected(&self) -> bool {
        // try_lock: a held lock means a request is in flight on a live channel.
        match self.channel.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => true,
        }
    }

    async fn connect(&self) -> FabricResult<()> {
        let mut guard = self.channel.lock().await;
        if guard.is_some() {
            return Err(FabricError::AlreadyConnected);
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            FabricError::TransportUnavailable(format!(
                "failed to start MCP server process '{}': {e}",
                self.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FabricError::TransportUnavailable("child stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FabricError::TransportUnavailable("child stdout not piped".into()))?;

        *guard = Some(StdioChannel {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });

        log::info!(
            "stdio transport connected: {} {}",
            self.command,
            self.args.join(" ")
        );
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        let mut guard = self.channel.lock().await;
        if let Some(mut channel) = guard.take() {
            let _ = channel.child.kill().await;
            log::info!("stdio transport disconnected: {}", self.command);
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> FabricResult<Value> {
        let mut guard = self.channel.lock().await;
        let channel = guard.as_mut().ok_or(FabricError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let mut line = serde_json::to_string(&payload)
            .map_err(|e| FabricError::InvalidArgs(e.to_string()))?;
        line.push('\n');
        channel
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FabricError::TransportUnavailable(format!("stdio write failed: {e}")))?;
        channel
            .stdin
            .flush()
            .await
            .map_err(|e| FabricError::TransportUnavailable(format!("stdio flush failed: {e}")))?;

        // Read until the correlated response arrives; notifications and
        // responses for other ids are skipped.
        let mut buf = String::new();
        loop {
            buf.clear();
            let n = channel.stdout.read_line(&mut buf).await.map_err(|e| {
                FabricError::TransportUnavailable(format!("stdio read failed: {e}"))
            })?;
            if n == 0 {
                return Err(FabricError::TransportUnavailable(
                    "MCP server closed its stdout".into(),
                ));
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    log::debug!("skipping non-JSON line from MCP server: {trimmed}");
                    continue;
                }
            };
            match message.get("id").and_then(Value::as_u64) {
                Some(message_id) if message_id == id => {
                    if let Some(error) = message.get("error") {
                        return Err(FabricError::remote_with_body(
                            error
                                .get("message")
                                .and_then(Value::as_str)
                                .unwrap_or("MCP server error")
                                .to_string(),
                            error.clone(),
                        ));
                    }
                    return Ok(message.get("result").cloned().unwrap_or(Value::Null));
                }
                _ => {
                    log::debug!("skipping uncorrelated MCP message: {}", message);
                }
            }
        }
    }

    fn identifier(&self) -> String {
        if self.args.is_empty() {
            format!("stdio:{}", self.command)
        } else {
            format!("stdio:{}:{}", self.command, self.args.join(":"))
        }
    }
}
