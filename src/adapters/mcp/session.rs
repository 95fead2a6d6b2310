//! MCP client session over a transport.
//!
//! Performs the protocol `initialize` handshake with client metadata and
//! exposes the tool/resource/prompt operations as typed calls. Every
//! request is bounded by the execution timeout; the transport is the only
//! thing that knows about framing.

use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::adapters::mcp::transports::{McpTransport, TransportKind};
use crate::errors::{FabricError, FabricResult};

/// Protocol revision announced during the handshake.
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// One initialized MCP session.
pub struct McpSession {
    transport: Box<dyn McpTransport>,
    execute_timeout: u64,
    server_info: RwLock<Option<Value>>,
}

impl McpSession {
    pub fn new(transport: Box<dyn McpTransport>, execute_timeout: u64) -> Self {
        Self {
            transport,
            execute_timeout,
            server_info: RwLock::new(None),
        }
    }

    /// Transport kind, for capability metadata.
    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Transport identifier, for logging.
    pub fn identifier(&self) -> String {
        self.transport.identifier()
    }

    /// Server metadata captured from the `initialize` response.
    pub fn server_info(&self) -> Option<Value> {
        self.server_info.read().clone()
    }

    /// Send one request, bounded by the execution timeout.
    async fn request(&self, method: &str, params: Value) -> FabricResult<Value> {
        match tokio::time::timeout(
            Duration::from_secs(self.execute_timeout),
            self.transport.request(method, params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FabricError::Timeout {
                seconds: self.execute_timeout,
            }),
        }
    }

    /// Open the transport and run the MCP `initialize` handshake.
    pub async fn open(&self, client_info: Value) -> FabricResult<()> {
        self.transport.connect().await?;
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "clientInfo": client_info,
            "capabilities": {},
        });
        match self.request("initialize", params).await {
            Ok(result) => {
                *self.server_info.write() = result.get("serverInfo").cloned();
                log::info!("MCP session initialized: {}", self.identifier());
                Ok(())
            }
            Err(e) => {
                let _ = self.transport.disconnect().await;
                Err(e)
            }
        }
    }

    /// Close the transport. Idempotent.
    pub async fn close(&self) -> FabricResult<()> {
        *self.server_info.write() = None;
        self.transport.disconnect().await
    }

    pub fn connected(&self) -> bool {
        self.transport.connected()
    }

    // -----------------------------------------------------------------------
    // Tool operations
    // -----------------------------------------------------------------------

    /// List tool descriptors (`tools/list`).
    pub async fn list_tools(&self) -> FabricResult<Vec<Value>> {
        let result = self.request("tools/list", serde_json::json!({})).await?;
        Ok(result
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Call a tool (`tools/call`) and reduce its content items.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> FabricResult<Value> {
        let result = self
            .request(
                "tools/call",
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        Ok(reduce_tool_result(result))
    }

    // -----------------------------------------------------------------------
    // Resource operations
    // -----------------------------------------------------------------------

    /// List resource descriptors (`resources/list`).
    pub async fn list_resources(&self) -> FabricResult<Vec<Value>> {
        let result = self.request("resources/list", serde_json::json!({})).await?;
        Ok(result
            .get("resources")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Read one resource (`resources/read`), joining text contents.
    pub async fn read_resource(&self, uri: &str) -> FabricResult<Value> {
        let result = self
            .request("resources/read", serde_json::json!({ "uri": uri }))
            .await?;
        let contents = result.get("contents").and_then(Value::as_array);
        if let Some(items) = contents {
            let texts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            if texts.len() == items.len() && !texts.is_empty() {
                return Ok(Value::String(texts.join("\n")));
            }
            return Ok(Value::Array(items.clone()));
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Prompt operations
    // -----------------------------------------------------------------------

    /// List prompt-template descriptors (`prompts/list`).
    pub async fn list_prompts(&self) -> FabricResult<Vec<Value>> {
        let result = self.request("prompts/list", serde_json::json!({})).await?;
        Ok(result
            .get("prompts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Fetch a prompt with filled arguments (`prompts/get`).
    ///
    /// Message contents are flattened to text joined with newlines.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> FabricResult<Value> {
        let result = self
            .request(
                "prompts/get",
                serde_json::json!({ "name": name, "arguments": arguments }),
            )
            .await?;
        let messages = result.get("messages").and_then(Value::as_array);
        if let Some(messages) = messages {
            let texts: Vec<String> = messages
                .iter()
                .filter_map(|msg| msg.get("content"))
                .map(|content| match content {
                    Value::String(s) => s.clone(),
                    other => other
                        .get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| other.to_string()),
                })
                .collect();
            return Ok(Value::String(texts.join("\n")));
        }
        Ok(result)
    }
}

/// Reduce a `tools/call` result to its text representation when one is
/// present; otherwise hand back the raw content sequence (or the whole
/// result when the server sent no content member).
pub fn reduce_tool_result(result: Value) -> Value {
    match result.get("content").and_then(Value::as_array) {
        Some(items) => {
            for item in items {
                if let Some(text) = item.get("text").and_then(Value::as_str) {
                    return Value::String(text.to_string());
                }
            }
            Value::Array(items.clone())
        }
        None => result,
    }
}
