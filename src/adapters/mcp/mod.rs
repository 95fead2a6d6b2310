//! MCP (Model Context Protocol) adapters.
//!
//! Two implementations share the same session/transport stack:
//!
//! - [`McpAdapter`] — the custom implementation, covering tool discovery
//!   and execution.
//! - [`official::McpOfficialAdapter`] — the full-surface implementation
//!   with resource and prompt caches plus an optional sampling callback.

pub mod official;
pub mod session;
pub mod transports;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::mcp::session::McpSession;
use crate::adapters::mcp::transports::{McpTransport, SseTransport, StdioTransport, TransportKind};
use crate::adapters::{ProtocolAdapter, CONNECT_TIMEOUT_SECS, EXECUTE_TIMEOUT_SECS};
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

pub use official::McpOfficialAdapter;

// ---------------------------------------------------------------------------
// McpConfig
// ---------------------------------------------------------------------------

/// Connection configuration for an MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    /// Transport kind: `"stdio"` or `"sse"`. Inferred from the other
    /// fields when absent (`url` implies sse, `command` implies stdio).
    pub transport: Option<String>,
    /// Command for the stdio transport.
    pub command: Option<String>,
    /// Arguments for the stdio command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the stdio child process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL for the SSE/HTTP transport.
    pub url: Option<String>,
    /// Extra headers for the SSE/HTTP transport.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub timeout: u64,
    /// Client metadata announced in the `initialize` handshake.
    pub client_info: Option<Value>,
}

fn default_connect_timeout() -> u64 {
    CONNECT_TIMEOUT_SECS
}

impl McpConfig {
    /// Parse a raw config value.
    pub fn parse(config: Value) -> FabricResult<Self> {
        serde_json::from_value(config)
            .map_err(|e| FabricError::ConfigInvalid(format!("MCP config: {e}")))
    }

    /// Resolve the transport kind, inferring from the present fields.
    pub fn transport_kind(&self) -> FabricResult<TransportKind> {
        if let Some(name) = &self.transport {
            return TransportKind::from_str_opt(name).ok_or_else(|| {
                FabricError::ConfigInvalid(format!("unsupported MCP transport: {name}"))
            });
        }
        if self.url.is_some() {
            Ok(TransportKind::Sse)
        } else if self.command.is_some() {
            Ok(TransportKind::Stdio)
        } else {
            Err(FabricError::ConfigInvalid(
                "MCP config requires 'url' or 'command'".into(),
            ))
        }
    }

    /// Build the configured transport.
    pub fn build_transport(&self) -> FabricResult<Box<dyn McpTransport>> {
        match self.transport_kind()? {
            TransportKind::Stdio => {
                let command = self.command.as_deref().ok_or_else(|| {
                    FabricError::ConfigInvalid("stdio transport requires 'command'".into())
                })?;
                Ok(Box::new(StdioTransport::new(
                    command,
                    self.args.clone(),
                    self.env.clone(),
                )))
            }
            TransportKind::Sse => {
                let url = self.url.as_deref().ok_or_else(|| {
                    FabricError::ConfigInvalid("sse transport requires 'url'".into())
                })?;
                Ok(Box::new(SseTransport::new(
                    url,
                    self.headers.clone(),
                    self.timeout,
                )))
            }
        }
    }

    /// Client metadata, with the crate defaults when not configured.
    pub fn client_info(&self) -> Value {
        self.client_info.clone().unwrap_or_else(|| {
            serde_json::json!({
                "name": "agentfabric",
                "version": crate::VERSION,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// McpAdapter (custom implementation)
// ---------------------------------------------------------------------------

/// Custom MCP adapter: tool discovery and execution over stdio or SSE.
pub struct McpAdapter {
    session: RwLock<Option<Arc<McpSession>>>,
    tools: RwLock<BTreeMap<String, Value>>,
    execute_timeout: u64,
}

impl McpAdapter {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            tools: RwLock::new(BTreeMap::new()),
            execute_timeout: EXECUTE_TIMEOUT_SECS,
        }
    }

    /// Builder: set the tool execution timeout.
    pub fn with_execute_timeout(mut self, seconds: u64) -> Self {
        self.execute_timeout = seconds;
        self
    }

    fn session(&self) -> FabricResult<Arc<McpSession>> {
        self.session.read().clone().ok_or(FabricError::NotConnected)
    }

    /// Refresh the tool cache wholesale; on error the cache is unchanged.
    async fn refresh_tools(&self, session: &McpSession) -> FabricResult<Vec<UnifiedTool>> {
        let descriptors = session.list_tools().await?;
        let mut cache = BTreeMap::new();
        let mut tools = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let Some(name) = descriptor.get("name").and_then(Value::as_str) else {
                continue;
            };
            let description = descriptor
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            tools.push(
                UnifiedTool::new(name, description, ProtocolId::Mcp)
                    .with_parameters(
                        descriptor
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or(Value::Object(Default::default())),
                    )
                    .with_handle(descriptor.clone()),
            );
            cache.insert(name.to_string(), descriptor);
        }
        *self.tools.write() = cache;
        Ok(tools)
    }
}

impl Default for McpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for McpAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Mcp
    }

    fn is_connected(&self) -> bool {
        self.session.read().is_some()
    }

    async fn connect(&self, config: Value) -> FabricResult<()> {
        if self.is_connected() {
            return Err(FabricError::AlreadyConnected);
        }
        let cfg = McpConfig::parse(config)?;
        let transport = cfg.build_transport()?;
        let session = Arc::new(McpSession::new(transport, self.execute_timeout));
        session.open(cfg.client_info()).await?;

        // Warm the tool cache before publishing the session.
        if let Err(e) = self.refresh_tools(&session).await {
            let _ = session.close().await;
            return Err(e);
        }
        *self.session.write() = Some(session);
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        let session = self.session.write().take();
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                log::warn!("error during MCP disconnect: {e}");
            }
        }
        self.tools.write().clear();
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        let session = self.session()?;
        self.refresh_tools(&session).await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        let session = self.session()?;
        if !self.tools.read().contains_key(name) {
            // The server may have grown new tools since discovery.
            self.refresh_tools(&session).await?;
            if !self.tools.read().contains_key(name) {
                return Err(FabricError::UnknownTool(name.to_string()));
            }
        }
        session.call_tool(name, args).await
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        let session = self.session()?;
        let mut capabilities = vec![
            ProtocolCapability::new("tools", "Tool discovery and execution", ProtocolId::Mcp),
            ProtocolCapability::new("streaming", "Streaming support", ProtocolId::Mcp)
                .with_metadata(
                    "transport",
                    Value::String(session.transport_kind().to_string()),
                ),
        ];
        let tool_count = self.tools.read().len();
        if tool_count > 0 {
            capabilities.push(
                ProtocolCapability::new("tool_discovery", "Dynamic tool discovery", ProtocolId::Mcp)
                    .with_metadata("tool_count", serde_json::json!(tool_count)),
            );
        }
        Ok(capabilities)
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "tools" | "tool_discovery" | "streaming" | "stdio" | "sse"
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
