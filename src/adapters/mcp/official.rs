//! Official-surface MCP adapter.
//!
//! Carries the full MCP surface on top of the shared session stack:
//! tool, resource, and prompt caches refreshed together, resource reads,
//! prompt retrieval, and server-initiated sampling through an optional
//! callback. Without a configured callback, `create_message` fails with
//! `Unsupported` and the `sampling` feature probe reports false.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;

use crate::adapters::mcp::session::McpSession;
use crate::adapters::mcp::McpConfig;
use crate::adapters::{ProtocolAdapter, EXECUTE_TIMEOUT_SECS};
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

/// Handler invoked when the server requests an LLM completion.
pub type SamplingCallback =
    Arc<dyn Fn(Value) -> BoxFuture<'static, FabricResult<Value>> + Send + Sync>;

/// MCP adapter with the complete protocol surface.
pub struct McpOfficialAdapter {
    session: RwLock<Option<Arc<McpSession>>>,
    tools: RwLock<BTreeMap<String, Value>>,
    resources: RwLock<BTreeMap<String, Value>>,
    prompts: RwLock<BTreeMap<String, Value>>,
    sampling: RwLock<Option<SamplingCallback>>,
    execute_timeout: u64,
}

impl McpOfficialAdapter {
    pub fn new() -> Self {
        Self {
            session: RwLock::new(None),
            tools: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(BTreeMap::new()),
            prompts: RwLock::new(BTreeMap::new()),
            sampling: RwLock::new(None),
            execute_timeout: EXECUTE_TIMEOUT_SECS,
        }
    }

    /// Builder: install the sampling callback.
    pub fn with_sampling_callback(self, callback: SamplingCallback) -> Self {
        *self.sampling.write() = Some(callback);
        self
    }

    /// Builder: set the tool execution timeout.
    pub fn with_execute_timeout(mut self, seconds: u64) -> Self {
        self.execute_timeout = seconds;
        self
    }

    fn session(&self) -> FabricResult<Arc<McpSession>> {
        self.session.read().clone().ok_or(FabricError::NotConnected)
    }

    /// Refresh the three caches.
    ///
    /// The tool cache is mandatory and errors propagate, leaving it
    /// unchanged. Resource and prompt listings are best-effort: servers
    /// without those capabilities keep their previous (empty) caches.
    async fn refresh_caches(&self, session: &McpSession) -> FabricResult<()> {
        let descriptors = session.list_tools().await?;
        let mut tools = BTreeMap::new();
        for descriptor in descriptors {
            if let Some(name) = descriptor.get("name").and_then(Value::as_str) {
                tools.insert(name.to_string(), descriptor);
            }
        }
        *self.tools.write() = tools;

        match session.list_resources().await {
            Ok(descriptors) => {
                let mut resources = BTreeMap::new();
                for descriptor in descriptors {
                    if let Some(uri) = descriptor.get("uri").and_then(Value::as_str) {
                        resources.insert(uri.to_string(), descriptor);
                    }
                }
                *self.resources.write() = resources;
            }
            Err(e) => log::debug!("resource listing unavailable: {e}"),
        }

        match session.list_prompts().await {
            Ok(descriptors) => {
                let mut prompts = BTreeMap::new();
                for descriptor in descriptors {
                    if let Some(name) = descriptor.get("name").and_then(Value::as_str) {
                        prompts.insert(name.to_string(), descriptor);
                    }
                }
                *self.prompts.write() = prompts;
            }
            Err(e) => log::debug!("prompt listing unavailable: {e}"),
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // MCP-specific surface
    // -----------------------------------------------------------------------

    /// Cached resource descriptors, keyed by URI.
    pub fn resources(&self) -> Vec<Value> {
        self.resources.read().values().cloned().collect()
    }

    /// Cached prompt-template descriptors.
    pub fn prompts(&self) -> Vec<Value> {
        self.prompts.read().values().cloned().collect()
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> FabricResult<Value> {
        let session = self.session()?;
        session.read_resource(uri).await
    }

    /// Fetch a prompt with filled arguments.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> FabricResult<Value> {
        let session = self.session()?;
        session.get_prompt(name, arguments).await
    }

    /// Serve a server-initiated completion request through the configured
    /// sampling callback.
    pub async fn create_message(&self, request: Value) -> FabricResult<Value> {
        self.session()?;
        let callback = self.sampling.read().clone();
        match callback {
            Some(callback) => callback(request).await,
            None => Err(FabricError::Unsupported(
                "sampling callback not configured".into(),
            )),
        }
    }
}

impl Default for McpOfficialAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for McpOfficialAdapter {
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
        if let Err(e) = self.refresh_caches(&session).await {
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
        self.resources.write().clear();
        self.prompts.write().clear();
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        let session = self.session()?;
        self.refresh_caches(&session).await?;
        let tools = self
            .tools
            .read()
            .values()
            .map(|descriptor| {
                let name = descriptor
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let description = descriptor
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                UnifiedTool::new(name, description, ProtocolId::Mcp)
                    .with_parameters(
                        descriptor
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or(Value::Object(Default::default())),
                    )
                    .with_handle(descriptor.clone())
            })
            .collect();
        Ok(tools)
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        let session = self.session()?;
        if !self.tools.read().contains_key(name) {
            self.refresh_caches(&session).await?;
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
            ProtocolCapability::new("resources", "Resource management", ProtocolId::Mcp),
            ProtocolCapability::new("prompts", "Prompt template support", ProtocolId::Mcp),
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
        match feature {
            "tools" | "resources" | "prompts" | "streaming" | "schema_validation" | "stdio"
            | "sse" | "tool_discovery" => true,
            // Sampling requires a configured callback.
            "sampling" => self.sampling.read().is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mcp::tests::spawn_mock_mcp;

    #[tokio::test]
    async fn test_create_message_without_callback_is_unsupported() {
        let url = spawn_mock_mcp().await;
        let adapter = McpOfficialAdapter::new();
        adapter
            .connect(serde_json::json!({ "url": url }))
            .await
            .unwrap();
        let err = adapter
            .create_message(serde_json::json!({ "messages": [] }))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::Unsupported(_)));
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_sampling_callback_drives_feature_probe() {
        let adapter = McpOfficialAdapter::new();
        assert!(!adapter.supports_feature("sampling"));
        assert!(adapter.supports_feature("prompts"));

        let callback: SamplingCallback = Arc::new(|_req| {
            Box::pin(async { Ok(serde_json::json!({ "role": "assistant", "content": "ok" })) })
        });
        let adapter = adapter.with_sampling_callback(callback);
        assert!(adapter.supports_feature("sampling"));
    }

    #[tokio::test]
    async fn test_caches_populated_and_cleared() {
        let url = spawn_mock_mcp().await;
        let adapter = McpOfficialAdapter::new();
        adapter
            .connect(serde_json::json!({ "url": url }))
            .await
            .unwrap();

        assert_eq!(adapter.resources().len(), 1);
        assert_eq!(adapter.prompts().len(), 1);

        let content = adapter.read_resource("mock://greeting").await.unwrap();
        assert_eq!(content, Value::String("hello resource".into()));

        let prompt = adapter
            .get_prompt("summarize", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(prompt, Value::String("Summarize: x".into()));

        adapter.disconnect().await.unwrap();
        assert!(adapter.resources().is_empty());
        assert!(adapter.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_discover_and_execute() {
        let url = spawn_mock_mcp().await;
        let adapter = McpOfficialAdapter::new();
        adapter
            .connect(serde_json::json!({ "url": url }))
            .await
            .unwrap();
        let tools = adapter.discover_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        let result = adapter
            .execute_tool("echo", serde_json::json!({ "msg": "hello" }))
            .await
            .unwrap();
        assert_eq!(result, Value::String("hello".into()));
        adapter.disconnect().await.unwrap();
    }
}
