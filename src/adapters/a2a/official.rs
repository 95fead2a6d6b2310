//! Official-surface A2A adapter.
//!
//! Models the SDK-style lifecycle: the adapter publishes its own agent
//! card to a discovery service, verifies remote cards against a trust
//! store before opening a channel, and queries each trusted agent for
//! its tools.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::adapters::a2a::{A2aConfig, AgentCard};
use crate::adapters::ProtocolAdapter;
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

// ---------------------------------------------------------------------------
// TrustStore
// ---------------------------------------------------------------------------

/// Trust decisions over agent cards.
///
/// A card is trusted when the SHA-256 fingerprint of its public key is
/// in the configured set. An empty store trusts everything, so a fabric
/// without trust configuration still discovers agents.
#[derive(Debug, Default)]
pub struct TrustStore {
    trusted: RwLock<BTreeSet<String>>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 fingerprint of a public key string.
    pub fn fingerprint(public_key: &str) -> String {
        hex::encode(Sha256::digest(public_key.as_bytes()))
    }

    /// Add a trusted fingerprint.
    pub fn add_trusted(&self, fingerprint: impl Into<String>) {
        self.trusted.write().insert(fingerprint.into());
    }

    /// Verify a remote agent card.
    pub fn verify(&self, card: &AgentCard) -> bool {
        let trusted = self.trusted.read();
        if trusted.is_empty() {
            return true;
        }
        match &card.public_key {
            Some(key) => trusted.contains(&Self::fingerprint(key)),
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trusted.read().is_empty()
    }

    pub fn clear(&self) {
        self.trusted.write().clear();
    }
}

// ---------------------------------------------------------------------------
// A2aOfficialAdapter
// ---------------------------------------------------------------------------

/// A2A adapter with agent card publication and trust verification.
pub struct A2aOfficialAdapter {
    http: RwLock<Option<reqwest::Client>>,
    card: RwLock<Option<AgentCard>>,
    discovery_url: RwLock<Option<String>>,
    trust: TrustStore,
    connected_agents: RwLock<BTreeMap<String, AgentCard>>,
    tools: RwLock<BTreeMap<String, UnifiedTool>>,
    capabilities_set: RwLock<BTreeSet<String>>,
    timeout: RwLock<u64>,
}

impl A2aOfficialAdapter {
    pub fn new() -> Self {
        Self {
            http: RwLock::new(None),
            card: RwLock::new(None),
            discovery_url: RwLock::new(None),
            trust: TrustStore::new(),
            connected_agents: RwLock::new(BTreeMap::new()),
            tools: RwLock::new(BTreeMap::new()),
            capabilities_set: RwLock::new(BTreeSet::new()),
            timeout: RwLock::new(crate::adapters::CONNECT_TIMEOUT_SECS),
        }
    }

    fn client(&self) -> FabricResult<reqwest::Client> {
        self.http.read().clone().ok_or(FabricError::NotConnected)
    }

    fn timeout_secs(&self) -> u64 {
        *self.timeout.read()
    }

    /// Our published card.
    pub fn agent_card(&self) -> Option<AgentCard> {
        self.card.read().clone()
    }

    /// The trust store, for programmatic fingerprint management.
    pub fn trust_store(&self) -> &TrustStore {
        &self.trust
    }

    /// Query the discovery service for tool-provider cards, verify each
    /// against the trust store, and pull every trusted agent's tools.
    async fn refresh_remote_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        let client = self.client()?;
        let mut agents = BTreeMap::new();
        let mut tools = BTreeMap::new();

        let discovery_url = self.discovery_url.read().clone();
        if let Some(discovery) = discovery_url {
            let response = client
                .get(format!(
                    "{}/agents?capability=tool-provider",
                    discovery.trim_end_matches('/')
                ))
                .send()
                .await
                .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
            if !response.status().is_success() {
                return Err(FabricError::remote(format!(
                    "discovery search failed: HTTP {}",
                    response.status()
                )));
            }
            let cards: Vec<AgentCard> = response
                .json()
                .await
                .map_err(|e| FabricError::remote(format!("invalid discovery response: {e}")))?;

            for card in cards {
                if !self.trust.verify(&card) {
                    log::warn!("agent '{}' failed trust verification, skipping", card.name);
                    continue;
                }
                let agent_id = card.agent_id().to_string();
                match self.query_agent_tools(&client, &card).await {
                    Ok(agent_tools) => {
                        for (name, tool) in agent_tools {
                            tools.insert(name, tool);
                        }
                    }
                    Err(e) => log::warn!("tool query for agent '{agent_id}' failed: {e}"),
                }
                agents.insert(agent_id, card);
            }
        }

        // Local capabilities declared as "tool:<name>" surface as tools too.
        for capability in self.capabilities_set.read().iter() {
            if let Some(tool_name) = capability.strip_prefix("tool:") {
                tools.insert(
                    tool_name.to_string(),
                    UnifiedTool::new(
                        tool_name,
                        format!("Local tool: {tool_name}"),
                        ProtocolId::A2a,
                    ),
                );
            }
        }

        *self.connected_agents.write() = agents;
        let snapshot: Vec<UnifiedTool> = tools.values().cloned().collect();
        *self.tools.write() = tools;
        Ok(snapshot)
    }

    async fn query_agent_tools(
        &self,
        client: &reqwest::Client,
        card: &AgentCard,
    ) -> FabricResult<Vec<(String, UnifiedTool)>> {
        let url = card.url.clone().ok_or_else(|| {
            FabricError::ConfigInvalid(format!("agent card '{}' has no endpoint URL", card.name))
        })?;
        let response = client
            .get(format!("{}/tools", url.trim_end_matches('/')))
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        if !response.status().is_success() {
            return Err(FabricError::remote(format!(
                "tool listing failed: HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid tool listing: {e}")))?;

        let mut tools = Vec::new();
        for descriptor in body
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
        {
            let Some(tool_name) = descriptor.get("name").and_then(Value::as_str) else {
                continue;
            };
            let qualified = format!("{}.{}", card.agent_id(), tool_name);
            let tool = UnifiedTool::new(
                &qualified,
                descriptor
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default(),
                ProtocolId::A2a,
            )
            .with_parameters(
                descriptor
                    .get("parameters")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default())),
            )
            .with_handle(serde_json::json!({
                "agent_id": card.agent_id(),
                "skill": tool_name,
            }));
            tools.push((qualified, tool));
        }
        Ok(tools)
    }

    /// Send a typed message to an agent and return its typed response.
    pub async fn send_message(&self, agent_id: &str, message: Value) -> FabricResult<Value> {
        let client = self.client()?;
        let card = self
            .connected_agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| FabricError::UnknownAgent(agent_id.to_string()))?;
        let url = card.url.clone().ok_or_else(|| {
            FabricError::ConfigInvalid(format!("agent card '{agent_id}' has no endpoint URL"))
        })?;
        let response = client
            .post(format!("{}/messages", url.trim_end_matches('/')))
            .json(&message)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FabricError::remote_with_body(
                format!("message to '{agent_id}' failed: HTTP {status}"),
                Value::String(body),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid message response: {e}")))
    }
}

impl Default for A2aOfficialAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for A2aOfficialAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::A2a
    }

    fn is_connected(&self) -> bool {
        self.http.read().is_some()
    }

    async fn connect(&self, config: Value) -> FabricResult<()> {
        if self.is_connected() {
            return Err(FabricError::AlreadyConnected);
        }
        let cfg = A2aConfig::parse(config)?;

        let card = AgentCard {
            id: None,
            name: cfg.name.clone().unwrap_or_else(|| "agentfabric-agent".into()),
            description: cfg
                .description
                .clone()
                .unwrap_or_else(|| "Unified fabric A2A agent".into()),
            url: cfg.endpoints.first().cloned(),
            capabilities: cfg.capabilities.clone(),
            endpoints: cfg.endpoints.clone(),
            public_key: cfg.public_key.clone(),
            skills: Vec::new(),
        };

        for fingerprint in &cfg.trusted_agents {
            self.trust.add_trusted(fingerprint.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout))
            .build()
            .map_err(|e| FabricError::TransportUnavailable(e.to_string()))?;
        *self.timeout.write() = cfg.timeout;

        if let Some(discovery) = &cfg.discovery_url {
            let response = client
                .post(format!("{}/register", discovery.trim_end_matches('/')))
                .json(&card)
                .send()
                .await
                .map_err(|e| FabricError::from_http(e, cfg.timeout))?;
            if !response.status().is_success() {
                return Err(FabricError::remote(format!(
                    "agent card registration failed: HTTP {}",
                    response.status()
                )));
            }
            log::info!("published agent card '{}' to {}", card.name, discovery);
        }

        *self.capabilities_set.write() = cfg.capabilities.iter().cloned().collect();
        *self.discovery_url.write() = cfg.discovery_url.clone();
        *self.card.write() = Some(card);
        *self.http.write() = Some(client);
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        let client = self.http.write().take();
        let discovery = self.discovery_url.write().take();
        let card = self.card.write().take();

        if let (Some(client), Some(discovery), Some(card)) = (client, discovery, card) {
            let result = client
                .post(format!("{}/unregister", discovery.trim_end_matches('/')))
                .json(&serde_json::json!({ "name": card.name }))
                .send()
                .await;
            if let Err(e) = result {
                log::warn!("agent card unregistration failed: {e}");
            }
        }

        self.connected_agents.write().clear();
        self.tools.write().clear();
        self.capabilities_set.write().clear();
        self.trust.clear();
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        self.client()?;
        self.refresh_remote_tools().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        self.client()?;
        let Some((agent_id, tool_name)) = name.split_once('.') else {
            // Undotted names address local capabilities, which this
            // implementation does not execute.
            if self
                .capabilities_set
                .read()
                .contains(&format!("tool:{name}"))
            {
                return Err(FabricError::Unsupported(format!(
                    "local tool execution for '{name}'"
                )));
            }
            return Err(FabricError::InvalidToolName(format!(
                "A2A tool names are '<agent_id>.<skill>', got '{name}'"
            )));
        };

        if !self.connected_agents.read().contains_key(agent_id) {
            // The agent may have appeared since the last discovery pass.
            self.refresh_remote_tools().await?;
        }

        let response = self
            .send_message(
                agent_id,
                serde_json::json!({
                    "type": "tool.execute",
                    "content": { "tool": tool_name, "arguments": args },
                }),
            )
            .await?;

        match response.get("type").and_then(Value::as_str) {
            Some("tool.result") => Ok(response
                .get("content")
                .and_then(|c| c.get("result"))
                .cloned()
                .unwrap_or(Value::Null)),
            Some("error") => Err(FabricError::remote_with_body(
                response
                    .get("content")
                    .and_then(|c| c.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("tool execution failed")
                    .to_string(),
                response.clone(),
            )),
            other => Err(FabricError::remote(format!(
                "unexpected response type: {other:?}"
            ))),
        }
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        self.client()?;
        let mut capabilities = vec![
            ProtocolCapability::new("tools", "Tool discovery and execution via A2A", ProtocolId::A2a),
            ProtocolCapability::new("discovery", "Agent discovery service", ProtocolId::A2a),
            ProtocolCapability::new("trust", "Trust verification with agent cards", ProtocolId::A2a),
            ProtocolCapability::new("messaging", "Agent-to-agent messaging", ProtocolId::A2a),
            ProtocolCapability::new("delegation", "Task delegation to other agents", ProtocolId::A2a),
        ];
        let declared = self.capabilities_set.read();
        if !declared.is_empty() {
            capabilities.push(
                ProtocolCapability::new(
                    "custom_capabilities",
                    "Agent-specific capabilities",
                    ProtocolId::A2a,
                )
                .with_metadata(
                    "capabilities",
                    serde_json::json!(declared.iter().cloned().collect::<Vec<_>>()),
                ),
            );
        }
        Ok(capabilities)
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "tools" | "discovery" | "trust" | "messaging" | "delegation" | "capabilities"
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
