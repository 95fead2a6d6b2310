//! A2A (Agent-to-Agent) protocol adapters.
//!
//! A2A addresses agents first; each agent owns a set of skills. Inside
//! the A2A namespace a tool is named `"<agent_id>.<skill>"`, and the
//! fabric adds the `"a2a:"` prefix on registration.
//!
//! [`A2aAdapter`] is the custom implementation: one HTTP discovery URL,
//! an in-memory peer list, and broadcast as fan-out. The official-surface
//! variant with agent cards and trust verification lives in [`official`].

pub mod official;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::{ProtocolAdapter, CONNECT_TIMEOUT_SECS};
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

pub use official::A2aOfficialAdapter;

// ---------------------------------------------------------------------------
// Card types
// ---------------------------------------------------------------------------

/// A skill an A2A agent offers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-shaped parameter description.
    #[serde(default)]
    pub parameters: Value,
}

/// Card describing an A2A agent: identity, endpoints, and skills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    /// Stable agent id; falls back to `name` when absent.
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Primary endpoint URL.
    pub url: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Public key for trust verification.
    pub public_key: Option<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    /// The id used in tool names and peer lists.
    pub fn agent_id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// A2aConfig
// ---------------------------------------------------------------------------

/// Connection configuration shared by both A2A implementations.
#[derive(Debug, Clone, Deserialize)]
pub struct A2aConfig {
    /// `"http"` (discovery URL) or `"mesh"` (bootstrap peers only).
    #[serde(default = "default_connection_type")]
    pub connection_type: String,
    /// Discovery URL for the http connection type.
    pub url: Option<String>,
    /// Local agent name (official variant card).
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub public_key: Option<String>,
    pub private_key: Option<String>,
    /// Discovery service for the official variant.
    pub discovery_url: Option<String>,
    /// Trusted agent-card fingerprints (hex SHA-256 of public key).
    #[serde(default)]
    pub trusted_agents: Vec<String>,
    pub transport: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Initial peers for the mesh connection type.
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
}

fn default_connection_type() -> String {
    "http".to_string()
}

fn default_timeout() -> u64 {
    CONNECT_TIMEOUT_SECS
}

impl A2aConfig {
    pub fn parse(config: Value) -> FabricResult<Self> {
        serde_json::from_value(config)
            .map_err(|e| FabricError::ConfigInvalid(format!("A2A config: {e}")))
    }
}

// ---------------------------------------------------------------------------
// A2aAdapter (custom implementation)
// ---------------------------------------------------------------------------

/// Custom A2A adapter over one HTTP discovery endpoint.
pub struct A2aAdapter {
    http: RwLock<Option<reqwest::Client>>,
    base_url: RwLock<Option<String>>,
    agents: RwLock<BTreeMap<String, AgentCard>>,
    tools: RwLock<BTreeMap<String, UnifiedTool>>,
    peers: RwLock<BTreeSet<String>>,
    routing: RwLock<BTreeMap<String, String>>,
    timeout: RwLock<u64>,
}

impl A2aAdapter {
    pub fn new() -> Self {
        Self {
            http: RwLock::new(None),
            base_url: RwLock::new(None),
            agents: RwLock::new(BTreeMap::new()),
            tools: RwLock::new(BTreeMap::new()),
            peers: RwLock::new(BTreeSet::new()),
            routing: RwLock::new(BTreeMap::new()),
            timeout: RwLock::new(default_timeout()),
        }
    }

    fn client(&self) -> FabricResult<reqwest::Client> {
        self.http.read().clone().ok_or(FabricError::NotConnected)
    }

    fn timeout_secs(&self) -> u64 {
        *self.timeout.read()
    }

    /// Fetch agent cards from the discovery URL and rebuild all local
    /// state (agents, tools, peers) wholesale.
    async fn refresh_agents(&self) -> FabricResult<Vec<UnifiedTool>> {
        let client = self.client()?;
        let Some(base) = self.base_url.read().clone() else {
            // Mesh mode keeps whatever peers were bootstrapped.
            return Ok(self.tools.read().values().cloned().collect());
        };

        let response = client
            .get(format!("{}/agents", base.trim_end_matches('/')))
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        if !response.status().is_success() {
            return Err(FabricError::remote(format!(
                "agent discovery failed: HTTP {}",
                response.status()
            )));
        }
        let cards: Vec<AgentCard> = response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid agent card list: {e}")))?;

        let mut agents = BTreeMap::new();
        let mut tools = BTreeMap::new();
        let mut peers = BTreeSet::new();
        for card in cards {
            let agent_id = card.agent_id().to_string();
            for skill in &card.skills {
                let tool_name = format!("{}.{}", agent_id, skill.name);
                let tool = UnifiedTool::new(&tool_name, &skill.description, ProtocolId::A2a)
                    .with_parameters(skill.parameters.clone())
                    .with_handle(serde_json::json!({
                        "agent_id": agent_id.clone(),
                        "skill": skill.name.clone(),
                    }));
                tools.insert(tool_name, tool);
            }
            peers.insert(agent_id.clone());
            agents.insert(agent_id, card);
        }

        log::info!(
            "discovered {} A2A agents with {} skills",
            agents.len(),
            tools.len()
        );
        *self.agents.write() = agents;
        *self.peers.write() = peers;
        let snapshot: Vec<UnifiedTool> = tools.values().cloned().collect();
        *self.tools.write() = tools;
        Ok(snapshot)
    }

    /// Send a task message to an agent and await the response.
    pub async fn send_task(
        &self,
        agent_id: &str,
        skill: &str,
        payload: Value,
    ) -> FabricResult<Value> {
        let client = self.client()?;
        let base = self
            .base_url
            .read()
            .clone()
            .ok_or_else(|| FabricError::Unsupported("mesh transport does not dispatch tasks".into()))?;

        let response = client
            .post(format!(
                "{}/agents/{}/tasks",
                base.trim_end_matches('/'),
                agent_id
            ))
            .json(&serde_json::json!({ "skill": skill, "payload": payload }))
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FabricError::UnknownAgent(agent_id.to_string()));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FabricError::AuthRejected(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FabricError::remote_with_body(
                format!("task dispatch failed: HTTP {status}"),
                Value::String(body),
            ));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid task response: {e}")))?;
        Ok(body.get("result").cloned().unwrap_or(body))
    }

    // -----------------------------------------------------------------------
    // Network surface
    // -----------------------------------------------------------------------

    /// Fan a message out to every known peer.
    ///
    /// Per-peer failures are logged and dropped; the returned map holds
    /// only the responses that arrived.
    pub async fn broadcast(&self, message: Value) -> FabricResult<BTreeMap<String, Value>> {
        self.client()?;
        let peers: Vec<String> = self.peers.read().iter().cloned().collect();
        let mut responses = BTreeMap::new();
        let sends = peers
            .iter()
            .map(|peer| self.send_to_peer(peer, message.clone()));
        for (peer, result) in peers.iter().zip(futures::future::join_all(sends).await) {
            match result {
                Ok(response) => {
                    responses.insert(peer.clone(), response);
                }
                Err(e) => log::warn!("broadcast to peer '{peer}' failed: {e}"),
            }
        }
        Ok(responses)
    }

    /// Send one message to one peer.
    pub async fn send_to_peer(&self, peer_id: &str, message: Value) -> FabricResult<Value> {
        let client = self.client()?;
        let base = self
            .base_url
            .read()
            .clone()
            .ok_or_else(|| FabricError::Unsupported("mesh transport does not route messages".into()))?;
        let response = client
            .post(format!(
                "{}/agents/{}/messages",
                base.trim_end_matches('/'),
                peer_id
            ))
            .json(&message)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        if !response.status().is_success() {
            return Err(FabricError::remote(format!(
                "message to '{peer_id}' failed: HTTP {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid message response: {e}")))
    }

    /// Known peer ids.
    pub fn discover_peers(&self) -> Vec<String> {
        self.peers.read().iter().cloned().collect()
    }

    /// Ping a peer; true when it answers with a pong.
    pub async fn ping_peer(&self, peer_id: &str) -> bool {
        match self
            .send_to_peer(peer_id, serde_json::json!({ "type": "ping" }))
            .await
        {
            Ok(response) => response.get("type").and_then(Value::as_str) == Some("pong"),
            Err(_) => false,
        }
    }

    /// Add bootstrap peers; true when the peer set is non-empty afterwards.
    pub fn join_network(&self, bootstrap_nodes: Vec<String>) -> bool {
        let mut peers = self.peers.write();
        peers.extend(bootstrap_nodes);
        !peers.is_empty()
    }

    /// Drop all peers.
    pub fn leave_network(&self) {
        self.peers.write().clear();
    }

    /// Merge routing updates and announce them to every peer.
    pub async fn update_routing(&self, routes: BTreeMap<String, String>) -> FabricResult<()> {
        self.routing.write().extend(routes.clone());
        self.broadcast(serde_json::json!({ "type": "route", "routes": routes }))
            .await?;
        Ok(())
    }
}

impl Default for A2aAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for A2aAdapter {
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
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout))
            .build()
            .map_err(|e| FabricError::TransportUnavailable(e.to_string()))?;
        *self.timeout.write() = cfg.timeout;

        match cfg.connection_type.as_str() {
            "http" => {
                let url = cfg.url.clone().ok_or_else(|| {
                    FabricError::ConfigInvalid("A2A http connection requires 'url'".into())
                })?;
                *self.base_url.write() = Some(url);
                *self.http.write() = Some(client);
                if let Err(e) = self.refresh_agents().await {
                    self.http.write().take();
                    self.base_url.write().take();
                    return Err(e);
                }
            }
            "mesh" => {
                *self.http.write() = Some(client);
                self.peers.write().extend(cfg.bootstrap_nodes.clone());
            }
            other => {
                return Err(FabricError::ConfigInvalid(format!(
                    "unknown A2A connection type: {other}"
                )))
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        self.http.write().take();
        self.base_url.write().take();
        self.agents.write().clear();
        self.tools.write().clear();
        self.peers.write().clear();
        self.routing.write().clear();
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        self.client()?;
        self.refresh_agents().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        self.client()?;
        let Some((agent_id, skill)) = name.split_once('.') else {
            return Err(FabricError::InvalidToolName(format!(
                "A2A tool names are '<agent_id>.<skill>', got '{name}'"
            )));
        };
        self.send_task(agent_id, skill, args).await
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        self.client()?;
        Ok(vec![
            ProtocolCapability::new("tools", "Tool discovery and execution via A2A", ProtocolId::A2a)
                .with_metadata("agent_count", serde_json::json!(self.agents.read().len()))
                .with_metadata("skill_count", serde_json::json!(self.tools.read().len())),
            ProtocolCapability::new("discovery", "Agent discovery", ProtocolId::A2a),
            ProtocolCapability::new("messaging", "Agent-to-agent messaging", ProtocolId::A2a),
            ProtocolCapability::new("delegation", "Task delegation to other agents", ProtocolId::A2a),
        ])
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "tools" | "discovery" | "messaging" | "delegation" | "broadcast"
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
