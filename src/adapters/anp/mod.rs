//! ANP (Agent Network Protocol) adapter.
//!
//! Identity-first: agents are addressed by DID. Discovery asks a
//! registry for agent DIDs, resolves each to its document, and registers
//! the `AgentService` capabilities as tools named
//! `"<agent_name>.<capability>"`. Execution dispatches to the resolved
//! service endpoint.

pub mod did;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::adapters::{ProtocolAdapter, CONNECT_TIMEOUT_SECS};
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

pub use did::{mint_did_document, CapabilityEntry, DidDocument, WebDidResolver};

// ---------------------------------------------------------------------------
// AnpConfig
// ---------------------------------------------------------------------------

/// Connection configuration for the ANP network.
#[derive(Debug, Clone, Deserialize)]
pub struct AnpConfig {
    /// Gateway for decentralized document storage.
    #[serde(default = "default_gateway")]
    pub ipfs_gateway: String,
    /// DID method; only `"web"` is supported.
    #[serde(default = "default_did_method")]
    pub did_method: String,
    /// Mint a DID for the local agent on connect.
    #[serde(default)]
    pub create_did: bool,
    /// Local agent name used when minting.
    pub agent_name: Option<String>,
    /// Local service endpoint advertised in the minted document.
    pub endpoint: Option<String>,
    /// Local capabilities advertised in the minted document.
    #[serde(default)]
    pub capabilities: Vec<CapabilityEntry>,
    /// Registry/resolver service; discovery is skipped when absent.
    pub resolver_url: Option<String>,
    /// Authority component of minted `did:web` identifiers.
    #[serde(default = "default_authority")]
    pub did_authority: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_gateway() -> String {
    "https://ipfs.io".to_string()
}

fn default_did_method() -> String {
    "web".to_string()
}

fn default_authority() -> String {
    "agentfabric.io".to_string()
}

fn default_timeout() -> u64 {
    CONNECT_TIMEOUT_SECS
}

impl AnpConfig {
    pub fn parse(config: Value) -> FabricResult<Self> {
        serde_json::from_value(config)
            .map_err(|e| FabricError::ConfigInvalid(format!("ANP config: {e}")))
    }
}

// ---------------------------------------------------------------------------
// AnpAdapter
// ---------------------------------------------------------------------------

/// One discovered agent: its DID, endpoint, and capabilities.
#[derive(Debug, Clone)]
struct AnpAgent {
    did: String,
    endpoint: String,
    capabilities: Vec<CapabilityEntry>,
}

/// Decentralized-discovery adapter over `did:web`.
pub struct AnpAdapter {
    resolver: RwLock<Option<std::sync::Arc<WebDidResolver>>>,
    http: RwLock<Option<reqwest::Client>>,
    agents: RwLock<BTreeMap<String, AnpAgent>>,
    tools: RwLock<BTreeMap<String, UnifiedTool>>,
    local_did: RwLock<Option<DidDocument>>,
    connected: RwLock<bool>,
    timeout: RwLock<u64>,
}

impl AnpAdapter {
    pub fn new() -> Self {
        Self {
            resolver: RwLock::new(None),
            http: RwLock::new(None),
            agents: RwLock::new(BTreeMap::new()),
            tools: RwLock::new(BTreeMap::new()),
            local_did: RwLock::new(None),
            connected: RwLock::new(false),
            timeout: RwLock::new(CONNECT_TIMEOUT_SECS),
        }
    }

    fn ensure_connected(&self) -> FabricResult<()> {
        if *self.connected.read() {
            Ok(())
        } else {
            Err(FabricError::NotConnected)
        }
    }

    /// The locally minted DID document, when `create_did` was set.
    pub fn local_did(&self) -> Option<DidDocument> {
        self.local_did.read().clone()
    }

    /// Query the registry, resolve every DID, and rebuild the catalog
    /// wholesale. Individual resolution failures are logged and skipped.
    async fn refresh_agents(&self) -> FabricResult<Vec<UnifiedTool>> {
        let resolver = self.resolver.read().clone();
        let Some(resolver) = resolver else {
            log::debug!("no resolver configured, ANP catalog stays empty");
            return Ok(Vec::new());
        };

        let dids = resolver.list_agents().await?;
        let mut agents = BTreeMap::new();
        let mut tools = BTreeMap::new();
        for did in dids {
            let document = match resolver.resolve(&did).await {
                Ok(document) => document,
                Err(e) => {
                    log::warn!("failed to resolve '{did}': {e}");
                    continue;
                }
            };
            let Some(service) = document.agent_service() else {
                log::debug!("'{did}' has no agent service entry");
                continue;
            };
            let name = document.agent_name().to_string();
            for capability in &service.capabilities {
                let tool_name = format!("{}.{}", name, capability.name);
                tools.insert(
                    tool_name.clone(),
                    UnifiedTool::new(&tool_name, &capability.description, ProtocolId::Anp)
                        .with_parameters(capability.parameters.clone())
                        .with_handle(serde_json::json!({
                            "did": did.clone(),
                            "capability": capability.name.clone(),
                        })),
                );
            }
            agents.insert(
                name,
                AnpAgent {
                    did: did.clone(),
                    endpoint: service.service_endpoint.clone(),
                    capabilities: service.capabilities.clone(),
                },
            );
        }

        log::info!(
            "resolved {} ANP agents exposing {} capabilities",
            agents.len(),
            tools.len()
        );
        *self.agents.write() = agents;
        let snapshot: Vec<UnifiedTool> = tools.values().cloned().collect();
        *self.tools.write() = tools;
        Ok(snapshot)
    }

    async fn dispatch(&self, agent: &AnpAgent, capability: &str, args: Value) -> FabricResult<Value> {
        let client = self.http.read().clone().ok_or(FabricError::NotConnected)?;
        let timeout = *self.timeout.read();

        log::debug!("dispatching '{capability}' to {}", agent.did);
        let response = client
            .post(&agent.endpoint)
            .json(&serde_json::json!({ "capability": capability, "arguments": args }))
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, timeout))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FabricError::AuthRejected(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FabricError::remote_with_body(
                format!("capability dispatch failed: HTTP {status}"),
                Value::String(body),
            ));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid dispatch response: {e}")))?;
        Ok(body.get("result").cloned().unwrap_or(body))
    }
}

impl Default for AnpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for AnpAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Anp
    }

    fn is_connected(&self) -> bool {
        *self.connected.read()
    }

    async fn connect(&self, config: Value) -> FabricResult<()> {
        if self.is_connected() {
            return Err(FabricError::AlreadyConnected);
        }
        let cfg = AnpConfig::parse(config)?;
        if cfg.did_method != "web" {
            return Err(FabricError::Unsupported(format!(
                "DID method '{}'",
                cfg.did_method
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout))
            .build()
            .map_err(|e| FabricError::TransportUnavailable(e.to_string()))?;
        let resolver = match &cfg.resolver_url {
            Some(url) => Some(std::sync::Arc::new(WebDidResolver::new(url, cfg.timeout)?)),
            None => None,
        };

        if cfg.create_did {
            let agent_name = cfg
                .agent_name
                .clone()
                .unwrap_or_else(|| format!("agent-{}", &Uuid::new_v4().simple().to_string()[..8]));
            let endpoint = cfg
                .endpoint
                .clone()
                .unwrap_or_else(|| "http://localhost:8000".to_string());
            let document = mint_did_document(
                &cfg.did_authority,
                &agent_name,
                &endpoint,
                cfg.capabilities.clone(),
            );
            log::info!("minted local DID: {} (gateway {})", document.id, cfg.ipfs_gateway);
            *self.local_did.write() = Some(document);
        }

        *self.timeout.write() = cfg.timeout;
        *self.http.write() = Some(client);
        *self.resolver.write() = resolver;
        *self.connected.write() = true;

        if let Err(e) = self.refresh_agents().await {
            let _ = self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        *self.connected.write() = false;
        self.resolver.write().take();
        self.http.write().take();
        self.agents.write().clear();
        self.tools.write().clear();
        self.local_did.write().take();
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        self.ensure_connected()?;
        self.refresh_agents().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        self.ensure_connected()?;
        let Some((agent_name, capability)) = name.split_once('.') else {
            return Err(FabricError::InvalidToolName(format!(
                "ANP tool names are '<agent_name>.<capability>', got '{name}'"
            )));
        };
        let agent = self
            .agents
            .read()
            .get(agent_name)
            .cloned()
            .ok_or_else(|| FabricError::UnknownAgent(agent_name.to_string()))?;
        if !agent.capabilities.iter().any(|c| c.name == capability) {
            return Err(FabricError::UnknownTool(name.to_string()));
        }
        self.dispatch(&agent, capability, args).await
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        self.ensure_connected()?;
        Ok(vec![
            ProtocolCapability::new(
                "decentralized_discovery",
                "Discover agents via decentralized network",
                ProtocolId::Anp,
            )
            .with_metadata("did_method", Value::String("web".into()))
            .with_metadata("agent_count", serde_json::json!(self.agents.read().len())),
            ProtocolCapability::new("did_identity", "W3C DID-based agent identity", ProtocolId::Anp),
            ProtocolCapability::new(
                "trustless_verification",
                "Cryptographic verification of agent identity",
                ProtocolId::Anp,
            ),
        ])
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "decentralized_discovery" | "did_identity" | "trustless_verification"
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
