//! Opt-in fabric extensions.
//!
//! Extensions attach behavior to a running fabric without touching its
//! invariants: they observe, report, and configure, but never mutate the
//! adapter slots or the tool catalog.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{FabricError, FabricResult};
use crate::fabric::UnifiedProtocolFabric;

/// One named extension applied through `enable_extension`.
#[async_trait]
pub trait ProtocolExtension: Send + Sync {
    /// Registry name of the extension.
    fn name(&self) -> &str;

    /// Apply the extension to a fabric and report the outcome.
    async fn apply(&self, fabric: &UnifiedProtocolFabric, params: Value) -> FabricResult<Value>;
}

// ---------------------------------------------------------------------------
// MeshNetworking
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MeshParams {
    #[serde(default)]
    agents: Vec<String>,
    #[serde(default = "default_topology")]
    topology: String,
}

fn default_topology() -> String {
    "dynamic".to_string()
}

/// Logical all-to-all overlay among a set of agents.
pub struct MeshNetworkingExtension;

#[async_trait]
impl ProtocolExtension for MeshNetworkingExtension {
    fn name(&self) -> &str {
        "mesh_networking"
    }

    async fn apply(&self, _fabric: &UnifiedProtocolFabric, params: Value) -> FabricResult<Value> {
        let params: MeshParams = serde_json::from_value(params)
            .map_err(|e| FabricError::ConfigInvalid(format!("mesh params: {e}")))?;
        let n = params.agents.len();
        Ok(serde_json::json!({
            "status": "active",
            "agents": params.agents,
            "topology": params.topology,
            "connections": n * n.saturating_sub(1) / 2,
        }))
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConsensusParams {
    #[serde(rename = "type", default = "default_consensus_type")]
    kind: String,
    #[serde(default = "default_min_agents")]
    min_agents: u32,
}

fn default_consensus_type() -> String {
    "byzantine".to_string()
}

fn default_min_agents() -> u32 {
    3
}

/// Multi-agent agreement mechanism declaration.
pub struct ConsensusExtension;

#[async_trait]
impl ProtocolExtension for ConsensusExtension {
    fn name(&self) -> &str {
        "consensus"
    }

    async fn apply(&self, _fabric: &UnifiedProtocolFabric, params: Value) -> FabricResult<Value> {
        let params: ConsensusParams = serde_json::from_value(params)
            .map_err(|e| FabricError::ConfigInvalid(format!("consensus params: {e}")))?;
        Ok(serde_json::json!({
            "status": "ready",
            "type": params.kind,
            "min_agents": params.min_agents,
        }))
    }
}

// ---------------------------------------------------------------------------
// ReasoningTrace
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ReasoningTraceParams {
    #[serde(default = "default_trace_level")]
    level: String,
}

fn default_trace_level() -> String {
    "detailed".to_string()
}

/// Step-structured reasoning capture.
pub struct ReasoningTraceExtension;

#[async_trait]
impl ProtocolExtension for ReasoningTraceExtension {
    fn name(&self) -> &str {
        "reasoning_traces"
    }

    async fn apply(&self, _fabric: &UnifiedProtocolFabric, params: Value) -> FabricResult<Value> {
        let params: ReasoningTraceParams = serde_json::from_value(params)
            .map_err(|e| FabricError::ConfigInvalid(format!("trace params: {e}")))?;
        Ok(serde_json::json!({
            "collectors": ["chain_of_thought", "tree_of_thoughts", "react"],
            "level": params.level,
            "status": "enabled",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::UnifiedProtocolFabric;

    #[tokio::test]
    async fn test_mesh_connection_count() {
        let fabric = UnifiedProtocolFabric::new();
        let report = MeshNetworkingExtension
            .apply(
                &fabric,
                serde_json::json!({ "agents": ["a", "b", "c", "d"] }),
            )
            .await
            .unwrap();
        assert_eq!(report["status"], "active");
        assert_eq!(report["topology"], "dynamic");
        assert_eq!(report["connections"], 6);
    }

    #[tokio::test]
    async fn test_consensus_defaults() {
        let fabric = UnifiedProtocolFabric::new();
        let report = ConsensusExtension
            .apply(&fabric, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(report["status"], "ready");
        assert_eq!(report["type"], "byzantine");
        assert_eq!(report["min_agents"], 3);
    }

    #[tokio::test]
    async fn test_reasoning_trace_report() {
        let fabric = UnifiedProtocolFabric::new();
        let report = ReasoningTraceExtension
            .apply(&fabric, serde_json::json!({ "level": "terse" }))
            .await
            .unwrap();
        assert_eq!(report["status"], "enabled");
        assert_eq!(report["level"], "terse");
        assert_eq!(report["collectors"][0], "chain_of_thought");
    }
}
