//! Agent handle over a fabric tool snapshot.
//!
//! `create_unified_agent` hands out a [`UnifiedAgent`] carrying the tool
//! catalog as it was at creation time. Tools are exposed through an
//! explicit `tool(name)` lookup returning an invocable that forwards to
//! the fabric; later catalog changes do not retroactively appear in the
//! handle.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::{FabricError, FabricResult};
use crate::fabric::UnifiedProtocolFabric;
use crate::types::UnifiedTool;

/// Agent with access to a snapshot of the unified tool catalog.
pub struct UnifiedAgent {
    name: String,
    fabric: Arc<UnifiedProtocolFabric>,
    tools: Vec<UnifiedTool>,
}

impl UnifiedAgent {
    pub(crate) fn new(
        name: impl Into<String>,
        fabric: Arc<UnifiedProtocolFabric>,
        tools: Vec<UnifiedTool>,
    ) -> Self {
        Self {
            name: name.into(),
            fabric,
            tools,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The snapshot the handle was created with.
    pub fn tools(&self) -> &[UnifiedTool] {
        &self.tools
    }

    /// Look up an invocable by keyed name, or by bare name when the
    /// suffix is unique within the snapshot.
    pub fn tool(&self, name: &str) -> FabricResult<FabricTool> {
        if name.contains(':') {
            return self
                .tools
                .iter()
                .find(|t| t.name == name)
                .map(|t| FabricTool {
                    tool: t.clone(),
                    fabric: self.fabric.clone(),
                })
                .ok_or_else(|| FabricError::UnknownTool(name.to_string()));
        }

        let matches: Vec<&UnifiedTool> = self
            .tools
            .iter()
            .filter(|t| crate::fabric::key_matches_bare_name(&t.name, name))
            .collect();
        match matches.as_slice() {
            [] => Err(FabricError::UnknownTool(name.to_string())),
            [tool] => Ok(FabricTool {
                tool: (*tool).clone(),
                fabric: self.fabric.clone(),
            }),
            many => Err(FabricError::AmbiguousToolName {
                name: name.to_string(),
                candidates: many.iter().map(|t| t.name.clone()).collect(),
            }),
        }
    }
}

/// One invocable tool bound to its fabric.
pub struct FabricTool {
    tool: UnifiedTool,
    fabric: Arc<UnifiedProtocolFabric>,
}

impl FabricTool {
    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn description(&self) -> &str {
        &self.tool.description
    }

    pub fn parameters(&self) -> &Value {
        &self.tool.parameters
    }

    /// Execute through the fabric's dispatch path.
    pub async fn call(&self, args: Value) -> FabricResult<Value> {
        self.fabric.execute_tool(&self.tool.name, args).await
    }
}
