//! Shared protocol types for the unified fabric.
//!
//! Everything in this module is protocol-agnostic: the closed set of
//! protocol identifiers, capability descriptors produced by live adapters,
//! the namespaced tool record the fabric hands out, and the per-protocol
//! SDK selection preference consumed by the adapter factory.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ProtocolId
// ---------------------------------------------------------------------------

/// Supported protocol families.
///
/// This is the primary key for adapter lookup, tool namespacing, and
/// capability grouping throughout the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolId {
    /// Model Context Protocol (tools, resources, prompts).
    Mcp,
    /// Agent-to-Agent protocol (agents exposing skills).
    A2a,
    /// Agent Communication Protocol (REST, session-oriented).
    Acp,
    /// Agent Network Protocol (decentralized, DID-based).
    Anp,
    /// Locally registered tools, no wire protocol.
    Native,
}

impl ProtocolId {
    /// All protocol ids, in namespace order.
    pub const ALL: [ProtocolId; 5] = [
        ProtocolId::Mcp,
        ProtocolId::A2a,
        ProtocolId::Acp,
        ProtocolId::Anp,
        ProtocolId::Native,
    ];

    /// The wire protocols an adapter can be built for (everything but native).
    pub const WIRE: [ProtocolId; 4] = [
        ProtocolId::Mcp,
        ProtocolId::A2a,
        ProtocolId::Acp,
        ProtocolId::Anp,
    ];

    /// Lowercase string form, used as the tool namespace prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolId::Mcp => "mcp",
            ProtocolId::A2a => "a2a",
            ProtocolId::Acp => "acp",
            ProtocolId::Anp => "anp",
            ProtocolId::Native => "native",
        }
    }

    /// Parse a protocol id from a string (case-insensitive).
    ///
    /// Returns `None` if the string is not a recognized protocol.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mcp" => Some(ProtocolId::Mcp),
            "a2a" => Some(ProtocolId::A2a),
            "acp" => Some(ProtocolId::Acp),
            "anp" => Some(ProtocolId::Anp),
            "native" => Some(ProtocolId::Native),
            _ => None,
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SdkPreference
// ---------------------------------------------------------------------------

/// Per-protocol instruction to the adapter factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkPreference {
    /// Use the official implementation only.
    Official,
    /// Use the custom implementation only.
    Custom,
    /// Use the official implementation with custom fallback.
    Hybrid,
    /// Automatically choose the best option.
    Auto,
}

impl SdkPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdkPreference::Official => "official",
            SdkPreference::Custom => "custom",
            SdkPreference::Hybrid => "hybrid",
            SdkPreference::Auto => "auto",
        }
    }

    /// Parse a preference from a string (case-insensitive).
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "official" => Some(SdkPreference::Official),
            "custom" => Some(SdkPreference::Custom),
            "hybrid" => Some(SdkPreference::Hybrid),
            "auto" => Some(SdkPreference::Auto),
            _ => None,
        }
    }
}

impl Default for SdkPreference {
    fn default() -> Self {
        SdkPreference::Auto
    }
}

impl fmt::Display for SdkPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ProtocolCapability
// ---------------------------------------------------------------------------

/// A feature a live adapter offers, used for introspection and routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolCapability {
    /// Capability name (e.g. `"tools"`, `"sessions"`).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Protocol the capability belongs to.
    pub protocol: ProtocolId,
    /// Additional structured metadata (tool counts, session ids, ...).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ProtocolCapability {
    /// Create a capability with empty metadata.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        protocol: ProtocolId,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            protocol,
            metadata: HashMap::new(),
        }
    }

    /// Builder: attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// UnifiedTool
// ---------------------------------------------------------------------------

/// A namespaced invocable registered in the fabric catalog.
///
/// Before registration the name is the adapter-local tool name; the fabric
/// rewrites it to the keyed `"<namespace>:<name>"` form on insertion. The
/// `handle` field retains whatever the producing adapter needs to execute
/// the tool later (a skill descriptor, a REST tool record, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedTool {
    /// Tool name; protocol-prefixed once registered.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Protocol of the adapter that produced the tool.
    pub protocol: ProtocolId,
    /// JSON-schema-shaped parameter description.
    #[serde(default)]
    pub parameters: Value,
    /// Opaque adapter-specific handle.
    #[serde(default)]
    pub handle: Value,
}

impl UnifiedTool {
    /// Create a tool record with empty parameters and handle.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        protocol: ProtocolId,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            protocol,
            parameters: Value::Object(serde_json::Map::new()),
            handle: Value::Null,
        }
    }

    /// Builder: set the parameter schema.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Builder: set the opaque handle.
    pub fn with_handle(mut self, handle: Value) -> Self {
        self.handle = handle;
        self
    }

    /// The adapter-local name: everything after the first `:` if present.
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_id_display() {
        assert_eq!(ProtocolId::Mcp.to_string(), "mcp");
        assert_eq!(ProtocolId::A2a.to_string(), "a2a");
        assert_eq!(ProtocolId::Acp.to_string(), "acp");
        assert_eq!(ProtocolId::Anp.to_string(), "anp");
        assert_eq!(ProtocolId::Native.to_string(), "native");
    }

    #[test]
    fn test_protocol_id_from_str() {
        assert_eq!(ProtocolId::from_str_opt("mcp"), Some(ProtocolId::Mcp));
        assert_eq!(ProtocolId::from_str_opt("A2A"), Some(ProtocolId::A2a));
        assert_eq!(ProtocolId::from_str_opt("nope"), None);
    }

    #[test]
    fn test_protocol_id_serde_roundtrip() {
        let json = serde_json::to_string(&ProtocolId::Acp).unwrap();
        assert_eq!(json, "\"acp\"");
        let back: ProtocolId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProtocolId::Acp);
    }

    #[test]
    fn test_sdk_preference_parse() {
        assert_eq!(
            SdkPreference::from_str_opt("official"),
            Some(SdkPreference::Official)
        );
        assert_eq!(
            SdkPreference::from_str_opt("HYBRID"),
            Some(SdkPreference::Hybrid)
        );
        assert_eq!(SdkPreference::from_str_opt("best"), None);
        assert_eq!(SdkPreference::default(), SdkPreference::Auto);
    }

    #[test]
    fn test_unified_tool_local_name() {
        let mut tool = UnifiedTool::new("echo", "Echo a message", ProtocolId::Mcp);
        assert_eq!(tool.local_name(), "echo");

        tool.name = "mcp:echo".to_string();
        assert_eq!(tool.local_name(), "echo");

        tool.name = "a2a:researcher.search".to_string();
        assert_eq!(tool.local_name(), "researcher.search");
    }

    #[test]
    fn test_capability_metadata_builder() {
        let cap = ProtocolCapability::new("tools", "Tool execution", ProtocolId::Mcp)
            .with_metadata("tool_count", serde_json::json!(3));
        assert_eq!(cap.metadata.get("tool_count"), Some(&serde_json::json!(3)));
    }
}
