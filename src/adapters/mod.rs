//! Protocol adapters.
//!
//! Each supported protocol family gets one module with a custom
//! implementation and, where one exists, an official-patterned
//! implementation. All of them hide their transport behind the
//! [`ProtocolAdapter`] contract so the fabric can treat every protocol
//! uniformly. The [`factory`] module selects an implementation variant at
//! runtime; [`hybrid`] wraps a primary/fallback pair.

pub mod a2a;
pub mod acp;
pub mod anp;
pub mod factory;
pub mod hybrid;
pub mod mcp;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::FabricResult;
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

/// Default connect timeout in seconds, overridable per config.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Default tool execution timeout in seconds.
pub const EXECUTE_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// ProtocolAdapter
// ---------------------------------------------------------------------------

/// Uniform surface over one protocol endpoint.
///
/// Adapters own their transport and caches behind interior mutability so
/// the fabric can share them across concurrent tasks. Operations that
/// touch the wire suspend; wire-touching operations on a disconnected
/// adapter fail with `NotConnected`.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// The protocol this adapter speaks. Constant for the adapter's lifetime.
    fn protocol(&self) -> ProtocolId;

    /// Whether the adapter currently holds a live connection.
    fn is_connected(&self) -> bool;

    /// Establish sockets/sessions and warm caches.
    ///
    /// A second call while connected returns `AlreadyConnected`.
    async fn connect(&self, config: Value) -> FabricResult<()>;

    /// Release resources. Idempotent: safe from any prior state, and the
    /// post-condition is always disconnected with caches cleared.
    async fn disconnect(&self) -> FabricResult<()>;

    /// Refresh and return the full tool catalog.
    ///
    /// The cache is either replaced wholesale or left unchanged on error.
    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>>;

    /// Execute a tool by its adapter-local name.
    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value>;

    /// Capabilities the live adapter offers.
    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>>;

    /// Check whether this implementation offers a named feature.
    fn supports_feature(&self, _feature: &str) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn ProtocolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolAdapter")
            .field("protocol", &self.protocol())
            .finish()
    }
}
