//! # agentfabric
//!
//! Unified protocol fabric for agent interoperability. One process
//! discovers, addresses, and invokes tools exposed over several
//! heterogeneous protocols — MCP (tools/resources/prompts over stdio or
//! SSE), A2A (agents exposing skills), ACP (REST with sessions and
//! async execution), and ANP (DID-resolved endpoints) — through a
//! single name-spaced surface.
//!
//! Every public tool name is `"<protocol>:<local_name>"`; bare lookups
//! resolve only when the suffix is unique. Per protocol, an official or
//! custom implementation (or a hybrid pair with sticky fallback) is
//! selected at runtime by the [`adapters::factory::AdapterFactory`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentfabric::UnifiedProtocolFabric;
//!
//! # async fn run() -> Result<(), agentfabric::FabricError> {
//! let fabric = Arc::new(UnifiedProtocolFabric::new());
//! fabric
//!     .initialize(serde_json::json!({
//!         "mcp": { "servers": [{ "url": "http://localhost:3000/mcp" }] },
//!         "acp": { "url": "http://localhost:9000" },
//!     }))
//!     .await?;
//!
//! let answer = fabric
//!     .execute_tool("mcp:echo", serde_json::json!({ "msg": "hi" }))
//!     .await?;
//! println!("{answer}");
//! fabric.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod agent;
pub mod errors;
pub mod extensions;
pub mod fabric;
pub mod types;

pub use adapters::factory::{AdapterEntry, AdapterFactory};
pub use adapters::hybrid::HybridAdapter;
pub use adapters::ProtocolAdapter;
pub use agent::{FabricTool, UnifiedAgent};
pub use errors::{FabricError, FabricResult};
pub use extensions::ProtocolExtension;
pub use fabric::{ServerRegistration, UnifiedProtocolFabric};
pub use types::{ProtocolCapability, ProtocolId, SdkPreference, UnifiedTool};

/// Crate version, announced in protocol handshakes.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
