//! Transport layer for MCP connections.
//!
//! Two transports are supported:
//!
//! - **Stdio** ([`StdioTransport`]): spawns the MCP server as a child
//!   process and exchanges newline-delimited JSON-RPC over its standard
//!   input/output.
//! - **SSE/HTTP** ([`SseTransport`]): posts JSON-RPC requests to a remote
//!   URL and accepts either plain JSON or `text/event-stream` responses.
//!
//! Both implement [`McpTransport`], which carries request/response
//! correlation so the session layer never sees raw framing.

pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use serde_json::Value;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::errors::FabricResult;

// ---------------------------------------------------------------------------
// TransportKind
// ---------------------------------------------------------------------------

/// MCP transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Local child process over stdin/stdout.
    Stdio,
    /// Remote server over SSE/HTTP.
    Sse,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
        }
    }

    /// Parse a transport kind from a config string (case-insensitive).
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stdio" => Some(TransportKind::Stdio),
            "sse" | "http" => Some(TransportKind::Sse),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// McpTransport
// ---------------------------------------------------------------------------

/// Correlated request/response channel to one MCP server.
///
/// Implementations serialize requests on the same connection in issue
/// order; the JSON-RPC id carries correlation, so interleaved responses
/// are matched back to their request.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// The transport kind.
    fn kind(&self) -> TransportKind;

    /// Whether the transport holds a live channel.
    fn connected(&self) -> bool;

    /// Open the channel (spawn the process, build the HTTP client).
    async fn connect(&self) -> FabricResult<()>;

    /// Close the channel and release resources. Idempotent.
    async fn disconnect(&self) -> FabricResult<()>;

    /// Send one JSON-RPC request and await its correlated response.
    ///
    /// Returns the `result` member; a JSON-RPC `error` member is
    /// translated to `RemoteFailure` with the error object preserved.
    async fn request(&self, method: &str, params: Value) -> FabricResult<Value>;

    /// Stable identifier for logging and cache keys.
    ///
    /// - Stdio: `"stdio:{command}:{arg1}:..."`
    /// - SSE: `"sse:{url}"`
    fn identifier(&self) -> String;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_display() {
        assert_eq!(TransportKind::Stdio.to_string(), "stdio");
        assert_eq!(TransportKind::Sse.to_string(), "sse");
    }

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!(TransportKind::from_str_opt("stdio"), Some(TransportKind::Stdio));
        assert_eq!(TransportKind::from_str_opt("SSE"), Some(TransportKind::Sse));
        assert_eq!(TransportKind::from_str_opt("http"), Some(TransportKind::Sse));
        assert_eq!(TransportKind::from_str_opt("carrier-pigeon"), None);
    }

    #[test]
    fn test_stdio_transport_identifier() {
        let transport = StdioTransport::new("python", vec!["server.py".into()], Default::default());
        assert_eq!(transport.kind(), TransportKind::Stdio);
        assert!(!transport.connected());
        assert_eq!(transport.identifier(), "stdio:python:server.py");
    }

    #[test]
    fn test_sse_transport_identifier() {
        let transport = SseTransport::new("http://example.com/mcp", Default::default(), 30);
        assert_eq!(transport.kind(), TransportKind::Sse);
        assert!(!transport.connected());
        assert_eq!(transport.identifier(), "sse:http://example.com/mcp");
    }
}
