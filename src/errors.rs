//! Error types for the unified protocol fabric.
//!
//! Adapters translate protocol-specific failures into these kinds; the
//! fabric surfaces them without re-interpretation.

use serde_json::Value;
use thiserror::Error;

use crate::types::ProtocolId;

/// Result alias used across the fabric.
pub type FabricResult<T> = Result<T, FabricError>;

/// Errors observable at the fabric surface.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Required configuration field missing or malformed.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Endpoint cannot be reached.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Credentials refused; never retried.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// `connect` called on an adapter that is already connected.
    #[error("adapter already connected")]
    AlreadyConnected,

    /// Operation attempted on a disconnected adapter.
    #[error("adapter not connected")]
    NotConnected,

    /// No tool with the requested name or keyed form.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// A bare name matched more than one keyed tool.
    #[error("ambiguous tool name '{name}': matches {candidates:?}")]
    AmbiguousToolName {
        name: String,
        candidates: Vec<String>,
    },

    /// Tool name does not follow the protocol's naming convention.
    #[error("invalid tool name: {0}")]
    InvalidToolName(String),

    /// No agent with the requested identity.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    /// Arguments do not satisfy the tool schema.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// Remote responded with an error structure; body preserved.
    #[error("remote failure: {message}")]
    RemoteFailure {
        message: String,
        body: Option<Value>,
    },

    /// Configured time budget exceeded.
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Operation not offered by the selected implementation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Circuit breaker is open; no network attempt was made.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// Cooperative cancellation result.
    #[error("operation cancelled")]
    Cancelled,

    /// In-flight request limit exceeded.
    #[error("too many requests in flight")]
    TooManyRequests,

    /// The official implementation is not available for the protocol.
    #[error("official implementation unavailable for {0}")]
    OfficialUnavailable(ProtocolId),

    /// No implementation of any kind exists for the protocol.
    #[error("no implementation available for {0}")]
    Unavailable(ProtocolId),

    /// No adapter is registered for the protocol.
    #[error("no adapter registered for {0}")]
    AdapterMissing(ProtocolId),

    /// Named extension is not registered.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),
}

impl FabricError {
    /// Shorthand for a remote failure without a preserved body.
    pub fn remote(message: impl Into<String>) -> Self {
        FabricError::RemoteFailure {
            message: message.into(),
            body: None,
        }
    }

    /// Remote failure preserving the response body.
    pub fn remote_with_body(message: impl Into<String>, body: Value) -> Self {
        FabricError::RemoteFailure {
            message: message.into(),
            body: Some(body),
        }
    }

    /// Translate an HTTP client error, given the request's time budget.
    pub(crate) fn from_http(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            FabricError::Timeout {
                seconds: timeout_secs,
            }
        } else if err.is_connect() {
            FabricError::TransportUnavailable(err.to_string())
        } else {
            FabricError::remote(err.to_string())
        }
    }

    /// Whether a hybrid wrapper should retry this error on its fallback.
    ///
    /// Only "the selected implementation cannot do this" outcomes qualify;
    /// runtime failures such as timeouts surface unchanged.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            FabricError::Unsupported(_) | FabricError::OfficialUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_trigger_classification() {
        assert!(FabricError::Unsupported("sampling".into()).triggers_fallback());
        assert!(FabricError::OfficialUnavailable(ProtocolId::Mcp).triggers_fallback());
        assert!(!FabricError::Timeout { seconds: 30 }.triggers_fallback());
        assert!(!FabricError::remote("boom").triggers_fallback());
        assert!(!FabricError::NotConnected.triggers_fallback());
    }

    #[test]
    fn test_remote_failure_preserves_body() {
        let err = FabricError::remote_with_body("execution failed", serde_json::json!({"code": 7}));
        match err {
            FabricError::RemoteFailure { body, .. } => {
                assert_eq!(body.unwrap()["code"], 7);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
