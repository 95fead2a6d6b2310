//! Enhanced ACP adapter: circuit breaker and execution metrics.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::adapters::acp::AcpAdapter;
use crate::adapters::ProtocolAdapter;
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

/// Consecutive failures before the circuit opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
/// Cooldown before the circuit closes again.
pub const CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Execution counters kept by the enhanced adapter.
#[derive(Debug, Clone, Default)]
pub struct AcpMetrics {
    pub tools_executed: u64,
    pub errors: u64,
}

/// ACP adapter wrapper that refuses tool execution while the circuit is
/// open.
///
/// Five consecutive execution failures open the circuit; while open,
/// `execute_tool` returns `CircuitOpen` without touching the network.
/// The circuit closes after the cooldown, either through the scheduled
/// reset task or on the next call once the cooldown has elapsed. A
/// single success resets the failure counter. `disconnect` also resets
/// the breaker, so a reconnect starts from a fresh state.
pub struct AcpEnhancedAdapter {
    inner: AcpAdapter,
    breaker: Arc<Mutex<BreakerState>>,
    cooldown: Duration,
    metrics: Mutex<AcpMetrics>,
}

impl AcpEnhancedAdapter {
    pub fn new() -> Self {
        Self {
            inner: AcpAdapter::new(),
            breaker: Arc::new(Mutex::new(BreakerState::default())),
            cooldown: CIRCUIT_COOLDOWN,
            metrics: Mutex::new(AcpMetrics::default()),
        }
    }

    /// Builder: override the circuit cooldown.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// The wrapped plain adapter, for the ACP-specific surface
    /// (messages, workflows, sessions).
    pub fn inner(&self) -> &AcpAdapter {
        &self.inner
    }

    /// Current execution counters.
    pub fn metrics(&self) -> AcpMetrics {
        self.metrics.lock().clone()
    }

    /// Whether the circuit is currently open.
    pub fn circuit_open(&self) -> bool {
        let breaker = self.breaker.lock();
        match breaker.opened_at {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    fn reset_breaker(&self) {
        let mut breaker = self.breaker.lock();
        breaker.consecutive_failures = 0;
        breaker.opened_at = None;
    }

    fn record_failure(&self) {
        let mut breaker = self.breaker.lock();
        breaker.consecutive_failures += 1;
        if breaker.consecutive_failures >= CIRCUIT_FAILURE_THRESHOLD && breaker.opened_at.is_none()
        {
            breaker.opened_at = Some(Instant::now());
            log::warn!(
                "ACP circuit opened after {} consecutive failures",
                breaker.consecutive_failures
            );
            // Fire-and-forget reset after the cooldown.
            let shared = Arc::clone(&self.breaker);
            let cooldown = self.cooldown;
            tokio::spawn(async move {
                tokio::time::sleep(cooldown).await;
                let mut breaker = shared.lock();
                breaker.opened_at = None;
                breaker.consecutive_failures = 0;
                log::info!("ACP circuit closed after cooldown");
            });
        }
    }
}

impl Default for AcpEnhancedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for AcpEnhancedAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Acp
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn connect(&self, config: Value) -> FabricResult<()> {
        self.inner.connect(config).await
    }

    async fn disconnect(&self) -> FabricResult<()> {
        self.reset_breaker();
        self.inner.disconnect().await
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        self.inner.discover_tools().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        {
            let mut breaker = self.breaker.lock();
            if let Some(at) = breaker.opened_at {
                if at.elapsed() < self.cooldown {
                    return Err(FabricError::CircuitOpen);
                }
                // Cooldown elapsed; close and attempt the network again.
                breaker.opened_at = None;
                breaker.consecutive_failures = 0;
            }
        }

        match self.inner.execute_tool(name, args).await {
            Ok(result) => {
                self.reset_breaker();
                self.metrics.lock().tools_executed += 1;
                Ok(result)
            }
            Err(e) => {
                self.metrics.lock().errors += 1;
                self.record_failure();
                Err(e)
            }
        }
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        self.inner.get_capabilities().await
    }

    fn supports_feature(&self, feature: &str) -> bool {
        feature == "circuit_breaker" || self.inner.supports_feature(feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::acp::tests::{spawn_mock_acp, MockAcpState};
    use std::sync::atomic::Ordering;

    async fn connected_adapter(state: Arc<MockAcpState>, cooldown: Duration) -> AcpEnhancedAdapter {
        let url = spawn_mock_acp(state).await;
        let adapter = AcpEnhancedAdapter::new().with_cooldown(cooldown);
        adapter
            .connect(serde_json::json!({
                "url": url,
                "agent_id": "tester",
                "poll_interval_ms": 10,
                "max_poll_attempts": 2,
            }))
            .await
            .unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_circuit_opens_after_five_failures() {
        let state = Arc::new(MockAcpState::default());
        let adapter = connected_adapter(state.clone(), Duration::from_secs(60)).await;
        state.fail_messages.store(true, Ordering::SeqCst);

        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            let err = adapter
                .execute_tool("instant.echo", serde_json::json!({}))
                .await
                .unwrap_err();
            assert!(matches!(err, FabricError::RemoteFailure { .. }));
        }
        assert!(adapter.circuit_open());
        assert_eq!(
            state.message_hits.load(Ordering::SeqCst),
            CIRCUIT_FAILURE_THRESHOLD as usize
        );

        // Sixth call: rejected without a network round-trip.
        let err = adapter
            .execute_tool("instant.echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::CircuitOpen));
        assert_eq!(
            state.message_hits.load(Ordering::SeqCst),
            CIRCUIT_FAILURE_THRESHOLD as usize
        );

        let metrics = adapter.metrics();
        assert_eq!(metrics.errors, CIRCUIT_FAILURE_THRESHOLD as u64);
        assert_eq!(metrics.tools_executed, 0);

        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_circuit_closes_after_cooldown() {
        let state = Arc::new(MockAcpState::default());
        let adapter = connected_adapter(state.clone(), Duration::from_millis(50)).await;
        state.fail_messages.store(true, Ordering::SeqCst);

        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            let _ = adapter
                .execute_tool("instant.echo", serde_json::json!({}))
                .await;
        }
        assert!(adapter.circuit_open());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!adapter.circuit_open());

        // The next call reaches the network again and succeeds.
        state.fail_messages.store(false, Ordering::SeqCst);
        let result = adapter
            .execute_tool("instant.echo", serde_json::json!({ "x": 1 }))
            .await
            .unwrap();
        assert_eq!(result["echoed"]["x"], 1);
        assert_eq!(adapter.metrics().tools_executed, 1);

        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_success_resets_failure_counter() {
        let state = Arc::new(MockAcpState::default());
        let adapter = connected_adapter(state.clone(), Duration::from_secs(60)).await;

        // Four failures, then a success, then four more failures: the
        // circuit must stay closed throughout.
        state.fail_messages.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            let _ = adapter
                .execute_tool("instant.echo", serde_json::json!({}))
                .await;
        }
        state.fail_messages.store(false, Ordering::SeqCst);
        adapter
            .execute_tool("instant.echo", serde_json::json!({}))
            .await
            .unwrap();
        state.fail_messages.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            let _ = adapter
                .execute_tool("instant.echo", serde_json::json!({}))
                .await;
        }
        assert!(!adapter.circuit_open());

        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_resets_breaker() {
        let state = Arc::new(MockAcpState::default());
        let adapter = connected_adapter(state.clone(), Duration::from_secs(60)).await;
        state.fail_messages.store(true, Ordering::SeqCst);
        for _ in 0..CIRCUIT_FAILURE_THRESHOLD {
            let _ = adapter
                .execute_tool("instant.echo", serde_json::json!({}))
                .await;
        }
        assert!(adapter.circuit_open());

        adapter.disconnect().await.unwrap();
        assert!(!adapter.circuit_open());
    }
}
