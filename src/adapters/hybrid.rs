//! Hybrid adapter: official primary with custom fallback.
//!
//! Every operation is delegated to the primary. When the primary answers
//! with an "this implementation cannot do that" outcome (`Unsupported`
//! or an unavailable official implementation), the call is retried on
//! the fallback and the wrapper permanently routes to the fallback from
//! then on; the primary is never attempted again. Runtime failures such
//! as timeouts or remote errors surface unchanged.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::adapters::ProtocolAdapter;
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

/// Primary/fallback pair behind one adapter surface.
pub struct HybridAdapter {
    protocol: ProtocolId,
    primary: Box<dyn ProtocolAdapter>,
    fallback: Box<dyn ProtocolAdapter>,
    use_fallback: AtomicBool,
    last_config: RwLock<Option<Value>>,
}

impl HybridAdapter {
    pub fn new(
        protocol: ProtocolId,
        primary: Box<dyn ProtocolAdapter>,
        fallback: Box<dyn ProtocolAdapter>,
    ) -> Self {
        Self {
            protocol,
            primary,
            fallback,
            use_fallback: AtomicBool::new(false),
            last_config: RwLock::new(None),
        }
    }

    /// Whether the wrapper has switched to the fallback for good.
    pub fn on_fallback(&self) -> bool {
        self.use_fallback.load(Ordering::SeqCst)
    }

    fn active(&self) -> &dyn ProtocolAdapter {
        if self.on_fallback() {
            self.fallback.as_ref()
        } else {
            self.primary.as_ref()
        }
    }

    /// Switch permanently to the fallback, connecting it with the last
    /// seen config when it is not live yet.
    async fn trip(&self, cause: &FabricError) {
        if self.use_fallback.swap(true, Ordering::SeqCst) {
            return;
        }
        log::warn!(
            "{} hybrid adapter switching to fallback: {cause}",
            self.protocol
        );
        if !self.fallback.is_connected() {
            let config = self.last_config.read().clone();
            if let Some(config) = config {
                if let Err(e) = self.fallback.connect(config).await {
                    log::warn!("fallback connect failed: {e}");
                }
            }
        }
    }
}

#[async_trait]
impl ProtocolAdapter for HybridAdapter {
    fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    fn is_connected(&self) -> bool {
        self.active().is_connected()
    }

    async fn connect(&self, config: Value) -> FabricResult<()> {
        *self.last_config.write() = Some(config.clone());
        if !self.on_fallback() {
            match self.primary.connect(config.clone()).await {
                Err(e) if e.triggers_fallback() => self.trip(&e).await,
                other => return other,
            }
        }
        if self.fallback.is_connected() {
            return Ok(());
        }
        self.fallback.connect(config).await
    }

    async fn disconnect(&self) -> FabricResult<()> {
        if let Err(e) = self.primary.disconnect().await {
            log::warn!("primary disconnect failed: {e}");
        }
        if let Err(e) = self.fallback.disconnect().await {
            log::warn!("fallback disconnect failed: {e}");
        }
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        if !self.on_fallback() {
            match self.primary.discover_tools().await {
                Err(e) if e.triggers_fallback() => self.trip(&e).await,
                other => return other,
            }
        }
        self.fallback.discover_tools().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        if !self.on_fallback() {
            match self.primary.execute_tool(name, args.clone()).await {
                Err(e) if e.triggers_fallback() => self.trip(&e).await,
                other => return other,
            }
        }
        self.fallback.execute_tool(name, args).await
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        if !self.on_fallback() {
            match self.primary.get_capabilities().await {
                Err(e) if e.triggers_fallback() => self.trip(&e).await,
                other => return other,
            }
        }
        self.fallback.get_capabilities().await
    }

    fn supports_feature(&self, feature: &str) -> bool {
        self.active().supports_feature(feature)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
