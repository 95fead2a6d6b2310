//! Adapter factory: runtime selection of protocol implementations.
//!
//! Each protocol registers up to two constructors (official and custom)
//! plus an availability probe. Selection follows the preference order:
//! explicit custom, explicit official, hybrid with fallback, or
//! automatic, where the official implementation is chosen only when it
//! is available and supports every required feature. Probe results are
//! cached after the first query.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

use crate::adapters::a2a::{A2aAdapter, A2aOfficialAdapter};
use crate::adapters::acp::AcpAdapter;
use crate::adapters::anp::AnpAdapter;
use crate::adapters::hybrid::HybridAdapter;
use crate::adapters::mcp::{McpAdapter, McpOfficialAdapter};
use crate::adapters::ProtocolAdapter;
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolId, SdkPreference};

/// Constructor for one adapter implementation.
pub type AdapterCtor = Arc<dyn Fn() -> Box<dyn ProtocolAdapter> + Send + Sync>;
/// Probe answering whether the official implementation is usable.
pub type AvailabilityProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Registered implementations for one protocol.
#[derive(Clone)]
pub struct AdapterEntry {
    pub official: Option<AdapterCtor>,
    pub custom: Option<AdapterCtor>,
    pub probe: Option<AvailabilityProbe>,
}

impl AdapterEntry {
    fn empty() -> Self {
        Self {
            official: None,
            custom: None,
            probe: None,
        }
    }
}

/// Factory with per-protocol implementation registry and cached
/// availability.
pub struct AdapterFactory {
    entries: HashMap<ProtocolId, AdapterEntry>,
    availability: DashMap<ProtocolId, bool>,
}

impl AdapterFactory {
    /// Factory with the built-in implementations registered.
    pub fn new() -> Self {
        let mut factory = Self {
            entries: HashMap::new(),
            availability: DashMap::new(),
        };

        factory.entries.insert(
            ProtocolId::Mcp,
            AdapterEntry {
                official: Some(Arc::new(|| Box::new(McpOfficialAdapter::new()))),
                custom: Some(Arc::new(|| Box::new(McpAdapter::new()))),
                probe: Some(Arc::new(|| true)),
            },
        );
        factory.entries.insert(
            ProtocolId::A2a,
            AdapterEntry {
                official: Some(Arc::new(|| Box::new(A2aOfficialAdapter::new()))),
                custom: Some(Arc::new(|| Box::new(A2aAdapter::new()))),
                probe: Some(Arc::new(|| true)),
            },
        );
        factory.entries.insert(
            ProtocolId::Acp,
            AdapterEntry {
                // The REST stack is always present, but there is no
                // official implementation to hand out.
                official: None,
                custom: Some(Arc::new(|| Box::new(AcpAdapter::new()))),
                probe: Some(Arc::new(|| true)),
            },
        );
        factory.entries.insert(
            ProtocolId::Anp,
            AdapterEntry {
                official: None,
                custom: Some(Arc::new(|| Box::new(AnpAdapter::new()))),
                probe: Some(Arc::new(|| false)),
            },
        );

        factory
    }

    /// Replace the registrations for one protocol.
    pub fn register(&mut self, protocol: ProtocolId, entry: AdapterEntry) {
        self.entries.insert(protocol, entry);
        self.availability.remove(&protocol);
    }

    /// Replace only the availability probe for one protocol.
    pub fn set_probe(&mut self, protocol: ProtocolId, probe: AvailabilityProbe) {
        self.entries
            .entry(protocol)
            .or_insert_with(AdapterEntry::empty)
            .probe = Some(probe);
        self.availability.remove(&protocol);
    }

    /// Whether the official implementation is available. Probed once,
    /// then cached.
    pub fn sdk_available(&self, protocol: ProtocolId) -> bool {
        if let Some(cached) = self.availability.get(&protocol) {
            return *cached;
        }
        let available = self
            .entries
            .get(&protocol)
            .and_then(|entry| entry.probe.as_ref())
            .map(|probe| probe())
            .unwrap_or(false);
        self.availability.insert(protocol, available);
        available
    }

    /// Create an adapter for the protocol under the given preference.
    pub fn create(
        &self,
        protocol: ProtocolId,
        preference: SdkPreference,
        required_features: &[&str],
    ) -> FabricResult<Box<dyn ProtocolAdapter>> {
        let entry = self
            .entries
            .get(&protocol)
            .ok_or(FabricError::Unavailable(protocol))?;

        match preference {
            SdkPreference::Custom => entry
                .custom
                .as_ref()
                .map(|ctor| ctor())
                .ok_or(FabricError::Unavailable(protocol)),

            SdkPreference::Official => {
                if self.sdk_available(protocol) {
                    if let Some(ctor) = &entry.official {
                        return Ok(ctor());
                    }
                }
                Err(FabricError::OfficialUnavailable(protocol))
            }

            SdkPreference::Hybrid => self.build_hybrid(protocol, entry),

            SdkPreference::Auto => {
                if self.sdk_available(protocol) && entry.official.is_some() {
                    let candidate = entry.official.as_ref().map(|ctor| ctor());
                    if let Some(candidate) = candidate {
                        if required_features
                            .iter()
                            .all(|feature| candidate.supports_feature(feature))
                        {
                            return Ok(candidate);
                        }
                        // Feature gap: hybrid keeps the official path hot
                        // while the custom implementation covers the rest.
                        return self.build_hybrid(protocol, entry);
                    }
                }
                entry
                    .custom
                    .as_ref()
                    .map(|ctor| ctor())
                    .ok_or(FabricError::Unavailable(protocol))
            }
        }
    }

    /// Build the hybrid pair; degrades to whichever single
    /// implementation exists.
    fn build_hybrid(
        &self,
        protocol: ProtocolId,
        entry: &AdapterEntry,
    ) -> FabricResult<Box<dyn ProtocolAdapter>> {
        let official_usable = self.sdk_available(protocol) && entry.official.is_some();
        match (official_usable, &entry.custom) {
            (true, Some(custom)) => {
                let primary = entry.official.as_ref().map(|ctor| ctor());
                match primary {
                    Some(primary) => Ok(Box::new(HybridAdapter::new(protocol, primary, custom()))),
                    None => Ok(custom()),
                }
            }
            (true, None) => entry
                .official
                .as_ref()
                .map(|ctor| ctor())
                .ok_or(FabricError::Unavailable(protocol)),
            (false, Some(custom)) => Ok(custom()),
            (false, None) => Err(FabricError::Unavailable(protocol)),
        }
    }

    /// Availability matrix for every protocol, used by `get_sdk_info`.
    pub fn get_available_adapters(&self) -> BTreeMap<String, Value> {
        let mut matrix = BTreeMap::new();
        for protocol in ProtocolId::ALL {
            let entry = self.entries.get(&protocol);
            let official = self.sdk_available(protocol)
                && entry.map(|e| e.official.is_some()).unwrap_or(false);
            let custom = entry.map(|e| e.custom.is_some()).unwrap_or(false);
            matrix.insert(
                protocol.to_string(),
                serde_json::json!({
                    "official": official,
                    "custom": custom,
                    "hybrid": official && custom,
                }),
            );
        }
        matrix
    }

    /// Recommend an implementation kind for the protocol.
    pub fn recommend(&self, protocol: ProtocolId, required_features: &[&str]) -> &'static str {
        let Some(entry) = self.entries.get(&protocol) else {
            return "custom";
        };
        if !self.sdk_available(protocol) || entry.official.is_none() {
            return "custom";
        }
        if let Some(ctor) = &entry.official {
            let candidate = ctor();
            if required_features
                .iter()
                .all(|feature| candidate.supports_feature(feature))
            {
                return "official";
            }
        }
        "hybrid"
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
