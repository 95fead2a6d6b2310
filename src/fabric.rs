//! The unified protocol fabric.
//!
//! The fabric owns one adapter slot per protocol plus any number of
//! registered servers, maintains the namespaced tool catalog and the
//! capability snapshots, and dispatches tool calls to the adapter that
//! produced the tool. Initialization is best-effort: adapter connects
//! run concurrently and individual failures are logged, leaving the
//! failing adapter disconnected.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;

use crate::adapters::factory::AdapterFactory;
use crate::adapters::ProtocolAdapter;
use crate::agent::UnifiedAgent;
use crate::errors::{FabricError, FabricResult};
use crate::extensions::{
    ConsensusExtension, MeshNetworkingExtension, ProtocolExtension, ReasoningTraceExtension,
};
use crate::types::{ProtocolCapability, ProtocolId, SdkPreference, UnifiedTool};

/// Whether a catalog key answers a bare (un-prefixed) tool lookup.
///
/// A bare name matches when it is the entire local name or a trailing
/// dotted segment of it, so `"search"` finds both `"mcp:search"` and
/// `"a2a:researcher.search"`.
pub(crate) fn key_matches_bare_name(key: &str, name: &str) -> bool {
    key.ends_with(&format!(":{name}")) || key.ends_with(&format!(".{name}"))
}

/// One configured protocol server owned by the fabric.
pub struct ServerRegistration {
    /// Generated id: `<protocol>_<ordinal>`.
    pub id: String,
    pub protocol: ProtocolId,
    /// Tool namespace; defaults to the protocol name.
    pub namespace: String,
    pub config: Value,
    pub(crate) adapter: Arc<dyn ProtocolAdapter>,
    /// Catalog keys contributed at registration time.
    pub tool_keys: Vec<String>,
}

struct CatalogEntry {
    tool: UnifiedTool,
    adapter: Arc<dyn ProtocolAdapter>,
}

/// The fabric core.
pub struct UnifiedProtocolFabric {
    adapters: RwLock<HashMap<ProtocolId, Arc<dyn ProtocolAdapter>>>,
    tools: RwLock<BTreeMap<String, CatalogEntry>>,
    capabilities: RwLock<BTreeMap<ProtocolId, Vec<ProtocolCapability>>>,
    servers: RwLock<Vec<ServerRegistration>>,
    server_counter: AtomicUsize,
    sdk_preferences: RwLock<HashMap<ProtocolId, SdkPreference>>,
    extensions: RwLock<HashMap<String, Arc<dyn ProtocolExtension>>>,
    factory: RwLock<AdapterFactory>,
    initialized: AtomicBool,
}

impl UnifiedProtocolFabric {
    /// Fabric with default adapters (per SDK preference) and built-in
    /// extensions registered.
    pub fn new() -> Self {
        Self::with_sdk_preferences(HashMap::new())
    }

    /// Fabric with explicit per-protocol SDK preferences; protocols not
    /// named default to `Auto`.
    pub fn with_sdk_preferences(preferences: HashMap<ProtocolId, SdkPreference>) -> Self {
        let mut sdk_preferences = HashMap::new();
        for protocol in ProtocolId::ALL {
            sdk_preferences.insert(protocol, SdkPreference::Auto);
        }
        sdk_preferences.extend(preferences);

        let fabric = Self {
            adapters: RwLock::new(HashMap::new()),
            tools: RwLock::new(BTreeMap::new()),
            capabilities: RwLock::new(BTreeMap::new()),
            servers: RwLock::new(Vec::new()),
            server_counter: AtomicUsize::new(0),
            sdk_preferences: RwLock::new(sdk_preferences),
            extensions: RwLock::new(HashMap::new()),
            factory: RwLock::new(AdapterFactory::new()),
            initialized: AtomicBool::new(false),
        };
        fabric.register_default_adapters();
        fabric.register_extension(Arc::new(MeshNetworkingExtension));
        fabric.register_extension(Arc::new(ConsensusExtension));
        fabric.register_extension(Arc::new(ReasoningTraceExtension));
        fabric
    }

    fn register_default_adapters(&self) {
        let factory = self.factory.read();
        let preferences = self.sdk_preferences.read().clone();
        let mut adapters = self.adapters.write();
        for protocol in ProtocolId::WIRE {
            let preference = preferences
                .get(&protocol)
                .copied()
                .unwrap_or(SdkPreference::Auto);
            match factory.create(protocol, preference, &[]) {
                Ok(adapter) => {
                    adapters.insert(protocol, Arc::from(adapter));
                }
                Err(e) => log::warn!("no default adapter for {protocol}: {e}"),
            }
        }
    }

    /// Run a closure against the factory (probe overrides, custom
    /// registrations).
    pub fn with_factory<R>(&self, f: impl FnOnce(&mut AdapterFactory) -> R) -> R {
        f(&mut self.factory.write())
    }

    /// Whether `initialize` has completed.
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Adapter registration
    // -----------------------------------------------------------------------

    /// Bind an adapter to its protocol slot, replacing any existing
    /// binding with a warning.
    ///
    /// Replacement is refused once the bound adapter has been connected
    /// through the fabric.
    pub fn register_adapter(
        &self,
        protocol: ProtocolId,
        adapter: Arc<dyn ProtocolAdapter>,
    ) -> FabricResult<()> {
        let mut adapters = self.adapters.write();
        if let Some(existing) = adapters.get(&protocol) {
            if existing.is_connected() {
                return Err(FabricError::AlreadyConnected);
            }
            log::warn!("overriding existing adapter for {protocol}");
        }
        adapters.insert(protocol, adapter);
        Ok(())
    }

    /// The adapter bound to a protocol slot.
    pub fn get_adapter(&self, protocol: ProtocolId) -> Option<Arc<dyn ProtocolAdapter>> {
        self.adapters.read().get(&protocol).cloned()
    }

    /// Protocols with a bound adapter.
    pub fn get_available_protocols(&self) -> Vec<ProtocolId> {
        let mut protocols: Vec<ProtocolId> = self.adapters.read().keys().copied().collect();
        protocols.sort();
        protocols
    }

    // -----------------------------------------------------------------------
    // Server registration
    // -----------------------------------------------------------------------

    /// Create an adapter for the protocol (honoring the stored SDK
    /// preference), connect it, discover its tools, and append them to
    /// the catalog under the namespace.
    ///
    /// A bare string config is shorthand for `{ "url": ... }`.
    pub async fn register_server(
        &self,
        protocol: ProtocolId,
        config: Value,
        namespace: Option<String>,
    ) -> FabricResult<String> {
        let config = match config {
            Value::String(url) => serde_json::json!({ "url": url }),
            other => other,
        };

        let preference = self
            .sdk_preferences
            .read()
            .get(&protocol)
            .copied()
            .unwrap_or(SdkPreference::Auto);
        let adapter: Arc<dyn ProtocolAdapter> =
            match self.factory.read().create(protocol, preference, &[]) {
                Ok(adapter) => Arc::from(adapter),
                Err(FabricError::Unavailable(_)) => self
                    .get_adapter(protocol)
                    .ok_or(FabricError::AdapterMissing(protocol))?,
                Err(e) => return Err(e),
            };

        let ordinal = self.server_counter.fetch_add(1, Ordering::SeqCst);
        let server_id = format!("{protocol}_{ordinal}");

        adapter.connect(config.clone()).await?;
        let tools = match adapter.discover_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = adapter.disconnect().await;
                return Err(e);
            }
        };

        let namespace = namespace.unwrap_or_else(|| protocol.as_str().to_string());
        let mut tool_keys = Vec::with_capacity(tools.len());
        {
            let mut catalog = self.tools.write();
            for mut tool in tools {
                let key = format!("{namespace}:{}", tool.name);
                tool.name = key.clone();
                if catalog.contains_key(&key) {
                    log::warn!("tool name collision on '{key}', replacing previous entry");
                }
                tool_keys.push(key.clone());
                catalog.insert(
                    key,
                    CatalogEntry {
                        tool,
                        adapter: adapter.clone(),
                    },
                );
            }
        }

        log::info!(
            "registered {protocol} server '{server_id}' with {} tools",
            tool_keys.len()
        );
        self.servers.write().push(ServerRegistration {
            id: server_id.clone(),
            protocol,
            namespace,
            config,
            adapter,
            tool_keys,
        });
        Ok(server_id)
    }

    /// Registered server ids, in registration order.
    pub fn server_ids(&self) -> Vec<String> {
        self.servers.read().iter().map(|s| s.id.clone()).collect()
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// Connect every configured protocol concurrently, then rebuild the
    /// tool catalog and capability snapshots.
    ///
    /// Individual connect failures are logged and tolerated; the failing
    /// adapter stays disconnected and its operations report
    /// `NotConnected`.
    pub async fn initialize(&self, config: Value) -> FabricResult<()> {
        if self.initialized() {
            log::warn!("fabric already initialized");
            return Ok(());
        }
        let config = match config {
            Value::Null => serde_json::Map::new(),
            Value::Object(map) => map,
            _ => {
                return Err(FabricError::ConfigInvalid(
                    "initialize expects a map keyed by protocol id".into(),
                ))
            }
        };

        let adapters: Vec<(ProtocolId, Arc<dyn ProtocolAdapter>)> = self
            .adapters
            .read()
            .iter()
            .map(|(p, a)| (*p, a.clone()))
            .collect();

        let mut connects: Vec<futures::future::BoxFuture<'_, ()>> = Vec::new();
        for (protocol, adapter) in adapters {
            let Some(protocol_config) = config.get(protocol.as_str()).cloned() else {
                continue;
            };
            if let Some(servers) = protocol_config.get("servers").and_then(Value::as_array) {
                let servers = servers.clone();
                connects.push(
                    async move {
                        for server_config in servers {
                            if let Err(e) =
                                self.register_server(protocol, server_config, None).await
                            {
                                log::error!("failed to register {protocol} server: {e}");
                            }
                        }
                    }
                    .boxed(),
                );
            } else {
                connects.push(
                    async move {
                        match adapter.connect(protocol_config).await {
                            Ok(()) => log::info!("connected to {protocol} protocol"),
                            Err(e) => log::error!("failed to connect to {protocol}: {e}"),
                        }
                    }
                    .boxed(),
                );
            }
        }
        join_all(connects).await;

        self.discover_all_tools().await;
        self.discover_all_capabilities().await;

        self.initialized.store(true, Ordering::SeqCst);
        log::info!(
            "unified protocol fabric initialized with {} tools",
            self.tools.read().len()
        );
        Ok(())
    }

    /// Every adapter the fabric owns, as (namespace, adapter) pairs with
    /// server adapters deduplicated against protocol slots.
    fn all_adapters(&self) -> Vec<(String, Arc<dyn ProtocolAdapter>)> {
        let mut entries: Vec<(String, Arc<dyn ProtocolAdapter>)> = self
            .adapters
            .read()
            .iter()
            .map(|(p, a)| (p.as_str().to_string(), a.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for server in self.servers.read().iter() {
            let duplicate = entries
                .iter()
                .any(|(_, existing)| Arc::ptr_eq(existing, &server.adapter));
            if !duplicate {
                entries.push((server.namespace.clone(), server.adapter.clone()));
            }
        }
        entries
    }

    /// Drain every adapter's tool catalog and rebuild the map.
    ///
    /// The old map is cleared up front so stale entries cannot linger,
    /// and the rebuilt map is swapped in under a single lock once every
    /// adapter has reported.
    pub async fn discover_all_tools(&self) {
        self.tools.write().clear();

        let entries = self.all_adapters();
        let discoveries = entries.iter().map(|(namespace, adapter)| {
            let namespace = namespace.clone();
            let adapter = adapter.clone();
            async move {
                let result = adapter.discover_tools().await;
                (namespace, adapter, result)
            }
        });

        let mut catalog = BTreeMap::new();
        for (namespace, adapter, result) in join_all(discoveries).await {
            match result {
                Ok(tools) => {
                    log::info!("discovered {} tools from {namespace}", tools.len());
                    for mut tool in tools {
                        let key = format!("{namespace}:{}", tool.name);
                        tool.name = key.clone();
                        if catalog.contains_key(&key) {
                            log::warn!("tool name collision on '{key}', replacing previous entry");
                        }
                        catalog.insert(
                            key,
                            CatalogEntry {
                                tool,
                                adapter: adapter.clone(),
                            },
                        );
                    }
                }
                Err(FabricError::NotConnected) => {
                    log::debug!("skipping tool discovery for disconnected {namespace} adapter")
                }
                Err(e) => log::error!("failed to discover tools from {namespace}: {e}"),
            }
        }
        *self.tools.write() = catalog;
    }

    /// Refresh the capability snapshot for every adapter.
    pub async fn discover_all_capabilities(&self) {
        let entries = self.all_adapters();
        let queries = entries.into_iter().map(|(namespace, adapter)| async move {
            let result = adapter.get_capabilities().await;
            (namespace, adapter.protocol(), result)
        });

        let mut snapshot: BTreeMap<ProtocolId, Vec<ProtocolCapability>> = BTreeMap::new();
        for (namespace, protocol, result) in join_all(queries).await {
            match result {
                Ok(capabilities) => snapshot.entry(protocol).or_default().extend(capabilities),
                Err(FabricError::NotConnected) => log::debug!(
                    "skipping capability discovery for disconnected {namespace} adapter"
                ),
                Err(e) => log::error!("failed to get capabilities from {namespace}: {e}"),
            }
        }
        *self.capabilities.write() = snapshot;
    }

    // -----------------------------------------------------------------------
    // Catalog access & dispatch
    // -----------------------------------------------------------------------

    /// Snapshot of the tool catalog, optionally filtered by protocol.
    pub fn get_tools(&self, protocol: Option<ProtocolId>) -> Vec<UnifiedTool> {
        self.tools
            .read()
            .values()
            .filter(|entry| protocol.map_or(true, |p| entry.tool.protocol == p))
            .map(|entry| entry.tool.clone())
            .collect()
    }

    /// Capability snapshots, optionally filtered by protocol.
    pub fn get_capabilities(
        &self,
        protocol: Option<ProtocolId>,
    ) -> BTreeMap<ProtocolId, Vec<ProtocolCapability>> {
        let capabilities = self.capabilities.read();
        match protocol {
            Some(p) => capabilities
                .get(&p)
                .map(|caps| BTreeMap::from([(p, caps.clone())]))
                .unwrap_or_default(),
            None => capabilities.clone(),
        }
    }

    /// Execute a tool by keyed name, or by bare name when the suffix is
    /// unique across the catalog.
    pub async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        let resolved = {
            let catalog = self.tools.read();
            if name.contains(':') {
                catalog
                    .get(name)
                    .map(|entry| (entry.tool.clone(), entry.adapter.clone()))
            } else {
                let matches: Vec<(&String, &CatalogEntry)> = catalog
                    .iter()
                    .filter(|(key, _)| key_matches_bare_name(key, name))
                    .collect();
                match matches.as_slice() {
                    [] => None,
                    [(_, entry)] => Some((entry.tool.clone(), entry.adapter.clone())),
                    many => {
                        return Err(FabricError::AmbiguousToolName {
                            name: name.to_string(),
                            candidates: many.iter().map(|(key, _)| (*key).clone()).collect(),
                        })
                    }
                }
            }
        };

        let (tool, adapter) = resolved.ok_or_else(|| FabricError::UnknownTool(name.to_string()))?;
        adapter.execute_tool(tool.local_name(), args).await
    }

    /// Build an agent handle over a snapshot of the current catalog.
    pub fn create_unified_agent(self: &Arc<Self>, name: impl Into<String>) -> UnifiedAgent {
        UnifiedAgent::new(name, Arc::clone(self), self.get_tools(None))
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Disconnect every adapter concurrently (errors suppressed), clear
    /// all state, and mark the fabric uninitialized. Safe to call any
    /// number of times.
    pub async fn shutdown(&self) {
        let entries = self.all_adapters();
        let disconnects = entries.into_iter().map(|(namespace, adapter)| async move {
            if let Err(e) = adapter.disconnect().await {
                log::warn!("error disconnecting {namespace} adapter: {e}");
            }
        });
        join_all(disconnects).await;

        self.tools.write().clear();
        self.capabilities.write().clear();
        self.servers.write().clear();
        self.initialized.store(false, Ordering::SeqCst);
        log::info!("unified protocol fabric shutdown complete");
    }

    // -----------------------------------------------------------------------
    // SDK management
    // -----------------------------------------------------------------------

    /// Preferences, availability matrix, and recommendations.
    pub fn get_sdk_info(&self) -> Value {
        let preferences: BTreeMap<String, String> = self
            .sdk_preferences
            .read()
            .iter()
            .map(|(protocol, preference)| (protocol.to_string(), preference.to_string()))
            .collect();
        let availability = self.factory.read().get_available_adapters();
        serde_json::json!({
            "preferences": preferences,
            "availability": availability,
            "recommendations": {
                "mcp": "Use the official implementation when available",
                "a2a": "Custom implementation recommended",
                "acp": "REST-based custom implementation recommended",
                "anp": "Custom implementation only",
            },
        })
    }

    /// Change the stored preference for one protocol; applies to
    /// adapters created afterwards.
    pub fn update_sdk_preference(&self, protocol: ProtocolId, preference: SdkPreference) {
        self.sdk_preferences.write().insert(protocol, preference);
    }

    /// Flip the named protocols to the official implementation where it
    /// is available. With `test_mode` the availability is probed but no
    /// preference changes.
    pub fn migrate_to_official_sdks(
        &self,
        protocols: &[ProtocolId],
        test_mode: bool,
    ) -> BTreeMap<ProtocolId, bool> {
        let mut results = BTreeMap::new();
        for &protocol in protocols {
            let available = self.factory.read().sdk_available(protocol);
            if available && !test_mode {
                self.update_sdk_preference(protocol, SdkPreference::Official);
            }
            results.insert(protocol, available);
        }
        results
    }

    // -----------------------------------------------------------------------
    // Extensions
    // -----------------------------------------------------------------------

    /// Register an extension by its name.
    pub fn register_extension(&self, extension: Arc<dyn ProtocolExtension>) {
        let name = extension.name().to_string();
        log::info!("registered extension: {name}");
        self.extensions.write().insert(name, extension);
    }

    /// Apply a registered extension.
    pub async fn enable_extension(&self, name: &str, params: Value) -> FabricResult<Value> {
        let extension = self
            .extensions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FabricError::ExtensionNotFound(name.to_string()))?;
        extension.apply(self, params).await
    }

    /// Open a logical all-to-all overlay among the given agents.
    pub async fn create_mesh_network(
        &self,
        agents: Vec<String>,
        topology: &str,
    ) -> FabricResult<Value> {
        self.enable_extension(
            "mesh_networking",
            serde_json::json!({ "agents": agents, "topology": topology }),
        )
        .await
    }

    /// Declare a consensus mechanism with a minimum quorum.
    pub async fn enable_consensus(&self, kind: &str, min_agents: u32) -> FabricResult<Value> {
        self.enable_extension(
            "consensus",
            serde_json::json!({ "type": kind, "min_agents": min_agents }),
        )
        .await
    }

    /// Enable reasoning trace capture at the requested verbosity.
    pub async fn enable_reasoning_traces(&self, level: &str) -> FabricResult<Value> {
        self.enable_extension("reasoning_traces", serde_json::json!({ "level": level }))
            .await
    }
}

impl Default for UnifiedProtocolFabric {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Scriptable in-memory adapter for fabric-level tests.
    struct StubAdapter {
        protocol: ProtocolId,
        tool_names: Vec<&'static str>,
        result: Value,
        fail_connect: bool,
        connected: AtomicBool,
        calls: Arc<StdMutex<Vec<(String, Value)>>>,
    }

    impl StubAdapter {
        fn new(protocol: ProtocolId, tool_names: Vec<&'static str>, result: Value) -> Arc<Self> {
            Arc::new(Self {
                protocol,
                tool_names,
                result,
                fail_connect: false,
                connected: AtomicBool::new(false),
                calls: Arc::new(StdMutex::new(Vec::new())),
            })
        }

        fn failing(protocol: ProtocolId) -> Arc<Self> {
            Arc::new(Self {
                protocol,
                tool_names: vec![],
                result: Value::Null,
                fail_connect: true,
                connected: AtomicBool::new(false),
                calls: Arc::new(StdMutex::new(Vec::new())),
            })
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolAdapter for StubAdapter {
        fn protocol(&self) -> ProtocolId {
            self.protocol
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn connect(&self, _config: Value) -> FabricResult<()> {
            if self.fail_connect {
                return Err(FabricError::TransportUnavailable("stub down".into()));
            }
            if self.is_connected() {
                return Err(FabricError::AlreadyConnected);
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> FabricResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
            if !self.is_connected() {
                return Err(FabricError::NotConnected);
            }
            Ok(self
                .tool_names
                .iter()
                .map(|name| UnifiedTool::new(*name, "stub tool", self.protocol))
                .collect())
        }

        async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
            if !self.is_connected() {
                return Err(FabricError::NotConnected);
            }
            self.calls.lock().unwrap().push((name.to_string(), args));
            Ok(self.result.clone())
        }

        async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
            if !self.is_connected() {
                return Err(FabricError::NotConnected);
            }
            Ok(vec![ProtocolCapability::new(
                "tools",
                "stub tools",
                self.protocol,
            )])
        }
    }

    /// Fabric with two stub adapters exposing a colliding "search"
    /// suffix across protocols.
    async fn collision_fabric() -> (Arc<UnifiedProtocolFabric>, Arc<StubAdapter>, Arc<StubAdapter>)
    {
        let fabric = Arc::new(UnifiedProtocolFabric::new());
        let mcp = StubAdapter::new(
            ProtocolId::Mcp,
            vec!["search"],
            serde_json::json!("mcp says hi"),
        );
        let a2a = StubAdapter::new(
            ProtocolId::A2a,
            vec!["researcher.search"],
            serde_json::json!({ "score": 0.9 }),
        );
        fabric
            .register_adapter(ProtocolId::Mcp, mcp.clone())
            .unwrap();
        fabric
            .register_adapter(ProtocolId::A2a, a2a.clone())
            .unwrap();
        fabric
            .initialize(serde_json::json!({
                "mcp": { "url": "stub://mcp" },
                "a2a": { "url": "stub://a2a" },
            }))
            .await
            .unwrap();
        (fabric, mcp, a2a)
    }

    #[tokio::test]
    async fn test_namespaced_keys_are_unique_and_prefixed() {
        let (fabric, _, _) = collision_fabric().await;
        let mut names: Vec<String> = fabric
            .get_tools(None)
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a2a:researcher.search", "mcp:search"]);

        for tool in fabric.get_tools(None) {
            let (prefix, _) = tool.name.split_once(':').unwrap();
            assert_eq!(prefix, tool.protocol.as_str());
        }
    }

    #[tokio::test]
    async fn test_bare_lookup_on_collision_is_ambiguous() {
        let (fabric, mcp, a2a) = collision_fabric().await;

        let err = fabric
            .execute_tool("search", serde_json::json!({ "q": "x" }))
            .await
            .unwrap_err();
        match err {
            FabricError::AmbiguousToolName { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected ambiguity, got {other}"),
        }

        // Keyed forms disambiguate, and the adapter sees the local name.
        let result = fabric
            .execute_tool("mcp:search", serde_json::json!({ "q": "x" }))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("mcp says hi"));
        assert_eq!(mcp.calls()[0].0, "search");

        let result = fabric
            .execute_tool("a2a:researcher.search", serde_json::json!({ "q": "x" }))
            .await
            .unwrap();
        assert_eq!(result["score"], 0.9);
        assert_eq!(a2a.calls()[0].0, "researcher.search");
    }

    #[tokio::test]
    async fn test_unique_bare_lookup_succeeds() {
        let fabric = Arc::new(UnifiedProtocolFabric::new());
        let stub = StubAdapter::new(
            ProtocolId::Acp,
            vec!["billing.charge"],
            serde_json::json!({ "ok": true }),
        );
        fabric
            .register_adapter(ProtocolId::Acp, stub.clone())
            .unwrap();
        fabric
            .initialize(serde_json::json!({ "acp": { "url": "stub://acp" } }))
            .await
            .unwrap();

        let result = fabric
            .execute_tool("charge", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        assert_eq!(stub.calls()[0].0, "billing.charge");

        let err = fabric
            .execute_tool("refund", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_initialize_is_best_effort() {
        let fabric = Arc::new(UnifiedProtocolFabric::new());
        let healthy = StubAdapter::new(ProtocolId::Mcp, vec!["echo"], serde_json::json!("ok"));
        let broken = StubAdapter::failing(ProtocolId::Acp);
        fabric
            .register_adapter(ProtocolId::Mcp, healthy.clone())
            .unwrap();
        fabric
            .register_adapter(ProtocolId::Acp, broken.clone())
            .unwrap();

        fabric
            .initialize(serde_json::json!({
                "mcp": { "url": "stub://mcp" },
                "acp": { "url": "stub://acp" },
            }))
            .await
            .unwrap();

        assert!(fabric.initialized());
        assert_eq!(fabric.get_tools(None).len(), 1);
        assert!(!broken.is_connected());
        assert!(matches!(
            broken.discover_tools().await,
            Err(FabricError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything_and_is_idempotent() {
        let (fabric, mcp, _) = collision_fabric().await;
        assert!(!fabric.get_tools(None).is_empty());
        assert!(!fabric.get_capabilities(None).is_empty());

        fabric.shutdown().await;
        assert!(fabric.get_tools(None).is_empty());
        assert!(fabric.get_capabilities(None).is_empty());
        assert!(!fabric.initialized());
        assert!(!mcp.is_connected());

        // Second shutdown from the cleared state completes fine.
        fabric.shutdown().await;
        assert!(fabric.get_tools(None).is_empty());
    }

    #[tokio::test]
    async fn test_initialize_shutdown_round_trip() {
        let fabric = Arc::new(UnifiedProtocolFabric::new());
        let stub = StubAdapter::new(ProtocolId::Mcp, vec!["echo", "fetch"], Value::Null);
        fabric
            .register_adapter(ProtocolId::Mcp, stub.clone())
            .unwrap();
        let config = serde_json::json!({ "mcp": { "url": "stub://mcp" } });

        fabric.initialize(config.clone()).await.unwrap();
        let mut first: Vec<String> = fabric.get_tools(None).into_iter().map(|t| t.name).collect();
        first.sort();

        fabric.shutdown().await;
        fabric.initialize(config).await.unwrap();
        let mut second: Vec<String> =
            fabric.get_tools(None).into_iter().map(|t| t.name).collect();
        second.sort();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_get_tools_filtered_by_protocol() {
        let (fabric, _, _) = collision_fabric().await;
        let mcp_tools = fabric.get_tools(Some(ProtocolId::Mcp));
        assert_eq!(mcp_tools.len(), 1);
        assert_eq!(mcp_tools[0].name, "mcp:search");
        assert!(fabric.get_tools(Some(ProtocolId::Anp)).is_empty());
    }

    #[tokio::test]
    async fn test_register_adapter_rules() {
        let fabric = UnifiedProtocolFabric::new();
        let first = StubAdapter::new(ProtocolId::Mcp, vec![], Value::Null);
        let second = StubAdapter::new(ProtocolId::Mcp, vec![], Value::Null);

        fabric.register_adapter(ProtocolId::Mcp, first.clone()).unwrap();
        // Replacing a disconnected binding warns but succeeds.
        fabric
            .register_adapter(ProtocolId::Mcp, second.clone())
            .unwrap();

        second.connect(serde_json::json!({})).await.unwrap();
        let err = fabric
            .register_adapter(ProtocolId::Mcp, first)
            .unwrap_err();
        assert!(matches!(err, FabricError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_register_server_ids_and_namespaces() {
        let fabric = Arc::new(UnifiedProtocolFabric::new());
        // Route factory creation to stubs for a scriptable server.
        fabric.with_factory(|factory| {
            factory.register(
                ProtocolId::Mcp,
                crate::adapters::factory::AdapterEntry {
                    official: None,
                    custom: Some(Arc::new(|| {
                        Box::new(ScriptedServer {
                            connected: AtomicBool::new(false),
                        })
                    })),
                    probe: Some(Arc::new(|| false)),
                },
            );
        });

        let first = fabric
            .register_server(ProtocolId::Mcp, serde_json::json!({ "url": "stub://1" }), None)
            .await
            .unwrap();
        let second = fabric
            .register_server(
                ProtocolId::Mcp,
                Value::String("stub://2".into()),
                Some("mirror".into()),
            )
            .await
            .unwrap();
        assert_eq!(first, "mcp_0");
        assert_eq!(second, "mcp_1");
        assert_eq!(fabric.server_ids(), vec!["mcp_0", "mcp_1"]);

        let mut names: Vec<String> = fabric.get_tools(None).into_iter().map(|t| t.name).collect();
        names.sort();
        assert_eq!(names, vec!["mcp:probe", "mirror:probe"]);

        // Dispatch reaches the owning server adapter with the local name.
        let result = fabric
            .execute_tool("mirror:probe", serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("scripted"));
    }

    /// Minimal adapter handed out by the factory in server tests.
    struct ScriptedServer {
        connected: AtomicBool,
    }

    #[async_trait]
    impl ProtocolAdapter for ScriptedServer {
        fn protocol(&self) -> ProtocolId {
            ProtocolId::Mcp
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn connect(&self, _config: Value) -> FabricResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn disconnect(&self) -> FabricResult<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
            Ok(vec![UnifiedTool::new("probe", "probe tool", ProtocolId::Mcp)])
        }
        async fn execute_tool(&self, _name: &str, _args: Value) -> FabricResult<Value> {
            Ok(serde_json::json!("scripted"))
        }
        async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_agent_handle_snapshot() {
        let (fabric, _, _) = collision_fabric().await;
        let agent = fabric.create_unified_agent("helper");
        assert_eq!(agent.name(), "helper");
        assert_eq!(agent.tools().len(), 2);

        let tool = agent.tool("mcp:search").unwrap();
        let result = tool.call(serde_json::json!({ "q": "x" })).await.unwrap();
        assert_eq!(result, serde_json::json!("mcp says hi"));

        assert!(matches!(
            agent.tool("search"),
            Err(FabricError::AmbiguousToolName { .. })
        ));

        // Later fabric changes do not retroactively appear in the handle.
        fabric.shutdown().await;
        assert_eq!(agent.tools().len(), 2);
        assert!(agent.tool("mcp:search").is_ok());
    }

    #[tokio::test]
    async fn test_sdk_info_and_migration() {
        let fabric = UnifiedProtocolFabric::new();
        let info = fabric.get_sdk_info();
        assert_eq!(info["preferences"]["mcp"], "auto");
        assert_eq!(info["availability"]["mcp"]["official"], true);
        assert_eq!(info["availability"]["anp"]["official"], false);
        assert!(info["recommendations"]["a2a"].is_string());

        fabric.update_sdk_preference(ProtocolId::Mcp, SdkPreference::Custom);
        assert_eq!(fabric.get_sdk_info()["preferences"]["mcp"], "custom");

        let results =
            fabric.migrate_to_official_sdks(&[ProtocolId::Mcp, ProtocolId::Anp], false);
        assert_eq!(results[&ProtocolId::Mcp], true);
        assert_eq!(results[&ProtocolId::Anp], false);
        assert_eq!(fabric.get_sdk_info()["preferences"]["mcp"], "official");
        // ANP stays untouched: no official implementation to migrate to.
        assert_eq!(fabric.get_sdk_info()["preferences"]["anp"], "auto");

        // Test mode probes without flipping preferences.
        fabric.update_sdk_preference(ProtocolId::Mcp, SdkPreference::Auto);
        let results = fabric.migrate_to_official_sdks(&[ProtocolId::Mcp], true);
        assert_eq!(results[&ProtocolId::Mcp], true);
        assert_eq!(fabric.get_sdk_info()["preferences"]["mcp"], "auto");
    }

    #[tokio::test]
    async fn test_extensions() {
        let fabric = UnifiedProtocolFabric::new();

        let report = fabric
            .create_mesh_network(vec!["a".into(), "b".into(), "c".into()], "dynamic")
            .await
            .unwrap();
        assert_eq!(report["status"], "active");
        assert_eq!(report["connections"], 3);

        let report = fabric.enable_consensus("pbft", 4).await.unwrap();
        assert_eq!(report["type"], "pbft");
        assert_eq!(report["min_agents"], 4);

        let report = fabric.enable_reasoning_traces("detailed").await.unwrap();
        assert_eq!(report["status"], "enabled");

        let err = fabric
            .enable_extension("time_travel", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::ExtensionNotFound(_)));
    }

    #[tokio::test]
    async fn test_initialize_single_mcp_server_end_to_end() {
        let _ = env_logger::builder().is_test(true).try_init();
        let url = crate::adapters::mcp::tests::spawn_mock_mcp().await;
        let fabric = Arc::new(UnifiedProtocolFabric::new());
        fabric
            .initialize(serde_json::json!({
                "mcp": { "servers": [{ "url": url }] },
            }))
            .await
            .unwrap();

        let tools = fabric.get_tools(None);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "mcp:echo");

        let result = fabric
            .execute_tool("mcp:echo", serde_json::json!({ "msg": "hi" }))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("hi"));

        fabric.shutdown().await;
        assert!(fabric.get_tools(None).is_empty());
    }
}
