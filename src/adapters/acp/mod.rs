//! ACP (Agent Communication Protocol) adapter.
//!
//! ACP is REST-based and session-oriented. Connecting opens a persistent
//! HTTP session (`X-Agent-ID` / `X-Agent-Type` headers), performs the
//! `POST /sessions` handshake, and caches the `GET /tools` listing.
//! Tool execution is two-phase: a `tool_call` message is posted, and a
//! `pending` response is polled at `/executions/<id>` until it settles.

pub mod enhanced;
pub mod wire;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::adapters::{ProtocolAdapter, CONNECT_TIMEOUT_SECS};
use crate::errors::{FabricError, FabricResult};
use crate::types::{ProtocolCapability, ProtocolId, UnifiedTool};

pub use enhanced::AcpEnhancedAdapter;
pub use wire::{AcpMessage, MessageType};

/// Default async poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default maximum poll attempts.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;
/// Default in-flight tool execution limit.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

// ---------------------------------------------------------------------------
// AcpConfig
// ---------------------------------------------------------------------------

/// Bearer-token authentication block.
#[derive(Debug, Clone, Deserialize)]
pub struct AcpAuth {
    pub token: String,
}

/// Connection configuration for an ACP service.
#[derive(Debug, Clone, Deserialize)]
pub struct AcpConfig {
    /// Service base URL.
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Retry budget announced to the service.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    pub auth: Option<AcpAuth>,
    /// Local agent id, used in message envelopes and headers.
    pub agent_id: Option<String>,
    /// Human-readable agent name for the session handshake.
    pub name: Option<String>,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    /// Async poll interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Async poll attempt limit.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// In-flight tool execution limit.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_timeout() -> u64 {
    CONNECT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    3
}

fn default_capabilities() -> Vec<String> {
    vec!["tool-execution".to_string()]
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_poll_attempts() -> u32 {
    DEFAULT_MAX_POLL_ATTEMPTS
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

impl AcpConfig {
    pub fn parse(config: Value) -> FabricResult<Self> {
        serde_json::from_value(config)
            .map_err(|e| FabricError::ConfigInvalid(format!("ACP config: {e}")))
    }
}

// ---------------------------------------------------------------------------
// AcpAdapter
// ---------------------------------------------------------------------------

/// REST-based ACP adapter with session lifecycle and async polling.
pub struct AcpAdapter {
    http: RwLock<Option<reqwest::Client>>,
    base_url: RwLock<Option<String>>,
    agent_id: RwLock<String>,
    session_id: RwLock<Option<String>>,
    /// Lazily created per-agent sessions; the mutex makes creation
    /// single-flight per agent id.
    agent_sessions: Mutex<HashMap<String, String>>,
    tools: RwLock<BTreeMap<String, Value>>,
    poll_interval: RwLock<Duration>,
    max_poll_attempts: RwLock<u32>,
    timeout: RwLock<u64>,
    in_flight: std::sync::atomic::AtomicUsize,
    max_in_flight: RwLock<usize>,
}

/// Releases one in-flight slot when the execution finishes.
struct InFlightSlot<'a> {
    counter: &'a std::sync::atomic::AtomicUsize,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.counter
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }
}

impl AcpAdapter {
    pub fn new() -> Self {
        Self {
            http: RwLock::new(None),
            base_url: RwLock::new(None),
            agent_id: RwLock::new("agentfabric-agent".to_string()),
            session_id: RwLock::new(None),
            agent_sessions: Mutex::new(HashMap::new()),
            tools: RwLock::new(BTreeMap::new()),
            poll_interval: RwLock::new(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)),
            max_poll_attempts: RwLock::new(DEFAULT_MAX_POLL_ATTEMPTS),
            timeout: RwLock::new(CONNECT_TIMEOUT_SECS),
            in_flight: std::sync::atomic::AtomicUsize::new(0),
            max_in_flight: RwLock::new(DEFAULT_MAX_IN_FLIGHT),
        }
    }

    /// Claim an in-flight slot; requests beyond the limit fail instead
    /// of queueing.
    fn acquire_slot(&self) -> FabricResult<InFlightSlot<'_>> {
        use std::sync::atomic::Ordering;
        let max = *self.max_in_flight.read();
        let previous = self.in_flight.fetch_add(1, Ordering::SeqCst);
        if previous >= max {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(FabricError::TooManyRequests);
        }
        Ok(InFlightSlot {
            counter: &self.in_flight,
        })
    }

    fn channel(&self) -> FabricResult<(reqwest::Client, String, String)> {
        let client = self.http.read().clone().ok_or(FabricError::NotConnected)?;
        let base = self.base_url.read().clone().ok_or(FabricError::NotConnected)?;
        let session = self.session_id.read().clone().ok_or(FabricError::NotConnected)?;
        Ok((client, base, session))
    }

    fn timeout_secs(&self) -> u64 {
        *self.timeout.read()
    }

    /// The active primary session id.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    async fn check_response(response: reqwest::Response) -> FabricResult<Value> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FabricError::AuthRejected(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FabricError::remote_with_body(
                format!("ACP request failed: HTTP {status}"),
                Value::String(body),
            ));
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid ACP response: {e}")))
    }

    /// Refresh the tool cache from `GET /tools`; unchanged on error.
    async fn refresh_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        let (client, base, session) = self.channel()?;
        let response = client
            .get(format!("{}/tools", base.trim_end_matches('/')))
            .header("X-Session-ID", &session)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        let body = Self::check_response(response).await?;

        let mut cache = BTreeMap::new();
        let mut tools = Vec::new();
        for descriptor in body
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
        {
            let Some(name) = descriptor.get("name").and_then(Value::as_str) else {
                continue;
            };
            tools.push(
                UnifiedTool::new(
                    name,
                    descriptor
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    ProtocolId::Acp,
                )
                .with_parameters(
                    descriptor
                        .get("input_schema")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                )
                .with_handle(descriptor.clone()),
            );
            cache.insert(name.to_string(), descriptor);
        }
        *self.tools.write() = cache;
        Ok(tools)
    }

    /// Poll `/executions/<id>` until the execution settles or the
    /// attempt budget runs out.
    async fn poll_for_result(&self, execution_id: &str) -> FabricResult<Value> {
        let (client, base, session) = self.channel()?;
        let interval = *self.poll_interval.read();
        let max_attempts = *self.max_poll_attempts.read();

        for _attempt in 0..max_attempts {
            // Disconnect mid-poll cancels the wait.
            if !self.is_connected() {
                return Err(FabricError::Cancelled);
            }
            let response = client
                .get(format!(
                    "{}/executions/{}",
                    base.trim_end_matches('/'),
                    execution_id
                ))
                .header("X-Session-ID", &session)
                .send()
                .await
                .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
            let body = Self::check_response(response).await?;

            match body.get("status").and_then(Value::as_str) {
                Some("completed") => return Ok(body.get("result").cloned().unwrap_or(Value::Null)),
                Some("failed") => {
                    return Err(FabricError::remote_with_body(
                        body.get("error")
                            .and_then(Value::as_str)
                            .unwrap_or("execution failed")
                            .to_string(),
                        body.clone(),
                    ))
                }
                _ => tokio::time::sleep(interval).await,
            }
        }

        Err(FabricError::Timeout {
            seconds: (interval.as_millis() as u64 * max_attempts as u64) / 1_000,
        })
    }

    /// Dispatch a result that may be immediate or pending.
    async fn settle(&self, body: Value) -> FabricResult<Value> {
        if body.get("status").and_then(Value::as_str) == Some("pending") {
            let execution_id = body
                .get("execution_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    FabricError::remote("pending response carried no execution_id".to_string())
                })?
                .to_string();
            return self.poll_for_result(&execution_id).await;
        }
        Ok(body.get("result").cloned().unwrap_or(body))
    }

    // -----------------------------------------------------------------------
    // ACP-specific surface
    // -----------------------------------------------------------------------

    /// Send a message to another agent.
    ///
    /// A session for the receiving agent is created lazily on first use;
    /// concurrent callers for the same agent share one handshake.
    pub async fn send_message(
        &self,
        receiver: &str,
        content: Value,
        kind: MessageType,
    ) -> FabricResult<Value> {
        let (client, base, primary_session) = self.channel()?;
        let session = if receiver == "system" {
            primary_session
        } else {
            self.session_for_agent(receiver).await?
        };
        let sender = self.agent_id.read().clone();
        let message = AcpMessage::new(kind, sender, receiver, content, &session);

        let response = client
            .post(format!("{}/messages", base.trim_end_matches('/')))
            .header("X-Session-ID", &session)
            .json(&message)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        Self::check_response(response).await
    }

    /// Create a workflow; returns its id.
    pub async fn create_workflow(&self, definition: Value) -> FabricResult<String> {
        let (client, base, session) = self.channel()?;
        let response = client
            .post(format!("{}/workflows", base.trim_end_matches('/')))
            .header("X-Session-ID", &session)
            .json(&definition)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        let body = Self::check_response(response).await?;
        body.get("workflow_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| FabricError::remote("workflow creation returned no id".to_string()))
    }

    /// Execute a workflow; pending executions use the same poll machinery
    /// as tool calls.
    pub async fn execute_workflow(&self, workflow_id: &str, inputs: Value) -> FabricResult<Value> {
        let (client, base, session) = self.channel()?;
        let response = client
            .post(format!(
                "{}/workflows/{}/execute",
                base.trim_end_matches('/'),
                workflow_id
            ))
            .header("X-Session-ID", &session)
            .json(&serde_json::json!({ "inputs": inputs }))
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        let body = Self::check_response(response).await?;
        self.settle(body).await
    }

    /// Get or create the session for one agent, single-flight.
    async fn session_for_agent(&self, agent_id: &str) -> FabricResult<String> {
        let mut sessions = self.agent_sessions.lock().await;
        if let Some(session) = sessions.get(agent_id) {
            return Ok(session.clone());
        }
        let client = self.http.read().clone().ok_or(FabricError::NotConnected)?;
        let base = self.base_url.read().clone().ok_or(FabricError::NotConnected)?;
        let response = client
            .post(format!("{}/sessions", base.trim_end_matches('/')))
            .json(&serde_json::json!({ "agent": { "id": agent_id } }))
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        let body = Self::check_response(response).await?;
        let session = body
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| FabricError::remote("session creation returned no id".to_string()))?
            .to_string();
        sessions.insert(agent_id.to_string(), session.clone());
        Ok(session)
    }

    async fn close_session(client: &reqwest::Client, base: &str, session_id: &str) {
        let result = client
            .delete(format!("{}/sessions/{}", base.trim_end_matches('/'), session_id))
            .send()
            .await;
        match result {
            Ok(response) if !response.status().is_success() => {
                log::warn!(
                    "failed to close ACP session {session_id}: HTTP {}",
                    response.status()
                );
            }
            Err(e) => log::warn!("failed to close ACP session {session_id}: {e}"),
            _ => {}
        }
    }
}

impl Default for AcpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolAdapter for AcpAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Acp
    }

    fn is_connected(&self) -> bool {
        self.session_id.read().is_some()
    }

    async fn connect(&self, config: Value) -> FabricResult<()> {
        if self.is_connected() {
            return Err(FabricError::AlreadyConnected);
        }
        let cfg = AcpConfig::parse(config)?;
        let agent_id = cfg
            .agent_id
            .clone()
            .unwrap_or_else(|| "agentfabric-agent".to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "X-Agent-ID",
            HeaderValue::from_str(&agent_id)
                .map_err(|e| FabricError::ConfigInvalid(format!("bad agent id: {e}")))?,
        );
        headers.insert("X-Agent-Type", HeaderValue::from_static("agentfabric"));
        if let Some(auth) = &cfg.auth {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", auth.token))
                    .map_err(|e| FabricError::ConfigInvalid(format!("bad auth token: {e}")))?,
            );
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout))
            .default_headers(headers)
            .build()
            .map_err(|e| FabricError::TransportUnavailable(e.to_string()))?;

        let handshake = serde_json::json!({
            "agent": {
                "id": agent_id.clone(),
                "name": cfg.name.clone().unwrap_or_else(|| "Fabric ACP Agent".into()),
                "capabilities": cfg.capabilities,
                "version": crate::VERSION,
            },
            "config": {
                "timeout": cfg.timeout,
                "max_retries": cfg.max_retries,
            },
        });
        let response = client
            .post(format!("{}/sessions", cfg.url.trim_end_matches('/')))
            .json(&handshake)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, cfg.timeout))?;
        let body = Self::check_response(response).await?;
        let session_id = body
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| FabricError::remote("session handshake returned no id".to_string()))?
            .to_string();

        log::info!("ACP session established: {session_id}");
        *self.agent_id.write() = agent_id;
        *self.timeout.write() = cfg.timeout;
        *self.poll_interval.write() = Duration::from_millis(cfg.poll_interval_ms);
        *self.max_poll_attempts.write() = cfg.max_poll_attempts;
        *self.max_in_flight.write() = cfg.max_in_flight;
        *self.base_url.write() = Some(cfg.url);
        *self.http.write() = Some(client);
        *self.session_id.write() = Some(session_id);

        if let Err(e) = self.refresh_tools().await {
            let _ = self.disconnect().await;
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        let client = self.http.write().take();
        let base = self.base_url.write().take();
        let session = self.session_id.write().take();
        let agent_sessions: Vec<String> = {
            let mut sessions = self.agent_sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        if let (Some(client), Some(base)) = (client, base) {
            if let Some(session) = session {
                Self::close_session(&client, &base, &session).await;
            }
            for session in agent_sessions {
                Self::close_session(&client, &base, &session).await;
            }
        }
        self.tools.write().clear();
        Ok(())
    }

    async fn discover_tools(&self) -> FabricResult<Vec<UnifiedTool>> {
        self.channel()?;
        self.refresh_tools().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> FabricResult<Value> {
        let (client, base, session) = self.channel()?;
        let _slot = self.acquire_slot()?;
        if !self.tools.read().contains_key(name) {
            self.refresh_tools().await?;
            if !self.tools.read().contains_key(name) {
                return Err(FabricError::UnknownTool(name.to_string()));
            }
        }

        let sender = self.agent_id.read().clone();
        let message = AcpMessage::new(
            MessageType::ToolCall,
            sender,
            "system",
            serde_json::json!({
                "tool": name,
                "arguments": args,
                "context": {
                    "session_id": session.clone(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                },
            }),
            &session,
        );

        let response = client
            .post(format!("{}/messages", base.trim_end_matches('/')))
            .header("X-Session-ID", &session)
            .json(&message)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs()))?;
        let body = Self::check_response(response).await?;
        self.settle(body).await
    }

    async fn get_capabilities(&self) -> FabricResult<Vec<ProtocolCapability>> {
        let (_, _, session) = self.channel()?;
        let mut capabilities = vec![
            ProtocolCapability::new("tools", "Tool discovery and execution via ACP", ProtocolId::Acp),
            ProtocolCapability::new("messaging", "Agent-to-agent messaging", ProtocolId::Acp),
            ProtocolCapability::new("workflows", "Workflow creation and execution", ProtocolId::Acp),
            ProtocolCapability::new("sessions", "Session management", ProtocolId::Acp)
                .with_metadata("session_id", Value::String(session)),
            ProtocolCapability::new(
                "async_execution",
                "Asynchronous tool and workflow execution",
                ProtocolId::Acp,
            ),
        ];
        let tool_count = self.tools.read().len();
        if tool_count > 0 {
            capabilities.push(
                ProtocolCapability::new("tool_discovery", "Dynamic tool discovery", ProtocolId::Acp)
                    .with_metadata("tool_count", serde_json::json!(tool_count)),
            );
        }
        Ok(capabilities)
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "tools" | "messaging" | "workflows" | "sessions" | "async_execution"
                | "multipart_messages"
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};

    #[derive(Default)]
    pub(crate) struct MockAcpState {
        pub message_hits: AtomicUsize,
        pub execution_hits: AtomicUsize,
        pub closed_sessions: AtomicUsize,
        /// How many polls report "pending" before completion; usize::MAX
        /// means the execution never settles.
        pub pending_polls: AtomicUsize,
        /// When true, every /messages call fails with HTTP 500.
        pub fail_messages: std::sync::atomic::AtomicBool,
    }

    pub(crate) async fn spawn_mock_acp(state: Arc<MockAcpState>) -> String {
        async fn sessions(Json(body): Json<Value>) -> Json<Value> {
            let agent = body["agent"]["id"].as_str().unwrap_or("anon");
            Json(serde_json::json!({ "session_id": format!("sess-{agent}") }))
        }

        async fn tools() -> Json<Value> {
            Json(serde_json::json!({
                "tools": [
                    { "name": "billing.charge", "description": "Charge an account",
                      "input_schema": { "type": "object" } },
                    { "name": "instant.echo", "description": "Echo synchronously" }
                ]
            }))
        }

        async fn messages(
            State(state): State<Arc<MockAcpState>>,
            Json(body): Json<Value>,
        ) -> (StatusCode, Json<Value>) {
            state.message_hits.fetch_add(1, Ordering::SeqCst);
            if state.fail_messages.load(Ordering::SeqCst) {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "kaboom" })),
                );
            }
            let tool = body["content"]["tool"].as_str().unwrap_or_default();
            if tool == "billing.charge" {
                (
                    StatusCode::OK,
                    Json(serde_json::json!({ "status": "pending", "execution_id": "e1" })),
                )
            } else {
                (
                    StatusCode::OK,
                    Json(serde_json::json!({ "result": { "echoed": body["content"]["arguments"] } })),
                )
            }
        }

        async fn executions(
            State(state): State<Arc<MockAcpState>>,
            Path(_id): Path<String>,
        ) -> Json<Value> {
            let hit = state.execution_hits.fetch_add(1, Ordering::SeqCst);
            let pending = state.pending_polls.load(Ordering::SeqCst);
            if hit < pending {
                Json(serde_json::json!({ "status": "pending" }))
            } else {
                Json(serde_json::json!({ "status": "completed", "result": { "ok": true } }))
            }
        }

        async fn close_session(
            State(state): State<Arc<MockAcpState>>,
            Path(_id): Path<String>,
        ) -> StatusCode {
            state.closed_sessions.fetch_add(1, Ordering::SeqCst);
            StatusCode::NO_CONTENT
        }

        async fn workflows() -> (StatusCode, Json<Value>) {
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "workflow_id": "wf-1" })),
            )
        }

        async fn execute_workflow(Path(_id): Path<String>, Json(body): Json<Value>) -> Json<Value> {
            Json(serde_json::json!({ "result": { "inputs": body["inputs"] } }))
        }

        let app = Router::new()
            .route("/sessions", post(sessions))
            .route("/sessions/:id", delete(close_session))
            .route("/tools", get(tools))
            .route("/messages", post(messages))
            .route("/executions/:id", get(executions))
            .route("/workflows", post(workflows))
            .route("/workflows/:id/execute", post(execute_workflow))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fast_poll_config(url: &str) -> Value {
        serde_json::json!({
            "url": url,
            "agent_id": "tester",
            "poll_interval_ms": 10,
            "max_poll_attempts": 3,
        })
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let adapter = AcpAdapter::new();
        assert!(matches!(
            adapter.discover_tools().await,
            Err(FabricError::NotConnected)
        ));
        assert!(matches!(
            adapter.execute_tool("x", serde_json::json!({})).await,
            Err(FabricError::NotConnected)
        ));
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_and_discovery() {
        let _ = env_logger::builder().is_test(true).try_init();
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        assert_eq!(adapter.session_id().as_deref(), Some("sess-tester"));
        let tools = adapter.discover_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().any(|t| t.name == "billing.charge"));

        adapter.disconnect().await.unwrap();
        assert!(!adapter.is_connected());
        assert_eq!(state.closed_sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pending_then_completed_takes_three_round_trips() {
        let state = Arc::new(MockAcpState::default());
        state.pending_polls.store(1, Ordering::SeqCst);
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        let result = adapter
            .execute_tool("billing.charge", serde_json::json!({ "amount": 5 }))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({ "ok": true }));

        // One POST /messages plus two GET /executions.
        assert_eq!(state.message_hits.load(Ordering::SeqCst), 1);
        assert_eq!(state.execution_hits.load(Ordering::SeqCst), 2);

        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_poll_budget_exhaustion_is_timeout() {
        let state = Arc::new(MockAcpState::default());
        state.pending_polls.store(usize::MAX, Ordering::SeqCst);
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        let err = adapter
            .execute_tool("billing.charge", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::Timeout { .. }));
        assert_eq!(state.execution_hits.load(Ordering::SeqCst), 3);

        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_immediate_result() {
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        let result = adapter
            .execute_tool("instant.echo", serde_json::json!({ "x": 1 }))
            .await
            .unwrap();
        assert_eq!(result["echoed"]["x"], 1);
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();
        let err = adapter
            .execute_tool("no.such", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownTool(_)));
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_workflow_lifecycle() {
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        let workflow_id = adapter
            .create_workflow(serde_json::json!({ "steps": [] }))
            .await
            .unwrap();
        assert_eq!(workflow_id, "wf-1");

        let result = adapter
            .execute_workflow(&workflow_id, serde_json::json!({ "n": 2 }))
            .await
            .unwrap();
        assert_eq!(result["inputs"]["n"], 2);
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_lazy_agent_sessions_closed_on_disconnect() {
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        adapter
            .send_message(
                "billing-agent",
                serde_json::json!({ "hello": true }),
                MessageType::Request,
            )
            .await
            .unwrap();

        adapter.disconnect().await.unwrap();
        // Primary session plus the lazily created agent session.
        assert_eq!(state.closed_sessions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_in_flight_limit_rejects_instead_of_queueing() {
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter
            .connect(serde_json::json!({
                "url": url,
                "agent_id": "tester",
                "max_in_flight": 0,
            }))
            .await
            .unwrap();

        let err = adapter
            .execute_tool("instant.echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::TooManyRequests));
        assert_eq!(state.message_hits.load(Ordering::SeqCst), 0);
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_capability_metadata_carries_session() {
        let state = Arc::new(MockAcpState::default());
        let url = spawn_mock_acp(state.clone()).await;
        let adapter = AcpAdapter::new();
        adapter.connect(fast_poll_config(&url)).await.unwrap();

        let caps = adapter.get_capabilities().await.unwrap();
        let sessions = caps.iter().find(|c| c.name == "sessions").unwrap();
        assert_eq!(
            sessions.metadata.get("session_id"),
            Some(&Value::String("sess-tester".into()))
        );
        adapter.disconnect().await.unwrap();
    }
}
