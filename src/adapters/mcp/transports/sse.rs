//! SSE/HTTP transport for remote MCP servers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::adapters::mcp::transports::{McpTransport, TransportKind};
use crate::errors::{FabricError, FabricResult};

/// Transport that posts JSON-RPC requests to a remote MCP endpoint.
///
/// Responses may come back as plain JSON or as a `text/event-stream`
/// body (streamable servers); in the latter case the correlated `data:`
/// event is extracted from the stream.
pub struct SseTransport {
    /// Endpoint URL.
    pub url: String,
    /// Extra request headers.
    pub headers: HashMap<String, String>,
    timeout_secs: u64,
    client: RwLock<Option<reqwest::Client>>,
    next_id: AtomicU64,
}

impl SseTransport {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>, timeout_secs: u64) -> Self {
        Self {
            url: url.into(),
            headers,
            timeout_secs,
            client: RwLock::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn header_map(&self) -> FabricResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| FabricError::ConfigInvalid(format!("bad header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FabricError::ConfigInvalid(format!("bad header value for '{key}': {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// Extract the correlated JSON-RPC message from an event-stream body.
    fn parse_event_stream(body: &str, id: u64) -> Option<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .filter_map(|data| serde_json::from_str::<Value>(data.trim()).ok())
            .find(|message| message.get("id").and_then(Value::as_u64) == Some(id))
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn connected(&self) -> bool {
        self.client.read().is_some()
    }

    async fn connect(&self) -> FabricResult<()> {
        let mut guard = self.client.write();
        if guard.is_some() {
            return Err(FabricError::AlreadyConnected);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .default_headers(self.header_map()?)
            .build()
            .map_err(|e| FabricError::TransportUnavailable(e.to_string()))?;
        *guard = Some(client);
        log::info!("sse transport ready: {}", self.url);
        Ok(())
    }

    async fn disconnect(&self) -> FabricResult<()> {
        self.client.write().take();
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> FabricResult<Value> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or(FabricError::NotConnected)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(FabricError::AuthRejected(format!(
                "{} rejected request: HTTP {status}",
                self.url
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs))?;
        if !status.is_success() {
            return Err(FabricError::remote_with_body(
                format!("MCP request failed: HTTP {status}"),
                Value::String(body),
            ));
        }

        let message = if content_type.starts_with("text/event-stream") {
            Self::parse_event_stream(&body, id).ok_or_else(|| {
                FabricError::remote(format!("no correlated event for request {id}"))
            })?
        } else {
            serde_json::from_str(&body)
                .map_err(|e| FabricError::remote(format!("invalid JSON-RPC response: {e}")))?
        };

        if let Some(error) = message.get("error") {
            return Err(FabricError::remote_with_body(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("MCP server error")
                    .to_string(),
                error.clone(),
            ));
        }
        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    }

    fn identifier(&self) -> String {
        format!("sse:{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_stream_correlation() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"ok\":false}}\n\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n";
        let message = SseTransport::parse_event_stream(body, 7).unwrap();
        assert_eq!(message["result"]["ok"], true);
        assert!(SseTransport::parse_event_stream(body, 9).is_none());
    }

    #[tokio::test]
    async fn test_request_not_connected() {
        let transport = SseTransport::new("http://localhost:1/mcp", HashMap::new(), 5);
        let err = transport
            .request("tools/list", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, FabricError::NotConnected));
    }

    #[tokio::test]
    async fn test_double_connect_rejected() {
        let transport = SseTransport::new("http://localhost:1/mcp", HashMap::new(), 5);
        transport.connect().await.unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, FabricError::AlreadyConnected));
        transport.disconnect().await.unwrap();
        transport.connect().await.unwrap();
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad\nname".to_string(), "x".to_string());
        let transport = SseTransport::new("http://localhost:1/mcp", headers, 5);
        assert!(matches!(
            transport.header_map(),
            Err(FabricError::ConfigInvalid(_))
        ));
    }
}
