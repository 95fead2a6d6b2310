//! W3C DID documents and `did:web` resolution.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{FabricError, FabricResult};

/// JSON-LD context for DID core documents.
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
/// Service type carrying agent capabilities.
pub const AGENT_SERVICE_TYPE: &str = "AgentService";

// ---------------------------------------------------------------------------
// Document structures
// ---------------------------------------------------------------------------

/// One capability advertised by an agent service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub controller: String,
    #[serde(rename = "publicKeyMultibase")]
    pub public_key_multibase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidService {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityEntry>,
}

/// W3C DID core document, reduced to the members ANP uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "verificationMethod", default)]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<DidService>,
}

impl DidDocument {
    /// The `AgentService` entry, if the document has one.
    pub fn agent_service(&self) -> Option<&DidService> {
        self.service.iter().find(|s| s.kind == AGENT_SERVICE_TYPE)
    }

    /// The short agent name: the segment after `agents:` in the DID.
    pub fn agent_name(&self) -> &str {
        match self.id.rsplit_once(':') {
            Some((_, name)) => name,
            None => &self.id,
        }
    }
}

// ---------------------------------------------------------------------------
// Minting
// ---------------------------------------------------------------------------

/// Mint a local `did:web` document with one agent service.
///
/// The verification key is a freshly generated placeholder, multibase
/// base64url encoded; real deployments replace it with a managed key.
pub fn mint_did_document(
    authority: &str,
    agent_name: &str,
    endpoint: &str,
    capabilities: Vec<CapabilityEntry>,
) -> DidDocument {
    let did = format!("did:web:{authority}:agents:{agent_name}");
    let mut key_bytes = [0u8; 32];
    key_bytes[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    key_bytes[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    let public_key_multibase = format!("u{}", URL_SAFE_NO_PAD.encode(key_bytes));

    DidDocument {
        context: vec![DID_CONTEXT.to_string()],
        id: did.clone(),
        verification_method: vec![VerificationMethod {
            id: format!("{did}#keys-1"),
            kind: "Ed25519VerificationKey2020".to_string(),
            controller: did.clone(),
            public_key_multibase,
        }],
        service: vec![DidService {
            id: format!("{did}#agent-service"),
            kind: AGENT_SERVICE_TYPE.to_string(),
            service_endpoint: endpoint.to_string(),
            description: "ANP Agent Service".to_string(),
            capabilities,
        }],
    }
}

// ---------------------------------------------------------------------------
// WebDidResolver
// ---------------------------------------------------------------------------

/// Resolver for the `did:web` method backed by a resolver/registry
/// service.
pub struct WebDidResolver {
    resolver_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl WebDidResolver {
    pub fn new(resolver_url: impl Into<String>, timeout_secs: u64) -> FabricResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FabricError::TransportUnavailable(e.to_string()))?;
        Ok(Self {
            resolver_url: resolver_url.into(),
            client,
            timeout_secs,
        })
    }

    /// Resolve one DID to its document.
    ///
    /// Accepts both a bare document and the standard resolution envelope
    /// with a `didDocument` member.
    pub async fn resolve(&self, did: &str) -> FabricResult<DidDocument> {
        let url = format!(
            "{}/1.0/identifiers/{did}",
            self.resolver_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs))?;
        if !response.status().is_success() {
            return Err(FabricError::remote(format!(
                "DID resolution for '{did}' failed: HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid resolution response: {e}")))?;
        let document = body.get("didDocument").cloned().unwrap_or(body);
        serde_json::from_value(document)
            .map_err(|e| FabricError::remote(format!("malformed DID document for '{did}': {e}")))
    }

    /// List agent DIDs known to the registry.
    pub async fn list_agents(&self) -> FabricResult<Vec<String>> {
        let url = format!("{}/agents", self.resolver_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FabricError::from_http(e, self.timeout_secs))?;
        if !response.status().is_success() {
            return Err(FabricError::remote(format!(
                "agent registry query failed: HTTP {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| FabricError::remote(format!("invalid registry response: {e}")))?;
        let dids = body
            .get("agents")
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| body.as_array().cloned())
            .unwrap_or_default();
        Ok(dids
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_document_shape() {
        let doc = mint_did_document(
            "example.com",
            "researcher",
            "https://example.com/agents/researcher",
            vec![CapabilityEntry {
                name: "search".into(),
                description: "Search the web".into(),
                parameters: Value::Null,
            }],
        );

        assert_eq!(doc.id, "did:web:example.com:agents:researcher");
        assert_eq!(doc.context, vec![DID_CONTEXT.to_string()]);
        assert_eq!(doc.verification_method.len(), 1);
        assert_eq!(
            doc.verification_method[0].kind,
            "Ed25519VerificationKey2020"
        );
        assert!(doc.verification_method[0]
            .public_key_multibase
            .starts_with('u'));

        let service = doc.agent_service().unwrap();
        assert_eq!(service.kind, AGENT_SERVICE_TYPE);
        assert_eq!(
            service.service_endpoint,
            "https://example.com/agents/researcher"
        );
        assert_eq!(service.capabilities.len(), 1);
        assert_eq!(doc.agent_name(), "researcher");
    }

    #[test]
    fn test_document_serde_uses_did_core_field_names() {
        let doc = mint_did_document("example.com", "a", "http://e", vec![]);
        let value = serde_json::to_value(&doc).unwrap();
        assert!(value.get("@context").is_some());
        assert!(value.get("verificationMethod").is_some());
        assert!(value["service"][0].get("serviceEndpoint").is_some());
        assert_eq!(value["verificationMethod"][0]["type"], "Ed25519VerificationKey2020");
    }

    #[test]
    fn test_distinct_keys_per_mint() {
        let a = mint_did_document("e.com", "a", "http://e", vec![]);
        let b = mint_did_document("e.com", "a", "http://e", vec![]);
        assert_ne!(
            a.verification_method[0].public_key_multibase,
            b.verification_method[0].public_key_multibase
        );
    }
}
