//! ACP wire message structures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// ACP message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
    ToolCall,
    ToolResponse,
}

/// One ACP message.
///
/// Ids are fresh UUIDs; metadata carries the session id and an RFC 3339
/// UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcpMessage {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub sender: String,
    pub receiver: String,
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AcpMessage {
    /// Build a message with fresh id and session/timestamp metadata.
    pub fn new(
        kind: MessageType,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        content: Value,
        session_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            sender: sender.into(),
            receiver: receiver.into(),
            content,
            metadata: Some(serde_json::json!({
                "session_id": session_id,
                "timestamp": Utc::now().to_rfc3339(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::ToolCall).unwrap(),
            "\"tool_call\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::Notification).unwrap(),
            "\"notification\""
        );
        let back: MessageType = serde_json::from_str("\"tool_response\"").unwrap();
        assert_eq!(back, MessageType::ToolResponse);
    }

    #[test]
    fn test_message_shape() {
        let message = AcpMessage::new(
            MessageType::ToolCall,
            "agent-1",
            "system",
            serde_json::json!({ "tool": "charge" }),
            "sess-1",
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["sender"], "agent-1");
        assert_eq!(value["receiver"], "system");
        assert_eq!(value["metadata"]["session_id"], "sess-1");
        // Fresh UUID per message.
        let other = AcpMessage::new(
            MessageType::ToolCall,
            "agent-1",
            "system",
            serde_json::json!({}),
            "sess-1",
        );
        assert_ne!(message.id, other.id);
    }
}
