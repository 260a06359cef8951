// Message types and the newline-delimited JSON protocol spoken to clients

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Privilege level of a connected session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    #[serde(rename = "system")]
    SuperAdmin,
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
            Role::SuperAdmin => write!(f, "system"),
        }
    }
}

/// What a message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[serde(rename = "user")]
    Chat,
    System,
    RoleUpdate,
}

/// A chat event. Immutable once built; cloned freely during fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Connection identifier of the sender
    #[serde(rename = "sender")]
    pub sender_id: String,
    /// Display name at the time of sending
    #[serde(rename = "sender_name")]
    pub sender_name: String,
    #[serde(rename = "content")]
    pub body: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Sender's role, or the new role for a `RoleUpdate`
    pub role: Role,
    /// Local wall-clock time formatted `HH:MM`
    #[serde(rename = "time")]
    pub timestamp: String,
}

/// Sender id used for messages generated by the server itself
pub const SYSTEM_SENDER: &str = "system";

impl Message {
    /// Create a chat message stamped with the current local time
    pub fn chat(sender_id: impl Into<String>, sender_name: impl Into<String>, role: Role, body: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            body: body.into(),
            kind: MessageKind::Chat,
            role,
            timestamp: now_hhmm(),
        }
    }

    /// Create a server notice
    pub fn system(body: impl Into<String>) -> Self {
        Self {
            sender_id: SYSTEM_SENDER.to_string(),
            sender_name: SYSTEM_SENDER.to_string(),
            body: body.into(),
            kind: MessageKind::System,
            role: Role::User,
            timestamp: now_hhmm(),
        }
    }

    /// Tell a client its privilege level changed
    pub fn role_update(role: Role) -> Self {
        Self {
            sender_id: SYSTEM_SENDER.to_string(),
            sender_name: SYSTEM_SENDER.to_string(),
            body: String::new(),
            kind: MessageKind::RoleUpdate,
            role,
            timestamp: now_hhmm(),
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n'); // Add newline delimiter
        Ok(bytes)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Current local time as `HH:MM`
pub fn now_hhmm() -> String {
    Local::now().format("%H:%M").to_string()
}

/// A line received from a client.
///
/// Clients may send JSON `{"type": ..., "content": ..., "name": ...}`; anything
/// that is not valid JSON is treated as plain chat text. The `type` field is
/// accepted and ignored: every client line is routed by its content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ClientFrame {
    /// Parse a raw line, falling back to plain text
    pub fn parse(line: &str) -> Self {
        match serde_json::from_str::<ClientFrame>(line) {
            Ok(frame) => frame,
            Err(_) => Self {
                content: line.to_string(),
                name: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_shape() {
        let msg = Message::chat("10.0.0.2:5000", "alice", Role::Admin, "hi");
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(*bytes.last().unwrap(), b'\n');

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["sender"], "10.0.0.2:5000");
        assert_eq!(value["sender_name"], "alice");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["type"], "user");
        assert_eq!(value["role"], "admin");

        let back = Message::from_bytes(&bytes).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_role_update_wire_name() {
        let msg = Message::role_update(Role::SuperAdmin);
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "role_update");
        assert_eq!(value["role"], "system");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = now_hhmm();
        assert_eq!(ts.len(), 5);
        assert_eq!(&ts[2..3], ":");
    }

    #[test]
    fn test_client_frame_fallback() {
        let frame = ClientFrame::parse(r#"{"type":"user","content":"hello","name":"bob"}"#);
        assert_eq!(frame.content, "hello");
        assert_eq!(frame.name.as_deref(), Some("bob"));

        // An unfamiliar type does not change routing
        let typed = ClientFrame::parse(r#"{"type":"file","content":"/nick carol"}"#);
        assert_eq!(typed.content, "/nick carol");

        let plain = ClientFrame::parse("just text {");
        assert_eq!(plain.content, "just text {");
        assert!(plain.name.is_none());
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::SuperAdmin > Role::Admin);
        assert!(Role::Admin > Role::User);
    }
}
