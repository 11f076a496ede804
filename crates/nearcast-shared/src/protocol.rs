//! Wire protocol: control frames exchanged over the peer transport and
//! signals relayed through the rendezvous mailbox.
//!
//! Control frames are JSON text frames; file chunks travel as raw binary
//! frames with no embedded header, distinguished by the transport's
//! wire-level framing type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DeviceId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
}

/// A single chat entry. `id` is globally unique per originating device and
/// is the deduplication key on both host and guest sides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub kind: MessageKind,
    /// Text body for `Text`; a locally resolvable file reference for `File`.
    pub content: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Message {
    pub fn text(content: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: MessageKind::Text,
            content: content.into(),
            device_name: device_name.into(),
            timestamp: Utc::now(),
            file_name: None,
            mime_type: None,
        }
    }

    pub fn file(
        id: Uuid,
        content: impl Into<String>,
        device_name: impl Into<String>,
        metadata: &FileMetadata,
    ) -> Self {
        Self {
            id,
            kind: MessageKind::File,
            content: content.into(),
            device_name: device_name.into(),
            timestamp: Utc::now(),
            file_name: Some(metadata.name.clone()),
            mime_type: Some(metadata.mime_type.clone()),
        }
    }
}

/// Metadata announced in a `FILE_START` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// All structured (non-binary) frames sent over the peer transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ControlFrame {
    /// Handshake sent by both sides right after the transport opens.
    #[serde(rename = "JOIN", rename_all = "camelCase")]
    Join { display_name: String },

    /// Host-authoritative history snapshot, sent once on connect.
    #[serde(rename = "SYNC_HISTORY")]
    SyncHistory { history: Vec<Message> },

    /// Host-computed roster of display names.
    #[serde(rename = "PEER_LIST")]
    PeerList { names: Vec<String> },

    #[serde(rename = "NEW_MESSAGE")]
    NewMessage { data: Message },

    /// Opens a file transfer; raw chunk frames follow. The file id doubles
    /// as the id of the `File` message the receiver materializes on
    /// `FILE_END`, so redelivered transfers deduplicate like any message.
    #[serde(rename = "FILE_START", rename_all = "camelCase")]
    FileStart {
        file_id: Uuid,
        metadata: FileMetadata,
        display_name: String,
    },

    /// Closes the transfer opened by the matching `FILE_START`.
    #[serde(rename = "FILE_END", rename_all = "camelCase")]
    FileEnd { file_id: Uuid },
}

const KNOWN_FRAME_TYPES: [&str; 6] = [
    "JOIN",
    "SYNC_HISTORY",
    "PEER_LIST",
    "NEW_MESSAGE",
    "FILE_START",
    "FILE_END",
];

impl ControlFrame {
    /// Serialize to the JSON text carried in a transport frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON text frame.
    ///
    /// Returns `Ok(None)` for a well-formed frame whose type we do not know,
    /// so newer peers degrade to a no-op instead of an error.
    pub fn decode(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        use serde::de::Error as _;

        let value: serde_json::Value = serde_json::from_str(raw)?;
        match value.get("type").and_then(serde_json::Value::as_str) {
            Some(kind) if KNOWN_FRAME_TYPES.contains(&kind) => {
                Ok(Some(serde_json::from_value(value)?))
            }
            Some(_) => Ok(None),
            None => Err(serde_json::Error::custom("control frame missing type tag")),
        }
    }
}

/// A negotiation message relayed through the mailbox.
///
/// `data` is the transport capability's own payload (a session description
/// or a candidate) and is treated as opaque JSON by this layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub from: DeviceId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalKind {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,
}

/// Result of the mailbox `join` call: who is host in this room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinInfo {
    pub is_host: bool,
    pub host_id: DeviceId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frame_roundtrip() {
        let frame = ControlFrame::NewMessage {
            data: Message::text("hello", "laptop"),
        };

        let raw = frame.encode().unwrap();
        let restored = ControlFrame::decode(&raw).unwrap().unwrap();
        assert_eq!(frame, restored);
    }

    #[test]
    fn test_frame_wire_field_names() {
        let file_id = Uuid::new_v4();
        let frame = ControlFrame::FileStart {
            file_id,
            metadata: FileMetadata {
                name: "photo.png".into(),
                size: 1234,
                mime_type: "image/png".into(),
            },
            display_name: "phone".into(),
        };

        let raw = frame.encode().unwrap();
        assert!(raw.contains("\"type\":\"FILE_START\""));
        assert!(raw.contains(&format!("\"fileId\":\"{file_id}\"")));
        assert!(raw.contains("\"mimeType\":\"image/png\""));
        assert!(raw.contains("\"displayName\":\"phone\""));
    }

    #[test]
    fn test_unknown_frame_type_is_ignored() {
        let raw = r#"{"type":"SHINY_NEW_THING","payload":42}"#;
        assert_eq!(ControlFrame::decode(raw).unwrap(), None);
    }

    #[test]
    fn test_missing_type_tag_is_malformed() {
        assert!(ControlFrame::decode(r#"{"payload":42}"#).is_err());
        assert!(ControlFrame::decode("not json at all").is_err());
    }

    #[test]
    fn test_signal_kind_wire_names() {
        let signal = Signal {
            from: DeviceId::from("dev-abc"),
            kind: SignalKind::IceCandidate,
            data: serde_json::json!({ "candidate": "udp 1 2" }),
        };

        let raw = serde_json::to_string(&signal).unwrap();
        assert!(raw.contains("\"type\":\"ice-candidate\""));

        let restored: Signal = serde_json::from_str(&raw).unwrap();
        assert_eq!(restored, signal);
    }
}
