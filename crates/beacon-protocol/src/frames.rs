//! Frame types for the Beacon protocol.
//!
//! Every event exchanged over a live connection is a [`Frame`]. The `type`
//! field carries the event kind so the same enum serializes to JSON for
//! browsers and to MessagePack for binary clients.

use serde::{Deserialize, Serialize};

/// Error codes carried by [`Frame::Error`].
pub mod error_codes {
    /// The inbound data could not be decoded into a frame.
    pub const INVALID_FRAME: u16 = 1001;
    /// A frame that only the server may send was received from a client.
    pub const UNEXPECTED_FRAME: u16 = 1002;
    /// The `to` field of a `send` frame is not a usable user id.
    pub const INVALID_RECIPIENT: u16 = 1003;
    /// Only connections that resolved to a user may send messages.
    pub const UNAUTHENTICATED: u16 = 1004;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connected = 0x01,
    OnlineRoster = 0x02,
    Send = 0x03,
    NewMessage = 0x04,
    Ack = 0x05,
    Error = 0x06,
    Ping = 0x07,
    Pong = 0x08,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connected),
            0x02 => Ok(FrameType::OnlineRoster),
            0x03 => Ok(FrameType::Send),
            0x04 => Ok(FrameType::NewMessage),
            0x05 => Ok(FrameType::Ack),
            0x06 => Ok(FrameType::Error),
            0x07 => Ok(FrameType::Ping),
            0x08 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

impl FrameType {
    /// Whether a client is allowed to send this frame type to the server.
    #[must_use]
    pub fn is_client_frame(self) -> bool {
        matches!(self, FrameType::Send | FrameType::Ping | FrameType::Pong)
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Resolved user identity, absent for anonymous connections.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        /// Protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// The full set of users that currently hold a live connection.
    #[serde(rename = "online_roster")]
    OnlineRoster {
        /// Online user ids, in the order they came online.
        users: Vec<String>,
    },

    /// Client request to push a direct message to another user.
    #[serde(rename = "send")]
    Send {
        /// Optional request ID for acknowledgment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Recipient user id.
        to: String,
        /// Opaque message body, owned by the messaging layer.
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// A direct message pushed to its recipient.
    #[serde(rename = "new_message")]
    NewMessage {
        /// Sender user id, absent when the sender was anonymous.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        /// Opaque message body.
        #[serde(default)]
        payload: serde_json::Value,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`error_codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connected { .. } => FrameType::Connected,
            Frame::OnlineRoster { .. } => FrameType::OnlineRoster,
            Frame::Send { .. } => FrameType::Send,
            Frame::NewMessage { .. } => FrameType::NewMessage,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(
        connection_id: impl Into<String>,
        user_id: Option<String>,
        version: u8,
        heartbeat: u32,
    ) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            user_id,
            version,
            heartbeat,
        }
    }

    /// Create a new OnlineRoster frame.
    #[must_use]
    pub fn online_roster(users: Vec<String>) -> Self {
        Frame::OnlineRoster { users }
    }

    /// Create a new Send frame.
    #[must_use]
    pub fn send(to: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Send {
            id: None,
            to: to.into(),
            payload,
        }
    }

    /// Create a new Send frame with ID for acknowledgment.
    #[must_use]
    pub fn send_with_ack(id: u64, to: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Send {
            id: Some(id),
            to: to.into(),
            payload,
        }
    }

    /// Create a new NewMessage frame.
    #[must_use]
    pub fn new_message(from: Option<String>, payload: serde_json::Value) -> Self {
        Frame::NewMessage { from, payload }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let roster = Frame::online_roster(vec!["a".into()]);
        assert_eq!(roster.frame_type(), FrameType::OnlineRoster);

        let send = Frame::send("bob", json!({"text": "hi"}));
        assert_eq!(send.frame_type(), FrameType::Send);
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x02), Ok(FrameType::OnlineRoster));
        assert_eq!(u8::from(FrameType::NewMessage), 0x04);
        assert!(FrameType::try_from(0x00).is_err());
        assert!(FrameType::try_from(0x09).is_err());
    }

    #[test]
    fn test_client_frames() {
        assert!(FrameType::Send.is_client_frame());
        assert!(FrameType::Ping.is_client_frame());
        assert!(!FrameType::OnlineRoster.is_client_frame());
        assert!(!FrameType::NewMessage.is_client_frame());
    }

    #[test]
    fn test_roster_json_shape() {
        let frame = Frame::online_roster(vec!["u1".into(), "u2".into()]);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "online_roster", "users": ["u1", "u2"]}));
    }

    #[test]
    fn test_send_without_id_or_payload() {
        let frame: Frame = serde_json::from_str(r#"{"type":"send","to":"bob"}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Send {
                id: None,
                to: "bob".into(),
                payload: serde_json::Value::Null,
            }
        );
    }
}
