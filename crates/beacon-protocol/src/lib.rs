//! # beacon-protocol
//!
//! Wire protocol for the Beacon presence server.
//!
//! Browsers speak JSON over WebSocket text messages; native clients may opt
//! into length-prefixed MessagePack over binary messages. Both carry the same
//! [`Frame`] enum.
//!
//! ## Frame Types
//!
//! - `Connected` - Handshake result with the assigned connection id
//! - `OnlineRoster` - Full list of online users, pushed on every presence change
//! - `Send` / `NewMessage` - Direct message request and its live delivery
//! - `Ack` / `Error` - Acknowledgments and errors
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Frame};
//!
//! let frame = Frame::online_roster(vec!["alice".to_string(), "bob".to_string()]);
//!
//! let text = codec::encode_json(&frame).unwrap();
//! assert_eq!(codec::decode_json(&text).unwrap(), frame);
//!
//! let binary = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&binary).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, Encoded, ProtocolError, WireFormat};
pub use frames::{error_codes, Frame, FrameType};
pub use version::{Version, PROTOCOL_VERSION};
