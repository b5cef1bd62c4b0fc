//! # beacon-core
//!
//! Realtime presence for the Beacon chat server.
//!
//! - **PresenceDirectory** - Which user is reachable on which connection
//! - **ConnectionHub** - Outbound queue of every live connection
//! - **PresenceBroadcaster** - Pushes the online roster to all clients
//! - **MessageRouter** - Live push when the recipient is online
//! - **Presence** - Connect/disconnect lifecycle tying the above together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│  Presence   │────▶│  Directory  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │                   ▲
//!        │                   ▼                   │
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │     Hub     │◀────│ Broadcaster │     │   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```

pub mod broadcaster;
pub mod directory;
pub mod hub;
pub mod identity;
pub mod presence;
pub mod router;

pub use broadcaster::PresenceBroadcaster;
pub use directory::{PresenceDirectory, Registration, Roster};
pub use hub::{BroadcastReport, ConnectionHub, DeliveryError, Outbox};
pub use identity::{ConnectionId, HandshakeParams, IdentityResolver, QueryParamResolver, UserId};
pub use presence::{Presence, PresenceStats, Session};
pub use router::{Delivery, MessageRouter};
