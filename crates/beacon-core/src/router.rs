//! Message routing: live push when the recipient is online, nothing otherwise.
//!
//! Persistence belongs to the messaging layer. The router only decides
//! whether a copy can be pushed right now; an offline recipient picks the
//! message up from history on their next fetch.

use crate::directory::PresenceDirectory;
use crate::hub::ConnectionHub;
use crate::identity::{ConnectionId, UserId};
use beacon_protocol::Frame;
use std::sync::Arc;
use tracing::{debug, warn};

/// How a message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the recipient's live connection.
    Pushed(ConnectionId),
    /// No live connection; left to the persistence layer.
    Deferred,
}

impl Delivery {
    /// Whether the message went out live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(self, Delivery::Pushed(_))
    }
}

/// Resolves recipients to live connections.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    directory: Arc<PresenceDirectory>,
    hub: Arc<ConnectionHub>,
}

impl MessageRouter {
    /// Create a router over a directory and the hub used to push.
    #[must_use]
    pub fn new(directory: Arc<PresenceDirectory>, hub: Arc<ConnectionHub>) -> Self {
        Self { directory, hub }
    }

    /// The live connection of `recipient`, if any.
    #[must_use]
    pub fn route(&self, recipient: &UserId) -> Option<ConnectionId> {
        self.directory.lookup(recipient)
    }

    /// Push a message to `recipient` if they are online.
    ///
    /// A failed push is logged and reported as [`Delivery::Deferred`]; it
    /// does not change the recipient's presence.
    pub fn deliver(
        &self,
        from: Option<&UserId>,
        recipient: &UserId,
        payload: serde_json::Value,
    ) -> Delivery {
        let Some(connection) = self.route(recipient) else {
            debug!(recipient = %recipient, "Recipient offline, message deferred");
            return Delivery::Deferred;
        };

        let frame = Frame::new_message(from.map(|u| u.as_str().to_string()), payload);
        match self.hub.send(&connection, frame) {
            Ok(()) => {
                debug!(recipient = %recipient, connection = %connection, "Message pushed");
                Delivery::Pushed(connection)
            }
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "Live push failed, message deferred");
                Delivery::Deferred
            }
        }
    }
}
