//! Connection lifecycle: ties connect/disconnect events to the directory and
//! the roster broadcast.
//!
//! Every mutation, the snapshot taken after it, and the fan-out of that
//! snapshot run under one gate. Two clients may see updates at different
//! times, but no client ever receives an older roster after a newer one.

use crate::broadcaster::PresenceBroadcaster;
use crate::directory::{PresenceDirectory, Registration, Roster};
use crate::hub::{ConnectionHub, Outbox};
use crate::identity::{
    ConnectionId, HandshakeParams, IdentityResolver, QueryParamResolver, UserId,
};
use crate::router::{Delivery, MessageRouter};
use beacon_protocol::Frame;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// A connection known to the presence service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The connection.
    pub connection_id: ConnectionId,
    /// Who it belongs to, `None` for anonymous connections.
    pub user_id: Option<UserId>,
}

impl Session {
    /// Whether the connection resolved to a user.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }
}

/// Presence statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceStats {
    /// Users with a live connection.
    pub online_users: usize,
    /// Attached connections, including anonymous and superseded ones.
    pub connections: usize,
    /// Roster broadcasts since start.
    pub broadcasts: u64,
}

/// The presence service shared by all connection tasks.
pub struct Presence {
    directory: Arc<PresenceDirectory>,
    hub: Arc<ConnectionHub>,
    broadcaster: PresenceBroadcaster,
    router: MessageRouter,
    resolver: Arc<dyn IdentityResolver>,
    gate: Mutex<()>,
}

impl Presence {
    /// Create a presence service resolving identities from the default
    /// `userId` query parameter.
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(QueryParamResolver::default()))
    }

    /// Create a presence service with a custom identity resolver.
    #[must_use]
    pub fn with_resolver(resolver: Arc<dyn IdentityResolver>) -> Self {
        let directory = Arc::new(PresenceDirectory::new());
        let hub = Arc::new(ConnectionHub::new());
        info!("Creating presence service");
        Self {
            broadcaster: PresenceBroadcaster::new(Arc::clone(&hub)),
            router: MessageRouter::new(Arc::clone(&directory), Arc::clone(&hub)),
            directory,
            hub,
            resolver,
            gate: Mutex::new(()),
        }
    }

    /// Handle a new connection.
    ///
    /// The connection is attached before it is registered, so the roster
    /// broadcast triggered by its own registration includes it and reaches
    /// it. Anonymous connections get the current roster once instead.
    pub fn connect(
        &self,
        connection_id: ConnectionId,
        params: &HandshakeParams,
    ) -> (Session, Outbox) {
        let user_id = self.resolver.resolve(params);
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        let outbox = self.hub.attach(connection_id.clone());

        match &user_id {
            Some(user) => {
                let registration = self.directory.register(user.clone(), connection_id.clone());
                if let Registration::Rebound { previous } = &registration {
                    debug!(
                        user = %user,
                        connection = %connection_id,
                        previous = %previous,
                        "User reconnected, older connection superseded"
                    );
                }
                if registration == Registration::Unchanged {
                    // Nobody else sees a change, but the fresh outbox needs a roster.
                    self.send_roster(&connection_id);
                } else {
                    self.broadcaster.broadcast(&self.directory.snapshot());
                }
            }
            None => {
                debug!(connection = %connection_id, "Anonymous connection");
                self.send_roster(&connection_id);
            }
        }

        (
            Session {
                connection_id,
                user_id,
            },
            outbox,
        )
    }

    /// Send the current roster to a single connection.
    fn send_roster(&self, connection_id: &ConnectionId) {
        let roster = Frame::online_roster(self.directory.snapshot().to_strings());
        if let Err(e) = self.hub.send(connection_id, roster) {
            debug!(connection = %connection_id, error = %e, "Roster not delivered");
        }
    }

    /// Handle a closed connection.
    ///
    /// Returns `true` if the user went offline as a result. Disconnecting a
    /// superseded or anonymous connection changes nothing and broadcasts
    /// nothing.
    pub fn disconnect(&self, session: &Session) -> bool {
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        self.hub.detach(&session.connection_id);

        let Some(user) = &session.user_id else {
            return false;
        };
        if !self.directory.deregister(user, &session.connection_id) {
            return false;
        }

        self.broadcaster.broadcast(&self.directory.snapshot());
        true
    }

    /// The live connection of `recipient`, if any.
    #[must_use]
    pub fn route(&self, recipient: &UserId) -> Option<ConnectionId> {
        self.router.route(recipient)
    }

    /// Push a message to `recipient` if they are online.
    pub fn deliver(
        &self,
        from: Option<&UserId>,
        recipient: &UserId,
        payload: serde_json::Value,
    ) -> Delivery {
        self.router.deliver(from, recipient, payload)
    }

    /// The current roster.
    #[must_use]
    pub fn roster(&self) -> Roster {
        self.directory.snapshot()
    }

    /// Whether `user` has a live connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.directory.is_online(user)
    }

    /// The underlying directory.
    #[must_use]
    pub fn directory(&self) -> &PresenceDirectory {
        &self.directory
    }

    /// The connection hub, for pushing frames to a single connection.
    #[must_use]
    pub fn hub(&self) -> &ConnectionHub {
        &self.hub
    }

    /// Presence statistics.
    #[must_use]
    pub fn stats(&self) -> PresenceStats {
        PresenceStats {
            online_users: self.directory.len(),
            connections: self.hub.len(),
            broadcasts: self.broadcaster.broadcast_count(),
        }
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::new()
    }
}
