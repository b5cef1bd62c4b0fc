//! The presence directory: which user is reachable on which connection.
//!
//! The directory holds at most one connection per user. A newer connection
//! for the same user replaces the older binding, and removal is keyed on the
//! connection that is going away so a late disconnect from a superseded
//! connection never evicts its successor.

use crate::identity::{ConnectionId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::{debug, trace};

/// Outcome of [`PresenceDirectory::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The user had no live connection before.
    Inserted,
    /// The user was bound to another connection, which is now superseded.
    Rebound {
        /// The connection that no longer owns the entry.
        previous: ConnectionId,
    },
    /// The user was already bound to this connection.
    Unchanged,
}

#[derive(Debug)]
struct Binding {
    connection: ConnectionId,
    /// Position in the roster, fixed when the user first came online.
    seq: u64,
}

#[derive(Debug, Default)]
struct Entries {
    bindings: HashMap<UserId, Binding>,
    next_seq: u64,
}

/// Authoritative in-memory registry of users reachable for live push.
#[derive(Debug, Default)]
pub struct PresenceDirectory {
    entries: RwLock<Entries>,
}

impl PresenceDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to `connection`, replacing any previous binding.
    pub fn register(&self, user: UserId, connection: ConnectionId) -> Registration {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(binding) = entries.bindings.get_mut(&user) {
            if binding.connection == connection {
                trace!(user = %user, connection = %connection, "Already registered");
                return Registration::Unchanged;
            }
            let previous = std::mem::replace(&mut binding.connection, connection);
            debug!(
                user = %user,
                connection = %binding.connection,
                previous = %previous,
                "Presence rebound to newer connection"
            );
            return Registration::Rebound { previous };
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        debug!(user = %user, connection = %connection, "Presence registered");
        entries.bindings.insert(user, Binding { connection, seq });
        Registration::Inserted
    }

    /// Remove the binding for `user` if it is still owned by `connection`.
    ///
    /// Returns `true` if an entry was removed. Unknown users and connections
    /// that were already superseded are a no-op.
    pub fn deregister(&self, user: &UserId, connection: &ConnectionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        let owner = entries.bindings.get(user).map(|b| b.connection.clone());
        match owner {
            Some(owner) if owner == *connection => {
                entries.bindings.remove(user);
                debug!(user = %user, connection = %connection, "Presence deregistered");
                true
            }
            Some(owner) => {
                debug!(
                    user = %user,
                    connection = %connection,
                    owner = %owner,
                    "Ignoring disconnect of superseded connection"
                );
                false
            }
            None => false,
        }
    }

    /// The live connection registered for `user`, if any.
    #[must_use]
    pub fn lookup(&self, user: &UserId) -> Option<ConnectionId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bindings
            .get(user)
            .map(|b| b.connection.clone())
    }

    /// Whether `user` currently has a live connection.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bindings
            .contains_key(user)
    }

    /// Copy of the current roster, in the order users came online.
    #[must_use]
    pub fn snapshot(&self) -> Roster {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut online: Vec<(u64, UserId)> = entries
            .bindings
            .iter()
            .map(|(user, binding)| (binding.seq, user.clone()))
            .collect();
        drop(entries);

        online.sort_unstable_by_key(|(seq, _)| *seq);
        Roster {
            users: online.into_iter().map(|(_, user)| user).collect(),
        }
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bindings
            .len()
    }

    /// Whether no user is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The set of online users at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    users: Vec<UserId>,
}

impl Roster {
    /// Online users, in the order they came online.
    #[must_use]
    pub fn users(&self) -> &[UserId] {
        &self.users
    }

    /// Whether `user` is part of this roster.
    #[must_use]
    pub fn contains(&self, user: &UserId) -> bool {
        self.users.contains(user)
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// User ids as plain strings, as they go on the wire.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.users.iter().map(|u| u.as_str().to_string()).collect()
    }
}
