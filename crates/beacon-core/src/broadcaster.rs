//! Pushes the online roster to every connected client.

use crate::directory::Roster;
use crate::hub::{BroadcastReport, ConnectionHub};
use beacon_protocol::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fans roster snapshots out through the connection hub.
///
/// Every client gets the full roster rather than a diff, so a client that
/// missed an update converges on the next one.
#[derive(Debug)]
pub struct PresenceBroadcaster {
    hub: Arc<ConnectionHub>,
    broadcasts: AtomicU64,
}

impl PresenceBroadcaster {
    /// Create a broadcaster over the given hub.
    #[must_use]
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self {
            hub,
            broadcasts: AtomicU64::new(0),
        }
    }

    /// Send `roster` to every attached connection.
    pub fn broadcast(&self, roster: &Roster) -> BroadcastReport {
        let report = self.hub.broadcast(Frame::online_roster(roster.to_strings()));
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        if report.failed > 0 {
            warn!(
                online = roster.len(),
                delivered = report.delivered,
                failed = report.failed,
                "Roster broadcast reached closed connections"
            );
        } else {
            debug!(
                online = roster.len(),
                delivered = report.delivered,
                "Roster broadcast"
            );
        }
        report
    }

    /// Number of roster broadcasts performed so far.
    #[must_use]
    pub fn broadcast_count(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }
}
