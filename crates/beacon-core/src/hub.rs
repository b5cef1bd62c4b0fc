//! Outbound side of every live connection.
//!
//! Each connection task attaches to the hub and drains its own queue into
//! the socket, so pushing a frame never waits on network I/O.

use crate::identity::ConnectionId;
use beacon_protocol::Frame;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receiving end of a connection's outbound queue.
pub type Outbox = mpsc::UnboundedReceiver<Arc<Frame>>;

/// Errors when pushing a frame to a single connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// No connection with this id is attached.
    #[error("Connection not attached: {0}")]
    NotAttached(ConnectionId),

    /// The connection task has gone away.
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Result of a fan-out to all attached connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued for.
    pub delivered: usize,
    /// Connections whose queue was already closed.
    pub failed: usize,
}

/// Registry of outbound queues, one per live connection.
#[derive(Debug, Default)]
pub struct ConnectionHub {
    outboxes: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<Frame>>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection and return the queue its task should drain.
    ///
    /// Attaching an id twice replaces the earlier queue.
    pub fn attach(&self, connection: ConnectionId) -> Outbox {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = %connection, "Attached to hub");
        self.outboxes.insert(connection, tx);
        rx
    }

    /// Detach a connection. Returns `true` if it was attached.
    pub fn detach(&self, connection: &ConnectionId) -> bool {
        let removed = self.outboxes.remove(connection).is_some();
        if removed {
            debug!(connection = %connection, "Detached from hub");
        }
        removed
    }

    /// Whether a connection is attached.
    #[must_use]
    pub fn is_attached(&self, connection: &ConnectionId) -> bool {
        self.outboxes.contains_key(connection)
    }

    /// Queue a frame for a single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or its task has exited.
    pub fn send(&self, connection: &ConnectionId, frame: Frame) -> Result<(), DeliveryError> {
        self.send_shared(connection, Arc::new(frame))
    }

    /// Queue an already shared frame for a single connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or its task has exited.
    pub fn send_shared(
        &self,
        connection: &ConnectionId,
        frame: Arc<Frame>,
    ) -> Result<(), DeliveryError> {
        let tx = self
            .outboxes
            .get(connection)
            .ok_or_else(|| DeliveryError::NotAttached(connection.clone()))?;
        tx.send(frame)
            .map_err(|_| DeliveryError::Closed(connection.clone()))
    }

    /// Queue a frame for every attached connection.
    ///
    /// A closed queue is counted and skipped; it never stops the fan-out.
    pub fn broadcast(&self, frame: Frame) -> BroadcastReport {
        let frame = Arc::new(frame);
        let mut report = BroadcastReport::default();

        for entry in self.outboxes.iter() {
            if entry.value().send(Arc::clone(&frame)).is_ok() {
                report.delivered += 1;
            } else {
                debug!(connection = %entry.key(), "Broadcast skipped closed connection");
                report.failed += 1;
            }
        }

        trace!(
            frame_type = ?frame.frame_type(),
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast"
        );
        report
    }

    /// Number of attached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Whether no connection is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_send_detach() {
        let hub = ConnectionHub::new();
        let id = ConnectionId::new("c1");
        let mut rx = hub.attach(id.clone());
        assert!(hub.is_attached(&id));

        hub.send(&id, Frame::ack(1)).unwrap();
        assert_eq!(*rx.try_recv().unwrap(), Frame::ack(1));

        assert!(hub.detach(&id));
        assert!(!hub.detach(&id));
        assert_eq!(
            hub.send(&id, Frame::ack(2)),
            Err(DeliveryError::NotAttached(id))
        );
    }

    #[test]
    fn test_send_to_closed_connection() {
        let hub = ConnectionHub::new();
        let id = ConnectionId::new("c1");
        drop(hub.attach(id.clone()));

        assert_eq!(hub.send(&id, Frame::ping()), Err(DeliveryError::Closed(id)));
    }

    #[test]
    fn test_broadcast_survives_closed_connection() {
        let hub = ConnectionHub::new();
        let mut rx1 = hub.attach(ConnectionId::new("c1"));
        drop(hub.attach(ConnectionId::new("c2")));
        let mut rx3 = hub.attach(ConnectionId::new("c3"));

        let report = hub.broadcast(Frame::online_roster(vec!["a".into()]));
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 2,
                failed: 1
            }
        );
        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_frames_arrive_in_order() {
        let hub = ConnectionHub::new();
        let id = ConnectionId::new("c1");
        let mut rx = hub.attach(id.clone());

        for i in 0..5 {
            hub.send(&id, Frame::ack(i)).unwrap();
        }
        for i in 0..5 {
            assert_eq!(*rx.recv().await.unwrap(), Frame::ack(i));
        }
    }
}
