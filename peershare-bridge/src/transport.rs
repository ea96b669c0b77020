//! Boundary to the network layer.
//!
//! The bridge never speaks a wire protocol itself. A [`Connector`] binds a
//! room to a [`Connection`]: a [`Transport`] that carries encoded document
//! updates out, plus a stream of [`NetworkEvent`]s coming in.
//!
//! ```text
//!            send_update(bytes)
//! Session ─────────────────────────► Transport ──► peers
//!    ▲
//!    │  Status / Update / Presence / Error / Closed
//!    └────────────────────────────── events ◄───── peers
//! ```

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::presence::{PeerId, PresenceChange};

/// Connection status as reported by the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Events delivered by the network layer.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Status(ConnectionStatus),
    /// An encoded update (v1) produced by another participant.
    Update(Vec<u8>),
    Presence(PresenceChange),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// Why a transport could not take an update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport destroyed")]
    Destroyed,
    #[error("offline queue full ({0} updates)")]
    QueueFull(usize),
    #[error("connection refused: {0}")]
    Refused(String),
}

/// Outgoing half of a connection.
pub trait Transport: Send {
    /// Hand an encoded update to the network layer.
    fn send_update(&mut self, update: Vec<u8>) -> Result<(), TransportError>;

    /// Disconnect and release the connection. Idempotent.
    fn destroy(&mut self);
}

/// A live connection to one room.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, events: mpsc::UnboundedReceiver<NetworkEvent>) -> Self {
        Self { transport, events }
    }
}

/// Opens connections for the session controller.
pub trait Connector: Send + Sync {
    fn connect(&self, room: &str, peer: PeerId) -> Result<Connection, TransportError>;
}

/// Updates a severed peer sent, held until its link is restored.
///
/// Bounded by update count; a full queue refuses further updates.
#[derive(Debug)]
pub struct OfflineQueue {
    held: VecDeque<Vec<u8>>,
    capacity: usize,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            held: VecDeque::new(),
            capacity,
        }
    }

    /// Hold `update`. Returns `false` when the queue is full.
    pub fn enqueue(&mut self, update: Vec<u8>) -> bool {
        if self.held.len() >= self.capacity {
            return false;
        }
        self.held.push_back(update);
        true
    }

    /// Release every held update, oldest first.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.held.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_queue_drains_in_order() {
        let mut queue = OfflineQueue::new(2);
        assert!(queue.enqueue(vec![1, 2, 3]));
        assert!(queue.enqueue(vec![4]));
        assert!(!queue.enqueue(vec![5]));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.drain(), vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(queue.len(), 0);
        assert!(queue.enqueue(vec![5]));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
