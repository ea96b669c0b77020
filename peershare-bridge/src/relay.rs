//! In-process relay connecting sessions that live in the same process.
//!
//! Each room keeps an authoritative document so late joiners receive the
//! full state, and fans updates out to every other online peer:
//!
//! ```text
//! Session A ──┐                              ┌──► Session B
//!             ├── RelayRoom (doc, peers) ────┤
//! Session C ──┘                              └──► Session A / C
//! ```
//!
//! A peer's link can be severed and restored to exercise the bridge's
//! connection handling. While severed, the peer's outgoing updates wait in
//! an [`OfflineQueue`] and are replayed on restore.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use yrs::updates::decoder::Decode;
use yrs::{Doc, GetString, ReadTxn, StateVector, Transact, Update};

use crate::presence::{PeerId, PresenceChange};
use crate::transport::{
    Connection, ConnectionStatus, Connector, NetworkEvent, OfflineQueue, Transport, TransportError,
};

/// Close code sent to a peer whose link was severed (abnormal closure).
const SEVERED_CLOSE_CODE: u16 = 1006;

struct RelayPeer {
    events: mpsc::UnboundedSender<NetworkEvent>,
    online: bool,
    offline: OfflineQueue,
}

impl RelayPeer {
    fn send(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }
}

struct RelayRoom {
    doc: Doc,
    peers: HashMap<PeerId, RelayPeer>,
}

impl RelayRoom {
    fn new() -> Self {
        Self {
            doc: Doc::new(),
            peers: HashMap::new(),
        }
    }

    fn online_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.online)
            .map(|(id, _)| *id)
            .collect();
        peers.sort_unstable();
        peers
    }

    fn broadcast_except(&self, from: PeerId, event: &NetworkEvent) {
        for (id, peer) in &self.peers {
            if *id != from && peer.online {
                peer.send(event.clone());
            }
        }
    }

    fn state_update(&self) -> Vec<u8> {
        self.doc
            .transact()
            .encode_state_as_update_v1(&StateVector::default())
    }

    /// Merge an update into the room document and fan it out.
    fn relay_update(&self, from: PeerId, update: Vec<u8>) {
        let decoded = match Update::decode_v1(&update) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("relay: dropping undecodable update from peer {from}: {e}");
                return;
            }
        };
        if let Err(e) = self.doc.transact_mut().apply_update(decoded) {
            log::warn!("relay: failed to merge update from peer {from}: {e}");
            return;
        }
        self.broadcast_except(from, &NetworkEvent::Update(update));
    }

    /// Send a (re)joining peer everything it needs to catch up.
    fn welcome(&self, peer: PeerId) {
        let Some(target) = self.peers.get(&peer) else {
            return;
        };
        target.send(NetworkEvent::Status(ConnectionStatus::Connecting));
        target.send(NetworkEvent::Status(ConnectionStatus::Connected));
        target.send(NetworkEvent::Update(self.state_update()));
        target.send(NetworkEvent::Presence(PresenceChange::added(self.online_peers())));
        self.broadcast_except(peer, &NetworkEvent::Presence(PresenceChange::added(vec![peer])));
    }
}

#[derive(Default)]
struct Hub {
    rooms: HashMap<String, RelayRoom>,
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Room-based fan-out between sessions of one process.
#[derive(Clone)]
pub struct LocalRelay {
    hub: Arc<Mutex<Hub>>,
    offline_capacity: usize,
}

impl Default for LocalRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::with_offline_capacity(10_000)
    }

    /// Bound the number of updates a severed peer may buffer.
    pub fn with_offline_capacity(offline_capacity: usize) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub::default())),
            offline_capacity,
        }
    }

    /// Cut a peer's link as if its socket dropped.
    pub fn sever(&self, room: &str, peer: PeerId) -> bool {
        let mut hub = lock(&self.hub);
        let Some(relay_room) = hub.rooms.get_mut(room) else {
            return false;
        };
        let Some(target) = relay_room.peers.get_mut(&peer) else {
            return false;
        };
        if !target.online {
            return false;
        }
        target.online = false;
        target.send(NetworkEvent::Closed {
            code: Some(SEVERED_CLOSE_CODE),
            reason: "link severed".to_string(),
        });
        target.send(NetworkEvent::Status(ConnectionStatus::Disconnected));
        relay_room.broadcast_except(peer, &NetworkEvent::Presence(PresenceChange::removed(vec![peer])));
        log::info!("relay: severed peer {peer} in room `{room}`");
        true
    }

    /// Bring a severed peer back and replay what it sent while offline.
    pub fn restore(&self, room: &str, peer: PeerId) -> bool {
        let mut hub = lock(&self.hub);
        let Some(relay_room) = hub.rooms.get_mut(room) else {
            return false;
        };
        let queued = match relay_room.peers.get_mut(&peer) {
            Some(target) if !target.online => {
                target.online = true;
                target.offline.drain()
            }
            _ => return false,
        };
        log::info!("relay: restored peer {peer} in room `{room}`, replaying {} updates", queued.len());
        for update in queued {
            relay_room.relay_update(peer, update);
        }
        relay_room.welcome(peer);
        true
    }

    /// Current text of `name` in the room's authoritative document.
    pub fn room_text(&self, room: &str, name: &str) -> Option<String> {
        let hub = lock(&self.hub);
        let relay_room = hub.rooms.get(room)?;
        let text = relay_room.doc.get_or_insert_text(name);
        let txn = relay_room.doc.transact();
        Some(text.get_string(&txn))
    }

    /// Online peers of a room, sorted.
    pub fn peers(&self, room: &str) -> Vec<PeerId> {
        lock(&self.hub)
            .rooms
            .get(room)
            .map(RelayRoom::online_peers)
            .unwrap_or_default()
    }
}

impl Connector for LocalRelay {
    fn connect(&self, room: &str, peer: PeerId) -> Result<Connection, TransportError> {
        let mut hub = lock(&self.hub);
        let relay_room = hub.rooms.entry(room.to_string()).or_insert_with(RelayRoom::new);
        if relay_room.peers.contains_key(&peer) {
            return Err(TransportError::Refused(format!(
                "peer {peer} is already connected to `{room}`"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        relay_room.peers.insert(
            peer,
            RelayPeer {
                events: tx,
                online: true,
                offline: OfflineQueue::new(self.offline_capacity),
            },
        );
        relay_room.welcome(peer);
        log::info!("relay: peer {peer} joined room `{room}`");

        let transport = RelayTransport {
            hub: self.hub.clone(),
            room: room.to_string(),
            peer,
            destroyed: false,
        };
        Ok(Connection::new(Box::new(transport), rx))
    }
}

/// Outgoing half of a relay connection.
struct RelayTransport {
    hub: Arc<Mutex<Hub>>,
    room: String,
    peer: PeerId,
    destroyed: bool,
}

impl Transport for RelayTransport {
    fn send_update(&mut self, update: Vec<u8>) -> Result<(), TransportError> {
        if self.destroyed {
            return Err(TransportError::Destroyed);
        }
        let mut hub = lock(&self.hub);
        let relay_room = hub.rooms.get_mut(&self.room).ok_or(TransportError::Destroyed)?;
        let sender = relay_room.peers.get_mut(&self.peer).ok_or(TransportError::Destroyed)?;

        if !sender.online {
            if !sender.offline.enqueue(update) {
                return Err(TransportError::QueueFull(sender.offline.len()));
            }
            return Ok(());
        }

        relay_room.relay_update(self.peer, update);
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        let mut hub = lock(&self.hub);
        if let Some(relay_room) = hub.rooms.get_mut(&self.room) {
            if let Some(peer) = relay_room.peers.remove(&self.peer) {
                peer.send(NetworkEvent::Status(ConnectionStatus::Disconnected));
                relay_room.broadcast_except(
                    self.peer,
                    &NetworkEvent::Presence(PresenceChange::removed(vec![self.peer])),
                );
            }
        }
        log::info!("relay: peer {} left room `{}`", self.peer, self.room);
    }
}

impl Drop for RelayTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}
