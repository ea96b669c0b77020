//! Participant tracking from presence (awareness) events.
//!
//! The presence channel reports `{added, updated, removed}` peer lists.
//! The participant count is always the size of the current set, never a
//! running sum of deltas, so duplicated or missed events cannot make it
//! drift.
//!
//! ```text
//! added [me, p1]   ──► {me, p1}      count 2
//! added [p2]       ──► {me, p1, p2}  count 3
//! removed [p1]     ──► {me, p2}      count 2
//! removed [p1]     ──► {me, p2}      count 2   (duplicate: no drift)
//! ```
//!
//! Like any other peer, the local participant is counted once the
//! presence channel announces it.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Peer identity on the presence channel, derived from the session id.
pub type PeerId = u64;

/// One presence-change notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub added: Vec<PeerId>,
    pub updated: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

impl PresenceChange {
    pub fn added(peers: impl Into<Vec<PeerId>>) -> Self {
        Self {
            added: peers.into(),
            ..Self::default()
        }
    }

    pub fn removed(peers: impl Into<Vec<PeerId>>) -> Self {
        Self {
            removed: peers.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// What we know about a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantMeta {
    pub first_seen: Instant,
    pub last_seen: Instant,
    /// Presence updates received from this peer.
    pub updates: u32,
}

impl ParticipantMeta {
    fn new(now: Instant) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            updates: 0,
        }
    }
}

type DisplayCallback = Box<dyn Fn(usize) + Send + Sync>;

/// Maintains the participant set of one session.
pub struct PresenceTracker {
    local: PeerId,
    participants: HashMap<PeerId, ParticipantMeta>,
    on_change: Option<DisplayCallback>,
}

impl PresenceTracker {
    /// Start with an empty set. `local` is our own id on the channel.
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            participants: HashMap::new(),
            on_change: None,
        }
    }

    /// Register the display-update callback, fired after every applied change.
    pub fn on_change(&mut self, callback: impl Fn(usize) + Send + Sync + 'static) {
        self.on_change = Some(Box::new(callback));
    }

    /// Apply one presence event and return the new participant count.
    pub fn apply(&mut self, change: &PresenceChange) -> usize {
        let now = Instant::now();

        for peer in &change.added {
            self.participants
                .entry(*peer)
                .and_modify(|meta| meta.last_seen = now)
                .or_insert_with(|| ParticipantMeta::new(now));
        }

        // An update from a peer we never saw join still proves it is present.
        for peer in &change.updated {
            let meta = self
                .participants
                .entry(*peer)
                .or_insert_with(|| ParticipantMeta::new(now));
            meta.last_seen = now;
            meta.updates = meta.updates.saturating_add(1);
        }

        for peer in &change.removed {
            if self.participants.remove(peer).is_none() {
                log::debug!("presence removal of unknown peer {peer}");
            }
        }

        let count = self.participant_count();
        if let Some(callback) = &self.on_change {
            callback(count);
        }
        count
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.participants.contains_key(&peer)
    }

    pub fn participant(&self, peer: PeerId) -> Option<&ParticipantMeta> {
        self.participants.get(&peer)
    }

    /// Remote participants, sorted by id.
    pub fn remote_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .participants
            .keys()
            .copied()
            .filter(|peer| *peer != self.local)
            .collect();
        peers.sort_unstable();
        peers
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// Forget every participant.
    pub fn reset(&mut self) {
        self.participants.clear();
    }
}

impl std::fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("local", &self.local)
            .field("participants", &self.participants.len())
            .finish()
    }
}
