//! Session lifecycle and the driver task that wires every component together.
//!
//! ```text
//!                      ┌────────────────────── SessionDriver (one tokio task) ──────────────────────┐
//! host changes ──────► │ LocalChangeTranslator ─► EchoGuard ─► yrs txn (local origin) ─► Transport │ ──► peers
//!                      │                                                                            │
//! peers ─► NetworkEvent│ Update ─► yrs txn (remote origin) ─► observer ─► RemoteDeltaTranslator     │
//!                      │                                                     │                      │
//!                      │                                      RemoteApplyQueue ─► EditorHost::apply │
//!                      │ Presence ─► PresenceTracker ─► DisplayUpdate                               │
//!                      └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The driver owns all session state and handles one input at a time. No
//! handler awaits: the in-flight remote apply is one of the inputs polled by
//! the select loop, so local edits keep flowing while it retries.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;
use yrs::updates::decoder::Decode;
use yrs::{
    Doc, GetString, Observable, OffsetKind, Options, Origin, Subscription, Text, TextRef, Transact,
    TransactionMut, Update,
};

use crate::config::BridgeConfig;
use crate::echo::EchoGuard;
use crate::error::{SessionError, TranslationError};
use crate::host::{EditDescriptor, EditorHost};
use crate::local::LocalChangeTranslator;
use crate::op::{check_descending_bounds, utf16_len, Operation};
use crate::presence::{PeerId, PresenceTracker};
use crate::queue::{ApplyOutcome, RemoteApplyQueue, RetryPolicy};
use crate::remote::{DeltaEntry, RemoteDeltaTranslator};
use crate::transport::{ConnectionStatus, Connector, NetworkEvent, Transport};

/// Transaction origin of every write the bridge makes on behalf of the buffer.
const LOCAL_ORIGIN: &str = "peershare-local";
/// Transaction origin of updates merged from the network.
const REMOTE_ORIGIN: &str = "peershare-remote";

/// Which side wins a resynchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResyncSource {
    /// Overwrite the buffer with the shared document.
    Crdt,
    /// Overwrite the shared document with the buffer.
    Buffer,
}

/// Running counters of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub local_batches_forwarded: u64,
    pub echoes_suppressed: u64,
    /// Genuine local batches forwarded while a remote batch was being applied.
    pub concurrent_local_edits: u64,
    pub remote_batches_applied: u64,
    pub apply_retries: u64,
    pub echo_timeouts: u64,
}

/// Snapshot of the bridge, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_active: bool,
    pub participant_count: usize,
    pub desynchronized: bool,
    pub connection: Option<ConnectionStatus>,
    pub room: Option<String>,
    /// Host document bound to the session.
    pub document: Option<String>,
    pub session_id: Option<Uuid>,
    pub stats: SessionStats,
}

/// Notifications for the host's UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started { room: String, session_id: Uuid },
    Stopped { room: String },
    /// The participant count changed (or was re-announced).
    DisplayUpdate { participant_count: usize },
    ConnectionStatus(ConnectionStatus),
    /// Buffer and shared document no longer agree; see [`SessionController::resync`].
    Desynchronized(SessionError),
    Resynced(ResyncSource),
    /// A recoverable error; the session keeps running.
    Error(SessionError),
}

enum Command {
    Resync(ResyncSource, oneshot::Sender<()>),
    Stop,
}

struct ActiveSession {
    room: String,
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Starts and stops collaboration sessions for one editor host.
///
/// At most one session is active at a time.
pub struct SessionController {
    config: BridgeConfig,
    host: Arc<dyn EditorHost>,
    connector: Arc<dyn Connector>,
    status: Arc<watch::Sender<SessionStatus>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(config: BridgeConfig, host: Arc<dyn EditorHost>, connector: Arc<dyn Connector>) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let (events, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            host,
            connector,
            status: Arc::new(status),
            events,
            event_rx: Some(event_rx),
            active: None,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.event_rx.take()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.task.is_finished())
    }

    /// Join `room` (the configured default when blank) and start syncing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, room: &str) -> Result<Uuid, SessionError> {
        if let Some(active) = &self.active {
            if !active.task.is_finished() {
                return Err(SessionError::AlreadyActive {
                    room: active.room.clone(),
                });
            }
            self.active = None;
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let room = match room.trim() {
            "" => self.config.default_room.clone(),
            name => name.to_string(),
        };
        let session_id = Uuid::new_v4();
        let peer: PeerId = session_id.as_u64_pair().0;

        let doc = Doc::with_options(Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        });
        let text = doc.get_or_insert_text(self.config.text_name.as_str());

        let connection = self
            .connector
            .connect(&room, peer)
            .map_err(|e| SessionError::Connection {
                room: room.clone(),
                message: e.to_string(),
            })?;

        let (delta_tx, deltas) = mpsc::unbounded_channel();
        let subscription = text.observe(move |txn, event| {
            if is_local(txn) {
                return;
            }
            let delta: Vec<DeltaEntry> = event.delta(txn).iter().map(DeltaEntry::from_yrs).collect();
            if !delta.is_empty() {
                let _ = delta_tx.send(delta);
            }
        });

        let mut presence = PresenceTracker::new(peer);
        let display = self.events.clone();
        presence.on_change(move |participant_count| {
            let _ = display.send(SessionEvent::DisplayUpdate { participant_count });
        });

        let driver = SessionDriver {
            room: room.clone(),
            config: self.config.clone(),
            _subscription: subscription,
            doc,
            text,
            transport: connection.transport,
            network: connection.events,
            changes: self.host.subscribe_changes(),
            deltas,
            local: LocalChangeTranslator::new(self.host.document_length()),
            remote: RemoteDeltaTranslator::new(),
            echo: EchoGuard::new(self.config.echo_timeout()),
            queue: RemoteApplyQueue::new(self.host.clone(), RetryPolicy::from_config(&self.config)),
            host: self.host.clone(),
            presence,
            desynchronized: false,
            unverified: false,
            stats: SessionStats::default(),
            status: self.status.clone(),
            events: self.events.clone(),
        };

        let document = self.host.document_id();
        self.status.send_replace(SessionStatus {
            session_active: true,
            room: Some(room.clone()),
            document: document.clone(),
            session_id: Some(session_id),
            ..SessionStatus::default()
        });
        let _ = self.events.send(SessionEvent::Started {
            room: room.clone(),
            session_id,
        });
        log::info!(
            "session {session_id} started in room `{room}` as peer {peer} for {}",
            document.as_deref().unwrap_or("an unnamed document")
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(driver.run(command_rx));
        self.active = Some(ActiveSession { room, commands, task });
        Ok(session_id)
    }

    /// Leave the room and release every session resource. No-op when inactive.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.commands.send(Command::Stop);
        if let Err(e) = active.task.await {
            log::warn!("session driver for room `{}` ended abnormally: {e}", active.room);
            mark_inactive(&self.status);
        }
    }

    /// Force buffer and shared document back into agreement.
    pub async fn resync(&self, source: ResyncSource) -> Result<(), SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NotActive)?;
        let (reply, done) = oneshot::channel();
        active
            .commands
            .send(Command::Resync(source, reply))
            .map_err(|_| SessionError::DriverGone)?;
        done.await.map_err(|_| SessionError::DriverGone)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.commands.send(Command::Stop);
        }
    }
}

fn is_local(txn: &TransactionMut) -> bool {
    txn.origin() == Some(&Origin::from(LOCAL_ORIGIN))
}

fn mark_inactive(status: &watch::Sender<SessionStatus>) {
    status.send_modify(|s| {
        s.session_active = false;
        s.participant_count = 0;
        s.desynchronized = false;
        s.connection = None;
        s.room = None;
        s.document = None;
        s.session_id = None;
    });
}

// ─── Driver ─────────────────────────────────────────────────────

struct SessionDriver {
    room: String,
    config: BridgeConfig,
    // Dropped before the document.
    _subscription: Subscription,
    doc: Doc,
    text: TextRef,
    transport: Box<dyn Transport>,
    network: mpsc::UnboundedReceiver<NetworkEvent>,
    changes: mpsc::UnboundedReceiver<Vec<EditDescriptor>>,
    deltas: mpsc::UnboundedReceiver<Vec<DeltaEntry>>,
    local: LocalChangeTranslator,
    remote: RemoteDeltaTranslator,
    echo: EchoGuard,
    queue: RemoteApplyQueue,
    host: Arc<dyn EditorHost>,
    presence: PresenceTracker,
    desynchronized: bool,
    /// Something was applied or rebased since buffer and document were last compared.
    unverified: bool,
    stats: SessionStats,
    status: Arc<watch::Sender<SessionStatus>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionDriver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut sweep = tokio::time::interval(self.config.echo_sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Resync(source, reply)) => {
                        self.resync(source);
                        let _ = reply.send(());
                    }
                    Some(Command::Stop) | None => break,
                },
                Some(edits) = self.changes.recv() => self.on_local_change(edits),
                outcome = self.queue.next_outcome() => self.on_apply_outcome(outcome),
                Some(delta) = self.deltas.recv() => self.on_remote_delta(delta),
                Some(event) = self.network.recv() => self.on_network_event(event),
                _ = sweep.tick() => self.sweep_echoes(),
            }
        }

        self.shutdown();
    }

    // ─── Local → shared document ────────────────────────────────

    fn on_local_change(&mut self, edits: Vec<EditDescriptor>) {
        if self.desynchronized {
            self.local.observe_unchecked(&edits);
            return;
        }

        let batch = match self.local.translate(&edits) {
            Ok(batch) => batch,
            Err(source) => {
                self.local.observe_unchecked(&edits);
                self.desynchronize(SessionError::Translation {
                    room: self.room.clone(),
                    sequence_id: None,
                    source,
                });
                return;
            }
        };

        let verdict = self.echo.try_consume(&batch.operations);
        self.stats.echoes_suppressed += verdict.suppressed.len() as u64;
        if verdict.genuine.is_empty() {
            if !verdict.suppressed.is_empty() {
                log::debug!("room `{}`: local batch {} was an echo", self.room, batch.sequence_id);
                self.publish();
                self.verify_settled();
            }
            return;
        }

        let mut operations = verdict.rebased_genuine();
        if self.queue.is_applying() || !self.echo.is_empty() {
            // The document holds remote text the buffer has not reported yet.
            operations = self.queue.rebase_local(operations, &mut self.echo);
            self.unverified = true;
            if operations.is_empty() {
                log::debug!(
                    "room `{}`: local batch {} only touched text already removed remotely",
                    self.room,
                    batch.sequence_id
                );
                self.verify_settled();
                return;
            }
        }

        match self.write_local(&operations) {
            Ok(update) => {
                self.stats.local_batches_forwarded += 1;
                if self.queue.is_applying() {
                    self.stats.concurrent_local_edits += 1;
                }
                log::debug!(
                    "room `{}`: forwarding local batch {} ({} ops)",
                    self.room,
                    batch.sequence_id,
                    operations.len()
                );
                self.send_update(update);
                self.publish();
                self.verify_settled();
            }
            Err(source) => self.desynchronize(SessionError::Translation {
                room: self.room.clone(),
                sequence_id: Some(batch.sequence_id),
                source,
            }),
        }
    }

    /// Write descending operations into the shared text in one transaction.
    fn write_local(&self, operations: &[Operation]) -> Result<Vec<u8>, TranslationError> {
        let mut txn = self.doc.transact_mut_with(Origin::from(LOCAL_ORIGIN));
        check_descending_bounds(operations, self.text.len(&txn))?;
        for op in operations {
            if op.delete_len > 0 {
                self.text.remove_range(&mut txn, op.offset, op.delete_len);
            }
            if !op.insert.is_empty() {
                self.text.insert(&mut txn, op.offset, &op.insert);
            }
        }
        Ok(txn.encode_update_v1())
    }

    fn send_update(&mut self, update: Vec<u8>) {
        if let Err(e) = self.transport.send_update(update) {
            self.report(SessionError::Connection {
                room: self.room.clone(),
                message: e.to_string(),
            });
        }
    }

    // ─── Shared document → buffer ───────────────────────────────

    fn apply_remote_update(&mut self, bytes: &[u8]) {
        let result = Update::decode_v1(bytes)
            .map_err(|e| e.to_string())
            .and_then(|update| {
                let mut txn = self.doc.transact_mut_with(Origin::from(REMOTE_ORIGIN));
                txn.apply_update(update).map_err(|e| e.to_string())
            });
        if let Err(message) = result {
            self.report(SessionError::RemoteUpdate {
                room: self.room.clone(),
                message,
            });
        }
    }

    fn on_remote_delta(&mut self, delta: Vec<DeltaEntry>) {
        if self.desynchronized {
            log::debug!("room `{}`: dropping remote delta while desynchronized", self.room);
            return;
        }
        match self.remote.translate(&delta) {
            Ok(batch) if batch.is_empty() => {}
            Ok(batch) => {
                log::debug!(
                    "room `{}`: queueing remote batch {} ({} ops)",
                    self.room,
                    batch.sequence_id,
                    batch.len()
                );
                self.queue.push(batch, &mut self.echo);
                self.unverified = true;
            }
            Err(source) => self.desynchronize(SessionError::Translation {
                room: self.room.clone(),
                sequence_id: None,
                source,
            }),
        }
    }

    fn on_apply_outcome(&mut self, outcome: ApplyOutcome) {
        let outcome = self.queue.complete(outcome, &mut self.echo);
        self.stats.apply_retries += u64::from(outcome.attempts.saturating_sub(1));

        if outcome.applied {
            self.stats.remote_batches_applied += 1;
            self.publish();
            self.verify_settled();
            return;
        }

        self.desynchronize(SessionError::ApplyFailure {
            room: self.room.clone(),
            sequence_id: outcome.sequence_id,
            attempts: outcome.attempts,
        });
    }

    fn sweep_echoes(&mut self) {
        let expired = self.echo.expire(Instant::now());
        if expired.is_empty() {
            return;
        }
        self.stats.echo_timeouts += expired.len() as u64;
        for sequence_id in expired {
            self.report(SessionError::EchoTimeout {
                room: self.room.clone(),
                sequence_id,
            });
        }
        self.publish();
        self.verify_settled();
    }

    /// Compare buffer and shared text once nothing is left in flight.
    fn verify_settled(&mut self) {
        if !self.unverified
            || self.desynchronized
            || self.queue.is_applying()
            || !self.echo.is_empty()
            || !self.changes.is_empty()
            || !self.deltas.is_empty()
        {
            return;
        }
        self.unverified = false;

        let buffer = self.host.document_text();
        let shared = self.text.get_string(&self.doc.transact());
        if buffer != shared {
            self.desynchronize(SessionError::Diverged {
                room: self.room.clone(),
                buffer_length: utf16_len(&buffer),
                shared_length: utf16_len(&shared),
            });
        }
    }

    // ─── Network ────────────────────────────────────────────────

    fn on_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::Status(status) => {
                log::info!("room `{}`: connection {status}", self.room);
                if status == ConnectionStatus::Disconnected {
                    // Membership is unknown until the link announces it again.
                    self.presence.reset();
                    self.emit(SessionEvent::DisplayUpdate { participant_count: 0 });
                }
                self.status.send_modify(|s| s.connection = Some(status));
                self.emit(SessionEvent::ConnectionStatus(status));
                self.publish();
            }
            NetworkEvent::Update(bytes) => self.apply_remote_update(&bytes),
            NetworkEvent::Presence(change) => {
                let count = self.presence.apply(&change);
                log::debug!("room `{}`: {count} participants", self.room);
                self.publish();
            }
            NetworkEvent::Error(message) => {
                self.status
                    .send_modify(|s| s.connection = Some(ConnectionStatus::Error));
                self.report(SessionError::Connection {
                    room: self.room.clone(),
                    message,
                });
            }
            NetworkEvent::Closed { code, reason } => self.report(SessionError::ConnectionClosed {
                room: self.room.clone(),
                code,
                reason,
            }),
        }
    }

    // ─── Desync & resync ────────────────────────────────────────

    fn desynchronize(&mut self, error: SessionError) {
        log::warn!("desynchronized: {error}");
        self.desynchronized = true;
        self.queue.clear(&mut self.echo);
        self.emit(SessionEvent::Desynchronized(error));
        self.publish();

        if self.config.auto_resync {
            self.resync(ResyncSource::Crdt);
        }
    }

    fn resync(&mut self, source: ResyncSource) {
        self.queue.clear(&mut self.echo);
        let buffer = self.host.document_text();

        match source {
            ResyncSource::Crdt => {
                let shared = self.text.get_string(&self.doc.transact());
                self.local.reset(utf16_len(&buffer));
                if shared != buffer {
                    let batch = self
                        .remote
                        .batch(vec![Operation::new(0, utf16_len(&buffer), shared)]);
                    self.queue.push(batch, &mut self.echo);
                    self.unverified = true;
                }
            }
            ResyncSource::Buffer => {
                let update = {
                    let mut txn = self.doc.transact_mut_with(Origin::from(LOCAL_ORIGIN));
                    let shared = self.text.get_string(&txn);
                    if shared == buffer {
                        None
                    } else {
                        let length = self.text.len(&txn);
                        if length > 0 {
                            self.text.remove_range(&mut txn, 0, length);
                        }
                        self.text.insert(&mut txn, 0, &buffer);
                        Some(txn.encode_update_v1())
                    }
                };
                if let Some(update) = update {
                    self.send_update(update);
                }
                self.local.reset(utf16_len(&buffer));
            }
        }

        self.desynchronized = false;
        log::info!("room `{}`: resynchronized from {source:?}", self.room);
        self.emit(SessionEvent::Resynced(source));
        self.publish();
    }

    // ─── Reporting ──────────────────────────────────────────────

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn report(&self, error: SessionError) {
        log::warn!("{error}");
        self.emit(SessionEvent::Error(error));
    }

    fn publish(&self) {
        let participant_count = self.presence.participant_count();
        self.status.send_modify(|s| {
            s.participant_count = participant_count;
            s.desynchronized = self.desynchronized;
            s.stats = self.stats.clone();
        });
    }

    fn shutdown(&mut self) {
        self.transport.destroy();
        self.queue.clear(&mut self.echo);
        self.echo.clear();
        self.presence.reset();
        mark_inactive(&self.status);
        log::info!("session in room `{}` stopped", self.room);
        self.emit(SessionEvent::Stopped {
            room: self.room.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryBuffer;
    use crate::relay::LocalRelay;
    use crate::transport::TransportError;

    fn controller(buffer: &MemoryBuffer, relay: &LocalRelay) -> SessionController {
        SessionController::new(
            BridgeConfig::default(),
            Arc::new(buffer.clone()),
            Arc::new(relay.clone()),
        )
    }

    struct RefusingConnector;

    impl Connector for RefusingConnector {
        fn connect(&self, _room: &str, _peer: PeerId) -> Result<crate::transport::Connection, TransportError> {
            Err(TransportError::Refused("offline".into()))
        }
    }

    #[test]
    fn test_initial_status() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let controller = controller(&buffer, &LocalRelay::new());
        let status = controller.status();
        assert!(!status.session_active);
        assert_eq!(status.participant_count, 0);
        assert!(!controller.is_active());
    }

    #[test]
    fn test_start_requires_runtime() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let mut controller = controller(&buffer, &LocalRelay::new());
        assert_eq!(controller.start("room"), Err(SessionError::NoRuntime));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let mut controller = controller(&buffer, &LocalRelay::new());
        controller.start("room").unwrap();
        assert_eq!(
            controller.start("other"),
            Err(SessionError::AlreadyActive { room: "room".into() })
        );
        controller.stop().await;
        assert!(!controller.status().session_active);
    }

    #[tokio::test]
    async fn test_blank_room_uses_default() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let relay = LocalRelay::new();
        let mut controller = controller(&buffer, &relay);
        controller.start("  ").unwrap();
        assert_eq!(controller.status().room.as_deref(), Some("vscode-peershare-room"));
        assert_eq!(relay.peers("vscode-peershare-room").len(), 1);
        controller.stop().await;
        assert!(relay.peers("vscode-peershare-room").is_empty());
    }

    #[tokio::test]
    async fn test_status_records_document() {
        let buffer = MemoryBuffer::new("mem://notes.txt", "");
        let mut controller = controller(&buffer, &LocalRelay::new());
        controller.start("room").unwrap();
        assert_eq!(controller.status().document.as_deref(), Some("mem://notes.txt"));
        controller.stop().await;
        assert_eq!(controller.status().document, None);
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let mut controller =
            SessionController::new(BridgeConfig::default(), Arc::new(buffer), Arc::new(RefusingConnector));
        let err = controller.start("room").unwrap_err();
        assert!(matches!(err, SessionError::Connection { .. }));
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn test_resync_requires_session() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let controller = controller(&buffer, &LocalRelay::new());
        assert_eq!(
            controller.resync(ResyncSource::Crdt).await,
            Err(SessionError::NotActive)
        );
    }

    #[tokio::test]
    async fn test_stop_when_inactive_is_noop() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let mut controller = controller(&buffer, &LocalRelay::new());
        controller.stop().await;
        assert!(!controller.status().session_active);
    }

    #[tokio::test]
    async fn test_events_bracket_session() {
        let buffer = MemoryBuffer::new("mem://a", "");
        let mut controller = controller(&buffer, &LocalRelay::new());
        let mut events = controller.take_event_rx().unwrap();
        assert!(controller.take_event_rx().is_none());

        let session_id = controller.start("room").unwrap();
        controller.stop().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.first(),
            Some(&SessionEvent::Started {
                room: "room".into(),
                session_id
            })
        );
        assert_eq!(seen.last(), Some(&SessionEvent::Stopped { room: "room".into() }));
    }
}
