//! # peershare-bridge: buffer ↔ shared-document reconciliation
//!
//! Keeps a host editor's text buffer and a replicated `yrs` text in
//! agreement while several participants edit the same document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  change events   ┌───────────────────────┐   encoded updates  ┌────────────┐
//! │ EditorHost   │ ───────────────► │ SessionController     │ ─────────────────► │ Transport  │
//! │ (buffer)     │ ◄─────────────── │  LocalChangeTranslator│ ◄───────────────── │ (Connector)│
//! └──────────────┘  atomic edits    │  EchoGuard            │   NetworkEvents    └────────────┘
//!                                   │  RemoteDeltaTranslator│
//!                                   │  RemoteApplyQueue     │
//!                                   │  PresenceTracker      │
//!                                   └──────────┬────────────┘
//!                                              ▼
//!                                        ┌───────────┐
//!                                        │ yrs Doc   │
//!                                        └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`op`]: Operations, change batches, UTF-16 helpers
//! - [`local`]: Buffer change events → local batches
//! - [`remote`]: Shared-document deltas → remote batches
//! - [`echo`]: Per-operation echo suppression
//! - [`queue`]: Serialized, retried application of remote batches
//! - [`presence`]: Participant set from presence events
//! - [`session`]: Session lifecycle and the driver task
//! - [`host`]: Editor boundary and an in-memory buffer
//! - [`transport`]: Network boundary and offline queue
//! - [`relay`]: In-process room relay
//! - [`config`]: TOML-backed configuration

pub mod config;
pub mod echo;
pub mod error;
pub mod host;
pub mod local;
pub mod op;
pub mod presence;
pub mod queue;
pub mod relay;
pub mod remote;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::BridgeConfig;
pub use echo::{EchoGuard, EchoVerdict, PendingEcho};
pub use error::{ConfigError, SessionError, TranslationError};
pub use host::{AtomicEdit, EditDescriptor, EditorHost, MemoryBuffer};
pub use local::LocalChangeTranslator;
pub use op::{BatchOrigin, ChangeBatch, Operation};
pub use presence::{PeerId, PresenceChange, PresenceTracker};
pub use queue::{ApplyOutcome, RemoteApplyQueue, RemoteApplyState, RetryPolicy};
pub use relay::LocalRelay;
pub use remote::{DeltaEntry, RemoteDeltaTranslator};
pub use session::{ResyncSource, SessionController, SessionEvent, SessionStats, SessionStatus};
pub use transport::{Connection, ConnectionStatus, Connector, NetworkEvent, OfflineQueue, Transport, TransportError};
