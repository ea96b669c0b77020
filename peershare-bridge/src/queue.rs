//! Serialized application of remote batches to the buffer.
//!
//! ```text
//!            push(B1) push(B2) push(B3)
//!                │       │       │
//!                ▼       ▼       ▼
//!          ┌──────────────────────────┐
//!          │ FIFO  [B2, B3]           │
//!          └────────────┬─────────────┘
//!                       │ start_next (only when Idle)
//!                       ▼
//!   Idle ───────► Applying { B1 } ── apply_edit + retries ──► complete()
//!    ▲                                                          │
//!    └──────────────── FIFO empty ◄──── next batch ◄────────────┘
//! ```
//!
//! The retry loop lives inside the in-flight future. Dropping that future
//! (via [`RemoteApplyQueue::clear`]) cancels any pending retry at once.
//! Each attempt reads the edit from a `watch` channel, so a batch re-measured
//! during its backoff is retried in its new shape.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::config::BridgeConfig;
use crate::echo::EchoGuard;
use crate::host::{AtomicEdit, EditorHost};
use crate::op::{transform, ChangeBatch, Operation, Tie};

/// Whether a remote batch is currently being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApplyState {
    Idle,
    Applying { sequence_id: u64 },
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            max_attempts: config.max_apply_attempts.max(1),
            initial_backoff: config.initial_backoff(),
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` already failed.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

/// Result of applying one batch, retries included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub sequence_id: u64,
    pub attempts: u32,
    pub applied: bool,
}

/// Submit the latest `edit` until the host accepts it or the policy is
/// exhausted.
pub async fn apply_with_retry(
    host: Arc<dyn EditorHost>,
    edit: watch::Receiver<AtomicEdit>,
    policy: RetryPolicy,
) -> ApplyOutcome {
    let sequence_id = edit.borrow().sequence_id;
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        attempts += 1;
        let attempt = edit.borrow().clone();
        if host.apply_edit(attempt).await {
            return ApplyOutcome {
                sequence_id,
                attempts,
                applied: true,
            };
        }
        log::debug!("apply of batch {sequence_id} rejected (attempt {attempts})");
        if attempts < policy.max_attempts {
            tokio::time::sleep(policy.backoff(attempts)).await;
        }
    }

    ApplyOutcome {
        sequence_id,
        attempts,
        applied: false,
    }
}

/// FIFO of remote batches, applied one at a time.
pub struct RemoteApplyQueue {
    host: Arc<dyn EditorHost>,
    policy: RetryPolicy,
    waiting: VecDeque<ChangeBatch>,
    state: RemoteApplyState,
    in_flight: Option<BoxFuture<'static, ApplyOutcome>>,
    in_flight_edit: Option<watch::Sender<AtomicEdit>>,
}

impl RemoteApplyQueue {
    pub fn new(host: Arc<dyn EditorHost>, policy: RetryPolicy) -> Self {
        Self {
            host,
            policy,
            waiting: VecDeque::new(),
            state: RemoteApplyState::Idle,
            in_flight: None,
            in_flight_edit: None,
        }
    }

    /// Append a batch; it starts immediately if nothing is in flight.
    pub fn push(&mut self, batch: ChangeBatch, echo: &mut EchoGuard) {
        if batch.is_empty() {
            return;
        }
        self.waiting.push_back(batch);
        if self.state == RemoteApplyState::Idle {
            self.start_next(echo);
        }
    }

    fn start_next(&mut self, echo: &mut EchoGuard) {
        let Some(batch) = self.waiting.pop_front() else {
            self.state = RemoteApplyState::Idle;
            return;
        };

        echo.begin_expecting(&batch);
        let edit = AtomicEdit {
            sequence_id: batch.sequence_id,
            operations: batch.operations,
        };
        self.state = RemoteApplyState::Applying {
            sequence_id: edit.sequence_id,
        };
        let (edit_tx, edit_rx) = watch::channel(edit);
        self.in_flight = Some(Box::pin(apply_with_retry(
            self.host.clone(),
            edit_rx,
            self.policy,
        )));
        self.in_flight_edit = Some(edit_tx);
    }

    /// Move genuine local `ops` past every batch not yet in the buffer.
    ///
    /// `ops` are measured against the buffer; the result is measured against
    /// the shared document. Pending echoes, the in-flight edit and every
    /// waiting batch are re-measured to land after `ops`. Waiting batches
    /// left with nothing to apply are dropped.
    pub fn rebase_local(&mut self, ops: Vec<Operation>, echo: &mut EchoGuard) -> Vec<Operation> {
        let mut ops = echo.rebase(ops);

        if let (RemoteApplyState::Applying { sequence_id }, Some(edit)) = (self.state, &self.in_flight_edit) {
            let operations = echo.expected(sequence_id).map(<[Operation]>::to_vec).unwrap_or_default();
            edit.send_modify(|edit| edit.operations = operations);
        }

        for batch in &mut self.waiting {
            let operations = transform(&batch.operations, &ops, Tie::After);
            ops = transform(&ops, &batch.operations, Tie::Before);
            batch.operations = operations;
        }
        self.waiting.retain(|batch| !batch.is_empty());
        ops
    }

    /// Wait for the in-flight batch. Pends forever while idle.
    ///
    /// Cancel-safe: if the returned future is dropped before completion the
    /// in-flight apply keeps its progress.
    pub async fn next_outcome(&mut self) -> ApplyOutcome {
        match self.in_flight.as_mut() {
            Some(fut) => {
                let outcome = fut.await;
                self.in_flight = None;
                outcome
            }
            None => std::future::pending().await,
        }
    }

    /// Settle the in-flight batch and move on to the next one.
    ///
    /// A failed batch's pending echo is withdrawn. Returns the outcome back
    /// so callers can chain reporting.
    pub fn complete(&mut self, outcome: ApplyOutcome, echo: &mut EchoGuard) -> ApplyOutcome {
        self.in_flight = None;
        self.in_flight_edit = None;
        if outcome.applied {
            echo.arm(outcome.sequence_id, std::time::Instant::now());
        } else {
            echo.withdraw(outcome.sequence_id);
        }
        self.state = RemoteApplyState::Idle;
        self.start_next(echo);
        outcome
    }

    /// Drop every waiting batch and cancel the in-flight one, withdrawing
    /// the echo it registered.
    pub fn clear(&mut self, echo: &mut EchoGuard) {
        if let RemoteApplyState::Applying { sequence_id } = self.state {
            echo.withdraw(sequence_id);
        }
        self.in_flight = None;
        self.in_flight_edit = None;
        self.waiting.clear();
        self.state = RemoteApplyState::Idle;
    }

    pub fn state(&self) -> RemoteApplyState {
        self.state
    }

    pub fn is_applying(&self) -> bool {
        matches!(self.state, RemoteApplyState::Applying { .. })
    }

    /// Batches waiting behind the in-flight one.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn waiting(&self) -> impl Iterator<Item = &ChangeBatch> {
        self.waiting.iter()
    }
}
