//! Echo suppression for edits the bridge applied itself.
//!
//! Applying a remote batch to the buffer makes the editor report that very
//! change back as a local edit. Forwarding it would write the same text into
//! the shared document twice. Each applied batch therefore leaves a
//! [`PendingEcho`] holding the exact operation shapes it produced; incoming
//! buffer notifications consume matching shapes one by one.
//!
//! ```text
//! RemoteApplyQueue ── begin_expecting(batch) ──► pending: {seq 4: [op a, op b]}
//!                                                        │
//! editor notification [op a, op c] ── try_consume ──────►│ a: suppressed
//!                                                        │ c: genuine ──► shared doc
//! ```
//!
//! Matching is per operation, so a user typing while a remote edit is in
//! flight is never mistaken for the echo.

use std::time::{Duration, Instant};

use crate::op::{sort_for_application, transform, ChangeBatch, Operation, Tie};

/// Operations of one applied batch whose notification is still outstanding.
#[derive(Debug, Clone)]
pub struct PendingEcho {
    pub sequence_id: u64,
    remaining: Vec<Operation>,
    /// Set once the host confirmed the edit; the entry can only expire after.
    armed_at: Option<Instant>,
}

impl PendingEcho {
    pub fn remaining(&self) -> &[Operation] {
        &self.remaining
    }

    pub fn is_armed(&self) -> bool {
        self.armed_at.is_some()
    }
}

/// How one buffer notification was classified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoVerdict {
    /// Operations to forward to the shared document, order preserved.
    pub genuine: Vec<Operation>,
    /// Operations recognised as echoes and dropped.
    pub suppressed: Vec<Operation>,
}

impl EchoVerdict {
    pub fn is_fully_suppressed(&self) -> bool {
        self.genuine.is_empty() && !self.suppressed.is_empty()
    }

    /// Genuine operations moved past the suppressed ones.
    ///
    /// Both lists are measured against the buffer before the notification,
    /// but the shared document already holds the suppressed text, so each
    /// genuine offset shifts by the length change of every suppressed
    /// operation ending at or before it.
    pub fn rebased_genuine(&self) -> Vec<Operation> {
        if self.suppressed.is_empty() {
            return self.genuine.clone();
        }
        let rebased = self
            .genuine
            .iter()
            .map(|op| {
                let shift: i64 = self
                    .suppressed
                    .iter()
                    .filter(|s| s.end() <= op.offset)
                    .map(Operation::length_delta)
                    .sum();
                let offset = (op.offset as i64 + shift).clamp(0, u32::MAX as i64) as u32;
                Operation::new(offset, op.delete_len, op.insert.clone())
            })
            .collect();
        sort_for_application(rebased)
    }
}

/// Tracks pending echoes and classifies buffer notifications.
#[derive(Debug)]
pub struct EchoGuard {
    pending: Vec<PendingEcho>,
    timeout: Duration,
}

impl EchoGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Vec::new(),
            timeout,
        }
    }

    /// Expect the notification for `batch`, which is about to be applied.
    pub fn begin_expecting(&mut self, batch: &ChangeBatch) {
        if batch.is_empty() {
            return;
        }
        self.pending.push(PendingEcho {
            sequence_id: batch.sequence_id,
            remaining: batch.operations.clone(),
            armed_at: None,
        });
    }

    /// The edit for `sequence_id` landed; start its expiry clock.
    pub fn arm(&mut self, sequence_id: u64, now: Instant) {
        if let Some(entry) = self.pending.iter_mut().find(|e| e.sequence_id == sequence_id) {
            entry.armed_at = Some(now);
        }
    }

    /// The edit for `sequence_id` was never applied; stop expecting it.
    pub fn withdraw(&mut self, sequence_id: u64) -> bool {
        let before = self.pending.len();
        self.pending.retain(|e| e.sequence_id != sequence_id);
        self.pending.len() != before
    }

    /// Classify every operation of a buffer notification.
    ///
    /// Each matched shape is consumed, so a second identical notification
    /// is genuine.
    pub fn try_consume(&mut self, observed: &[Operation]) -> EchoVerdict {
        let mut verdict = EchoVerdict::default();

        for op in observed {
            if self.consume_one(op) {
                verdict.suppressed.push(op.clone());
            } else {
                verdict.genuine.push(op.clone());
            }
        }

        verdict
    }

    fn consume_one(&mut self, op: &Operation) -> bool {
        // Oldest entry first.
        for idx in 0..self.pending.len() {
            let entry = &mut self.pending[idx];
            if let Some(pos) = entry.remaining.iter().position(|expected| expected == op) {
                entry.remaining.remove(pos);
                if entry.remaining.is_empty() {
                    self.pending.remove(idx);
                }
                return true;
            }
        }
        false
    }

    /// Move genuine local `ops` past every pending entry.
    ///
    /// Pending entries describe text the shared document already holds but
    /// the buffer has not reported yet. The returned operations are measured
    /// against the shared document, and each entry is re-measured against
    /// the buffer after `ops`, so its notification still matches. Entries
    /// left with nothing to apply are dropped.
    pub fn rebase(&mut self, mut ops: Vec<Operation>) -> Vec<Operation> {
        for entry in &mut self.pending {
            let remaining = transform(&entry.remaining, &ops, Tie::After);
            ops = transform(&ops, &entry.remaining, Tie::Before);
            entry.remaining = remaining;
        }
        self.pending.retain(|entry| !entry.remaining.is_empty());
        ops
    }

    /// Operations still expected for `sequence_id`.
    pub fn expected(&self, sequence_id: u64) -> Option<&[Operation]> {
        self.pending
            .iter()
            .find(|entry| entry.sequence_id == sequence_id)
            .map(PendingEcho::remaining)
    }

    /// Drop armed entries older than the timeout, returning their ids.
    pub fn expire(&mut self, now: Instant) -> Vec<u64> {
        let timeout = self.timeout;
        let mut expired = Vec::new();
        self.pending.retain(|entry| match entry.armed_at {
            Some(armed) if now.saturating_duration_since(armed) >= timeout => {
                expired.push(entry.sequence_id);
                false
            }
            _ => true,
        });
        expired
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending(&self) -> &[PendingEcho] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BatchOrigin;

    fn remote(seq: u64, ops: Vec<Operation>) -> ChangeBatch {
        ChangeBatch::new(BatchOrigin::Remote, seq, ops)
    }

    fn guard() -> EchoGuard {
        EchoGuard::new(Duration::from_millis(300))
    }

    #[test]
    fn test_exact_echo_suppressed_once() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::insert(5, "X")]));

        let first = guard.try_consume(&[Operation::insert(5, "X")]);
        assert!(first.is_fully_suppressed());
        assert!(guard.is_empty());

        let second = guard.try_consume(&[Operation::insert(5, "X")]);
        assert_eq!(second.genuine, vec![Operation::insert(5, "X")]);
    }

    #[test]
    fn test_mixed_notification_classified_per_operation() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::insert(10, "remote")]));

        let verdict = guard.try_consume(&[Operation::insert(10, "remote"), Operation::insert(2, "k")]);
        assert_eq!(verdict.suppressed, vec![Operation::insert(10, "remote")]);
        assert_eq!(verdict.genuine, vec![Operation::insert(2, "k")]);
    }

    #[test]
    fn test_rebased_genuine_skips_suppressed_text() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::insert(2, "abc")]));

        let verdict = guard.try_consume(&[
            Operation::insert(8, "k"),
            Operation::insert(2, "abc"),
            Operation::delete(0, 1),
        ]);
        assert_eq!(
            verdict.rebased_genuine(),
            vec![Operation::insert(11, "k"), Operation::delete(0, 1)]
        );
    }

    #[test]
    fn test_shape_must_match_exactly() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::new(3, 1, "a")]));

        let verdict = guard.try_consume(&[Operation::new(3, 0, "a")]);
        assert_eq!(verdict.genuine.len(), 1);
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_partial_consumption_keeps_entry() {
        let mut guard = guard();
        guard.begin_expecting(&remote(
            1,
            vec![Operation::insert(8, "b"), Operation::insert(1, "a")],
        ));

        guard.try_consume(&[Operation::insert(8, "b")]);
        assert_eq!(guard.pending()[0].remaining(), &[Operation::insert(1, "a")]);

        guard.try_consume(&[Operation::insert(1, "a")]);
        assert!(guard.is_empty());
    }

    #[test]
    fn test_identical_shapes_in_two_batches() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::insert(0, "x")]));
        guard.begin_expecting(&remote(2, vec![Operation::insert(0, "x")]));

        let verdict = guard.try_consume(&[Operation::insert(0, "x")]);
        assert!(verdict.is_fully_suppressed());
        // The older entry is consumed first.
        assert_eq!(guard.pending()[0].sequence_id, 2);
    }

    #[test]
    fn test_unarmed_entries_never_expire() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::insert(0, "x")]));
        let later = Instant::now() + Duration::from_secs(10);
        assert!(guard.expire(later).is_empty());
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_armed_entry_expires() {
        let mut guard = guard();
        let start = Instant::now();
        guard.begin_expecting(&remote(1, vec![Operation::insert(0, "x")]));
        guard.begin_expecting(&remote(2, vec![Operation::insert(1, "y")]));
        guard.arm(1, start);
        guard.arm(2, start + Duration::from_millis(200));

        let expired = guard.expire(start + Duration::from_millis(350));
        assert_eq!(expired, vec![1]);
        assert_eq!(guard.len(), 1);
        assert!(guard.pending()[0].is_armed());
    }

    #[test]
    fn test_withdraw() {
        let mut guard = guard();
        guard.begin_expecting(&remote(3, vec![Operation::delete(0, 1)]));
        assert!(guard.withdraw(3));
        assert!(!guard.withdraw(3));
        assert!(guard.is_empty());
    }

    #[test]
    fn test_empty_batch_not_tracked() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, Vec::new()));
        assert!(guard.is_empty());
    }
    #[test]
    fn test_rebase_moves_local_ops_past_pending_text() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::insert(0, "A")]));
        guard.begin_expecting(&remote(2, vec![Operation::insert(20, "z")]));

        let rebased = guard.rebase(vec![Operation::insert(10, "!")]);
        assert_eq!(rebased, vec![Operation::insert(11, "!")]);
        assert_eq!(guard.expected(1), Some(&[Operation::insert(0, "A")][..]));
        // Batch 2 was measured after batch 1 and before the local insert.
        assert_eq!(guard.expected(2), Some(&[Operation::insert(21, "z")][..]));

        // The buffer now reports the re-measured shape.
        assert!(guard.try_consume(&[Operation::insert(21, "z")]).is_fully_suppressed());
    }

    #[test]
    fn test_rebase_drops_entries_deleted_locally() {
        let mut guard = guard();
        guard.begin_expecting(&remote(1, vec![Operation::delete(2, 2)]));

        let rebased = guard.rebase(vec![Operation::delete(1, 4)]);
        assert_eq!(rebased, vec![Operation::delete(1, 2)]);
        assert!(guard.is_empty());
        assert_eq!(guard.expected(1), None);
    }
}
