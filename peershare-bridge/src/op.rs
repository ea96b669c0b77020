//! Change operations shared by every part of the bridge.
//!
//! An [`Operation`] means "delete `delete_len` units at `offset`, then
//! insert `insert` at `offset`". Offsets and lengths are UTF-16 code units,
//! the unit used by both the host editor and the shared text document.
//!
//! Operations inside a [`ChangeBatch`] are kept in descending offset order:
//!
//! ```text
//! "hello world"
//!        ▲    ▲
//!        │    └── op B (offset 10) applied first
//!        └─────── op A (offset 6) still points at unchanged text
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TranslationError;

/// A single delete-then-insert at an absolute offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub offset: u32,
    pub delete_len: u32,
    pub insert: String,
}

impl Operation {
    pub fn new(offset: u32, delete_len: u32, insert: impl Into<String>) -> Self {
        Self {
            offset,
            delete_len,
            insert: insert.into(),
        }
    }

    /// Pure insertion at `offset`.
    pub fn insert(offset: u32, text: impl Into<String>) -> Self {
        Self::new(offset, 0, text)
    }

    /// Pure deletion of `len` units at `offset`.
    pub fn delete(offset: u32, len: u32) -> Self {
        Self::new(offset, len, String::new())
    }

    /// End of the replaced range in pre-edit coordinates.
    pub fn end(&self) -> u32 {
        self.offset + self.delete_len
    }

    /// Net change in document length once applied.
    pub fn length_delta(&self) -> i64 {
        utf16_len(&self.insert) as i64 - self.delete_len as i64
    }
}

/// True iff the operation neither deletes nor inserts anything.
pub fn is_noop(op: &Operation) -> bool {
    op.delete_len == 0 && op.insert.is_empty()
}

/// Order operations by descending offset, keeping ties in their original order.
pub fn sort_for_application(mut ops: Vec<Operation>) -> Vec<Operation> {
    // `sort_by` is stable.
    ops.sort_by(|a, b| b.offset.cmp(&a.offset));
    ops
}

/// Where a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchOrigin {
    Local,
    Remote,
}

/// Operations produced by one local or remote event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub origin: BatchOrigin,
    /// Unique and increasing per origin.
    pub sequence_id: u64,
    /// Descending offset order.
    pub operations: Vec<Operation>,
}

impl ChangeBatch {
    /// Build a batch, dropping no-ops and sorting for application.
    pub fn new(origin: BatchOrigin, sequence_id: u64, operations: Vec<Operation>) -> Self {
        let operations = sort_for_application(
            operations.into_iter().filter(|op| !is_noop(op)).collect(),
        );
        Self {
            origin,
            sequence_id,
            operations,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Net change in document length once the whole batch is applied.
    pub fn length_delta(&self) -> i64 {
        self.operations.iter().map(Operation::length_delta).sum()
    }
}

/// Monotonic id source for one batch origin. Ids start at 1.
#[derive(Debug, Default, Clone)]
pub struct SequenceCounter {
    last: u64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// The most recently issued id (0 if none).
    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Length of `s` in UTF-16 code units.
pub fn utf16_len(s: &str) -> u32 {
    s.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Convert a UTF-16 offset into a byte index of `s`.
///
/// Returns `None` when the offset is past the end or splits a surrogate pair.
pub fn utf16_to_byte(s: &str, offset: u32) -> Option<usize> {
    let mut units = 0u32;
    for (byte_idx, c) in s.char_indices() {
        if units == offset {
            return Some(byte_idx);
        }
        if units > offset {
            return None;
        }
        units += c.len_utf16() as u32;
    }
    (units == offset).then_some(s.len())
}

/// Apply `ops` to `text` one after another, in the order given.
///
/// Returns `None` if any operation falls outside the text as it stands at
/// that step.
pub fn apply_operations(text: &str, ops: &[Operation]) -> Option<String> {
    let mut out = text.to_string();
    for op in ops {
        let start = utf16_to_byte(&out, op.offset)?;
        let end = utf16_to_byte(&out, op.end())?;
        out.replace_range(start..end, &op.insert);
    }
    Some(out)
}

/// Check that descending `ops` fit a document of `document_length` units.
///
/// Every operation must end inside the document and before the offset of
/// the operation applied just ahead of it.
pub fn check_descending_bounds(ops: &[Operation], document_length: u32) -> Result<(), TranslationError> {
    let mut limit = document_length;
    for op in ops {
        let end = op.offset.checked_add(op.delete_len);
        if end.map_or(true, |end| end > limit) {
            return Err(TranslationError::OutOfBounds {
                offset: op.offset,
                length: op.delete_len,
                document_length,
            });
        }
        limit = op.offset;
    }
    Ok(())
}

/// Which edit's text comes first when two concurrent edits insert at the
/// same point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tie {
    Before,
    After,
}

impl Tie {
    pub fn flip(self) -> Self {
        match self {
            Self::Before => Self::After,
            Self::After => Self::Before,
        }
    }
}

/// Re-measure `ops` for a document that `applied` has already changed.
///
/// Both lists are descending and measured against the same text. Deletions
/// never remove text the other side inserted, and ranges the other side
/// already deleted are not deleted again. Transforming each list against
/// the other (with opposite ties) yields the same document either way:
///
/// ```text
/// apply(apply(s, a), transform(b, a, t)) == apply(apply(s, b), transform(a, b, t.flip()))
/// ```
pub fn transform(ops: &[Operation], applied: &[Operation], tie: Tie) -> Vec<Operation> {
    let mut current = ops.to_vec();
    // `applied` is descending, so each step is valid against the text the
    // steps before it produced.
    for other in applied {
        current = current
            .iter()
            .flat_map(|op| transform_op(op, other, tie))
            .collect();
    }
    sort_for_application(current.into_iter().filter(|op| !is_noop(op)).collect())
}

fn transform_op(op: &Operation, other: &Operation, tie: Tie) -> Vec<Operation> {
    let inserted = utf16_len(&other.insert);
    let start = map_start(op.offset, other, inserted, tie);
    let end = map_end(op.end(), other, inserted).max(start);
    let kept_from = other.offset + inserted;

    if inserted > 0 && start <= other.offset && end >= kept_from && end > start {
        // The range spans the other side's insert: delete around it.
        let mut pieces = Vec::with_capacity(2);
        if end > kept_from {
            pieces.push(Operation::delete(kept_from, end - kept_from));
        }
        pieces.push(Operation::new(start, other.offset - start, op.insert.clone()));
        return pieces;
    }
    vec![Operation::new(start, end - start, op.insert.clone())]
}

fn map_start(pos: u32, other: &Operation, inserted: u32, tie: Tie) -> u32 {
    if pos < other.offset || (pos == other.offset && tie == Tie::Before) {
        pos
    } else if pos < other.end() {
        other.offset + inserted
    } else {
        pos - other.delete_len + inserted
    }
}

fn map_end(pos: u32, other: &Operation, inserted: u32) -> u32 {
    if pos <= other.offset {
        pos
    } else if pos < other.end() {
        other.offset
    } else {
        pos - other.delete_len + inserted
    }
}
