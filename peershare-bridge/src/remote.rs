//! Shared-document deltas → absolute buffer operations.
//!
//! A delta walks the document from the start:
//!
//! ```text
//! doc (before):  a b c d e f g
//! delta:         retain 2 │ insert "X" │ retain 3 │ delete 1
//! cursor:        0 ──► 2  │ 2          │ 2 ──► 5  │ 5 ──► 6
//! operations:             {2, 0, "X"}             {5, 1, ""}
//! ```
//!
//! The cursor measures the document *before* the change: retains and
//! deletes move it, inserts do not. The resulting offsets therefore stay
//! valid when the batch is applied to the current buffer in descending
//! order as one multi-range edit.

use yrs::types::Delta;
use yrs::{Any, Out};

use crate::error::TranslationError;
use crate::op::{BatchOrigin, ChangeBatch, Operation, SequenceCounter};

/// One instruction of a delta-encoded text change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaEntry {
    Retain(u32),
    Delete(u32),
    Insert(String),
    /// Anything the bridge cannot express as plain text (embeds, shared types).
    Unsupported(String),
}

impl DeltaEntry {
    /// Convert a `yrs` text delta. Formatting attributes are ignored.
    pub fn from_yrs(delta: &Delta) -> Self {
        match delta {
            Delta::Retain(len, _) => DeltaEntry::Retain(*len),
            Delta::Deleted(len) => DeltaEntry::Delete(*len),
            Delta::Inserted(Out::Any(Any::String(text)), _) => DeltaEntry::Insert(text.to_string()),
            Delta::Inserted(other, _) => DeltaEntry::Unsupported(format!("insert of {other:?}")),
        }
    }
}

/// Converts shared-document deltas into remote [`ChangeBatch`]es.
#[derive(Debug, Default, Clone)]
pub struct RemoteDeltaTranslator {
    sequence: SequenceCounter,
}

impl RemoteDeltaTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one delta. Malformed deltas are rejected whole.
    pub fn translate(&mut self, delta: &[DeltaEntry]) -> Result<ChangeBatch, TranslationError> {
        let operations = delta_to_operations(delta)?;
        Ok(ChangeBatch::new(BatchOrigin::Remote, self.sequence.next_id(), operations))
    }

    /// Wrap already-built operations (full-buffer replacement on resync).
    pub fn batch(&mut self, operations: Vec<Operation>) -> ChangeBatch {
        ChangeBatch::new(BatchOrigin::Remote, self.sequence.next_id(), operations)
    }

    /// Id of the last batch produced (0 if none).
    pub fn last_sequence_id(&self) -> u64 {
        self.sequence.last()
    }
}

/// Walk a delta and emit operations in document order.
pub fn delta_to_operations(delta: &[DeltaEntry]) -> Result<Vec<Operation>, TranslationError> {
    let mut ops: Vec<Operation> = Vec::new();
    let mut cursor: u32 = 0;
    // Whether the last emitted op may still absorb edits at the cursor.
    let mut open = false;

    for entry in delta {
        match entry {
            DeltaEntry::Retain(len) => {
                cursor = advance(cursor, *len)?;
                open = false;
            }
            DeltaEntry::Delete(len) => {
                match ops.last_mut() {
                    Some(op) if open && op.end() == cursor => op.delete_len += len,
                    _ => {
                        ops.push(Operation::delete(cursor, *len));
                        open = true;
                    }
                }
                cursor = advance(cursor, *len)?;
            }
            DeltaEntry::Insert(text) => match ops.last_mut() {
                Some(op) if open && op.end() == cursor => op.insert.push_str(text),
                _ => {
                    ops.push(Operation::insert(cursor, text.clone()));
                    open = true;
                }
            },
            DeltaEntry::Unsupported(kind) => {
                return Err(TranslationError::UnsupportedDelta(kind.clone()));
            }
        }
    }

    Ok(ops)
}

fn advance(cursor: u32, len: u32) -> Result<u32, TranslationError> {
    cursor.checked_add(len).ok_or(TranslationError::OutOfBounds {
        offset: cursor,
        length: len,
        document_length: u32::MAX,
    })
}
