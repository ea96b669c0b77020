//! Local buffer edits → shared-document operations.
//!
//! The editor reports each change event as a list of replaced ranges,
//! already measured against the pre-edit document. Translation keeps those
//! offsets as they are, validates them against the last-known buffer length
//! and sorts them into descending order for the shared-document write.

use crate::error::TranslationError;
use crate::host::EditDescriptor;
use crate::op::{BatchOrigin, ChangeBatch, Operation, SequenceCounter};

/// Converts editor change events into local [`ChangeBatch`]es.
#[derive(Debug, Clone)]
pub struct LocalChangeTranslator {
    known_length: u32,
    sequence: SequenceCounter,
}

impl LocalChangeTranslator {
    /// Start tracking a buffer of `document_length` UTF-16 units.
    pub fn new(document_length: u32) -> Self {
        Self {
            known_length: document_length,
            sequence: SequenceCounter::new(),
        }
    }

    /// Translate one change event.
    ///
    /// On success the known length advances past the edit. On failure the
    /// batch is rejected and the known length is left untouched.
    pub fn translate(&mut self, edits: &[EditDescriptor]) -> Result<ChangeBatch, TranslationError> {
        for edit in edits {
            let end = edit.range_offset.checked_add(edit.range_length);
            if end.map_or(true, |end| end > self.known_length) {
                return Err(TranslationError::OutOfBounds {
                    offset: edit.range_offset,
                    length: edit.range_length,
                    document_length: self.known_length,
                });
            }
        }

        let operations = edits.iter().map(EditDescriptor::to_operation).collect();
        let batch = ChangeBatch::new(BatchOrigin::Local, self.sequence.next_id(), operations);
        self.advance(batch.length_delta());
        Ok(batch)
    }

    /// Track a change event's effect on length without validating it.
    ///
    /// Used while the session is desynchronized and edits are not forwarded.
    pub fn observe_unchecked(&mut self, edits: &[EditDescriptor]) {
        let delta: i64 = edits
            .iter()
            .map(|edit| edit.to_operation().length_delta())
            .sum();
        self.advance(delta);
    }

    /// Re-base on a freshly measured buffer length.
    pub fn reset(&mut self, document_length: u32) {
        self.known_length = document_length;
    }

    pub fn known_length(&self) -> u32 {
        self.known_length
    }

    /// Id of the last batch produced (0 if none).
    pub fn last_sequence_id(&self) -> u64 {
        self.sequence.last()
    }

    fn advance(&mut self, delta: i64) {
        let next = (self.known_length as i64 + delta).clamp(0, u32::MAX as i64);
        self.known_length = next as u32;
    }
}

impl EditDescriptor {
    pub fn to_operation(&self) -> Operation {
        Operation::new(self.range_offset, self.range_length, self.replacement_text.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edit(offset: u32, len: u32, text: &str) -> EditDescriptor {
        EditDescriptor::new(offset, len, text)
    }

    #[test]
    fn test_single_insert() {
        let mut translator = LocalChangeTranslator::new(10);
        let batch = translator.translate(&[edit(5, 0, "X")]).unwrap();

        assert_eq!(batch.origin, BatchOrigin::Local);
        assert_eq!(batch.sequence_id, 1);
        assert_eq!(batch.operations, vec![Operation::insert(5, "X")]);
        assert_eq!(translator.known_length(), 11);
    }

    #[test]
    fn test_multi_cursor_sorted_descending_offsets_unchanged() {
        let mut translator = LocalChangeTranslator::new(20);
        let batch = translator
            .translate(&[edit(2, 0, "a"), edit(12, 3, "b"), edit(7, 1, "")])
            .unwrap();

        let offsets: Vec<u32> = batch.operations.iter().map(|op| op.offset).collect();
        assert_eq!(offsets, vec![12, 7, 2]);
        assert_eq!(translator.known_length(), 20 + 1 - 3 + 1 - 1);
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let mut translator = LocalChangeTranslator::new(4);
        let err = translator.translate(&[edit(3, 2, "")]).unwrap_err();

        assert_eq!(
            err,
            TranslationError::OutOfBounds {
                offset: 3,
                length: 2,
                document_length: 4
            }
        );
        assert_eq!(translator.known_length(), 4);
        assert_eq!(translator.last_sequence_id(), 0);
    }

    #[test]
    fn test_edit_at_end_is_valid() {
        let mut translator = LocalChangeTranslator::new(4);
        assert!(translator.translate(&[edit(4, 0, "!")]).is_ok());
    }

    #[test]
    fn test_overflowing_range_rejected() {
        let mut translator = LocalChangeTranslator::new(4);
        assert!(translator.translate(&[edit(u32::MAX, 2, "")]).is_err());
    }

    #[test]
    fn test_noops_dropped() {
        let mut translator = LocalChangeTranslator::new(4);
        let batch = translator.translate(&[edit(1, 0, "")]).unwrap();
        assert!(batch.is_empty());
        assert_eq!(translator.known_length(), 4);
    }

    #[test]
    fn test_sequence_ids_increase() {
        let mut translator = LocalChangeTranslator::new(0);
        let first = translator.translate(&[edit(0, 0, "a")]).unwrap();
        let second = translator.translate(&[edit(1, 0, "b")]).unwrap();
        assert!(second.sequence_id > first.sequence_id);
    }

    #[test]
    fn test_observe_unchecked_and_reset() {
        let mut translator = LocalChangeTranslator::new(3);
        translator.observe_unchecked(&[edit(10, 2, "")]);
        assert_eq!(translator.known_length(), 1);
        translator.observe_unchecked(&[edit(0, 5, "")]);
        assert_eq!(translator.known_length(), 0);
        translator.reset(42);
        assert_eq!(translator.known_length(), 42);
    }
}
