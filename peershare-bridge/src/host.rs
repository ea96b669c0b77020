//! Boundary to the host editor.
//!
//! The bridge consumes three things from the editor: a stream of change
//! events, an atomic multi-range edit primitive, and document queries.
//! [`MemoryBuffer`] implements all of them over a `String` and is what the
//! demo and the tests drive.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::op::{apply_operations, utf16_len, Operation};

/// One replaced range as reported by the editor, in pre-edit coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDescriptor {
    pub range_offset: u32,
    pub range_length: u32,
    pub replacement_text: String,
}

impl EditDescriptor {
    pub fn new(range_offset: u32, range_length: u32, replacement_text: impl Into<String>) -> Self {
        Self {
            range_offset,
            range_length,
            replacement_text: replacement_text.into(),
        }
    }
}

impl From<&Operation> for EditDescriptor {
    fn from(op: &Operation) -> Self {
        Self::new(op.offset, op.delete_len, op.insert.clone())
    }
}

/// A single logical edit covering every operation of one remote batch.
///
/// Operations are in descending offset order and measured against the
/// buffer as it is when the edit is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicEdit {
    pub sequence_id: u64,
    pub operations: Vec<Operation>,
}

/// What the bridge needs from the editor.
pub trait EditorHost: Send + Sync + 'static {
    /// Start a fresh stream of change events for the active document.
    ///
    /// Each item is every range replaced by one editor change, including
    /// changes made by [`EditorHost::apply_edit`].
    fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<Vec<EditDescriptor>>;

    /// Apply `edit` as one undoable change. Resolves to `false` if the host
    /// rejected it.
    fn apply_edit(&self, edit: AtomicEdit) -> BoxFuture<'static, bool>;

    /// Full text of the active document.
    fn document_text(&self) -> String;

    /// Length of the active document in UTF-16 units.
    fn document_length(&self) -> u32 {
        utf16_len(&self.document_text())
    }

    /// Identity of the active document, if any.
    fn document_id(&self) -> Option<String> {
        None
    }
}

#[derive(Debug)]
struct BufferState {
    uri: String,
    text: String,
    listener: Option<mpsc::UnboundedSender<Vec<EditDescriptor>>>,
    /// Number of upcoming `apply_edit` calls to reject.
    reject_next: u32,
    applied_edits: Vec<u64>,
}

/// An in-memory editor buffer.
///
/// Cloning yields another handle to the same buffer.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    state: Arc<Mutex<BufferState>>,
}

impl MemoryBuffer {
    pub fn new(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState {
                uri: uri.into(),
                text: text.into(),
                listener: None,
                reject_next: 0,
                applied_edits: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    /// Simulate the user replacing a range. Returns `false` if out of bounds.
    pub fn type_text(&self, offset: u32, delete_len: u32, text: &str) -> bool {
        self.edit_user(vec![EditDescriptor::new(offset, delete_len, text)])
    }

    /// Simulate one user change touching several ranges (multi-cursor).
    pub fn edit_user(&self, edits: Vec<EditDescriptor>) -> bool {
        let ops: Vec<Operation> = edits.iter().map(EditDescriptor::to_operation).collect();
        let mut state = self.lock();
        let Some(next) = apply_pre_edit(&state.text, &ops) else {
            return false;
        };
        state.text = next;
        notify(&mut state, edits);
        true
    }

    /// Reject the next `count` calls to `apply_edit`.
    pub fn fail_next(&self, count: u32) {
        self.lock().reject_next = count;
    }

    /// Sequence ids of the edits applied through `apply_edit`, in order.
    pub fn applied_edits(&self) -> Vec<u64> {
        self.lock().applied_edits.clone()
    }
}

impl EditorHost for MemoryBuffer {
    fn subscribe_changes(&self) -> mpsc::UnboundedReceiver<Vec<EditDescriptor>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().listener = Some(tx);
        rx
    }

    fn apply_edit(&self, edit: AtomicEdit) -> BoxFuture<'static, bool> {
        let mut state = self.lock();
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return future::ready(false).boxed();
        }
        let Some(next) = apply_operations(&state.text, &edit.operations) else {
            return future::ready(false).boxed();
        };
        state.text = next;
        state.applied_edits.push(edit.sequence_id);
        let edits = edit.operations.iter().map(EditDescriptor::from).collect();
        notify(&mut state, edits);
        future::ready(true).boxed()
    }

    fn document_text(&self) -> String {
        self.text()
    }

    fn document_id(&self) -> Option<String> {
        Some(self.lock().uri.clone())
    }
}

fn notify(state: &mut BufferState, edits: Vec<EditDescriptor>) {
    if let Some(listener) = &state.listener {
        if listener.send(edits).is_err() {
            state.listener = None;
        }
    }
}

/// Apply ranges measured against the same pre-edit text.
fn apply_pre_edit(text: &str, ops: &[Operation]) -> Option<String> {
    let sorted = crate::op::sort_for_application(ops.to_vec());
    apply_operations(text, &sorted)
}
