//! Property tests for batch application order.
//!
//! A batch whose operations are all measured against the same text must
//! produce the same result whether it is applied highest offset first (the
//! bridge's strategy) or lowest offset first with offsets re-measured after
//! every step. Two batches made against the same text must also converge
//! once each is transformed past the other.

use peershare_bridge::op::{apply_operations, sort_for_application, transform, utf16_len, Tie};
use peershare_bridge::{BatchOrigin, ChangeBatch, Operation};
use proptest::prelude::*;

/// Apply lowest offset first, shifting later operations by what came before.
fn apply_ascending_remeasured(text: &str, ops: &[Operation]) -> Option<String> {
    let mut ascending = ops.to_vec();
    ascending.sort_by_key(|op| op.offset);

    let mut out = text.to_string();
    let mut shift: i64 = 0;
    for op in &ascending {
        let offset = u32::try_from(op.offset as i64 + shift).ok()?;
        let moved = Operation::new(offset, op.delete_len, op.insert.clone());
        out = apply_operations(&out, std::slice::from_ref(&moved))?;
        shift += op.length_delta();
    }
    Some(out)
}

/// Non-overlapping operations over a text of `len` units.
fn disjoint_ops(len: u32) -> impl Strategy<Value = Vec<Operation>> {
    proptest::collection::vec((0..=len, 0u32..4, "[a-z]{0,3}"), 0..6).prop_map(move |raw| {
        let mut starts: Vec<(u32, u32, String)> = raw;
        starts.sort_by_key(|(offset, _, _)| *offset);
        let mut ops = Vec::new();
        let mut floor = 0u32;
        for (offset, delete_len, insert) in starts {
            if offset < floor {
                continue;
            }
            let delete_len = delete_len.min(len - offset);
            ops.push(Operation::new(offset, delete_len, insert));
            // The next range starts strictly after this one ends, so two
            // inserts never share an offset.
            floor = offset + delete_len + 1;
        }
        ops
    })
}

fn text_and_ops() -> impl Strategy<Value = (String, Vec<Operation>)> {
    "[a-z😀]{0,16}".prop_flat_map(|text| {
        let len = utf16_len(&text);
        (Just(text), disjoint_ops(len))
    })
}

/// Two independent batches over the same ASCII text.
fn text_and_concurrent_batches() -> impl Strategy<Value = (String, Vec<Operation>, Vec<Operation>)> {
    "[a-z]{0,16}".prop_flat_map(|text| {
        let len = utf16_len(&text);
        (Just(text), disjoint_ops(len), disjoint_ops(len))
    })
}

proptest! {
    #[test]
    fn test_descending_matches_ascending_remeasured((text, ops) in text_and_ops()) {
        // Surrogate-splitting offsets are rejected by both strategies alike.
        let descending = apply_operations(&text, &sort_for_application(ops.clone()));
        let reference = apply_ascending_remeasured(&text, &ops);
        prop_assert_eq!(descending, reference);
    }

    #[test]
    fn test_batch_order_is_strictly_usable((text, ops) in text_and_ops()) {
        let batch = ChangeBatch::new(BatchOrigin::Remote, 1, ops);
        for pair in batch.operations.windows(2) {
            prop_assert!(pair[0].offset >= pair[1].end());
        }
        let expected = utf16_len(&text) as i64 + batch.length_delta();
        if let Some(result) = apply_operations(&text, &batch.operations) {
            prop_assert_eq!(utf16_len(&result) as i64, expected);
        }
    }

    #[test]
    fn test_concurrent_batches_converge((text, local, remote) in text_and_concurrent_batches()) {
        let local = sort_for_application(local);
        let remote = sort_for_application(remote);

        // Buffer side: local edit first, then the remote batch re-measured.
        let buffer = apply_operations(&text, &local)
            .and_then(|t| apply_operations(&t, &transform(&remote, &local, Tie::After)));
        // Document side: remote batch first, then the local edit re-measured.
        let shared = apply_operations(&text, &remote)
            .and_then(|t| apply_operations(&t, &transform(&local, &remote, Tie::Before)));

        prop_assert!(buffer.is_some());
        prop_assert_eq!(buffer, shared);
    }
}
