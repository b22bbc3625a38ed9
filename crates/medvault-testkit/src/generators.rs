//! Proptest generators for property-based testing.

use proptest::prelude::*;

/// Generate a metadata tag.
pub fn tag() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("lab".to_string()),
        Just("imaging".to_string()),
        Just("prescription".to_string()),
        "[a-z]{3,10}",
    ]
}

/// Generate up to `max` tags.
pub fn tags(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(tag(), 0..=max)
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// One step of a random sharing workload.
///
/// Actors, records, and requests are indices into whatever pools the test
/// keeps; the test reduces them modulo the pool size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharingOp {
    Upload { owner: usize, tags: Vec<String>, payload: Vec<u8> },
    Request { requester: usize, record: usize },
    Decide { decider: usize, request: usize, approve: bool },
    Revoke { revoker: usize, record: usize, grantee: usize },
    Read { reader: usize, record: usize },
}

impl SharingOp {
    /// Whether this operation is audited even when it fails.
    pub fn audits_failure(&self) -> bool {
        matches!(self, SharingOp::Read { .. })
    }
}

/// Generate an upload by the owner at some index.
pub fn upload_op() -> impl Strategy<Value = SharingOp> {
    (0usize..8, tags(3), payload(256))
        .prop_map(|(owner, tags, payload)| SharingOp::Upload { owner, tags, payload })
}

/// Generate a single sharing operation.
pub fn sharing_op() -> impl Strategy<Value = SharingOp> {
    let idx = || 0usize..8;
    prop_oneof![
        1 => upload_op(),
        3 => (idx(), idx()).prop_map(|(requester, record)| SharingOp::Request { requester, record }),
        3 => (idx(), idx(), any::<bool>())
            .prop_map(|(decider, request, approve)| SharingOp::Decide { decider, request, approve }),
        2 => (idx(), idx(), idx())
            .prop_map(|(revoker, record, grantee)| SharingOp::Revoke { revoker, record, grantee }),
        2 => (idx(), idx()).prop_map(|(reader, record)| SharingOp::Read { reader, record }),
    ]
}

/// Generate a workload of 1 to `max_len` operations that starts with an upload.
pub fn sharing_ops(max_len: usize) -> impl Strategy<Value = Vec<SharingOp>> {
    (upload_op(), prop::collection::vec(sharing_op(), 0..max_len)).prop_map(|(first, rest)| {
        let mut ops = Vec::with_capacity(rest.len() + 1);
        ops.push(first);
        ops.extend(rest);
        ops
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_uploads_stay_within_bounds(op in upload_op()) {
            match op {
                SharingOp::Upload { tags, payload, .. } => {
                    prop_assert!(tags.len() <= 3);
                    prop_assert!(payload.len() <= 256);
                    prop_assert!(tags.iter().all(|t| !t.is_empty()));
                }
                other => prop_assert!(false, "not an upload: {:?}", other),
            }
        }

        #[test]
        fn prop_workloads_start_with_upload(ops in sharing_ops(12)) {
            let first_is_upload = matches!(ops[0], SharingOp::Upload { .. });
            prop_assert!(first_is_upload);
            prop_assert!(ops.len() <= 12);
        }
    }
}
