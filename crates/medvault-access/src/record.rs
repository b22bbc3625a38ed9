//! Record registration metadata.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use medvault_core::{ActorId, ContentAddress, RecordId};

/// Immutable metadata of an uploaded record.
///
/// Only this is visible to search; ciphertext stays in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_id: RecordId,
    pub owner_id: ActorId,
    pub content_address: ContentAddress,
    /// Unix milliseconds.
    pub created_at: i64,
    pub tags: BTreeSet<String>,
}

impl RecordRef {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Context bound into every wrap of this record's content key.
    pub fn key_context(&self) -> Vec<u8> {
        key_context(&self.record_id)
    }
}

/// Context bytes for wrapping and unwrapping the content key of `record_id`.
pub fn key_context(record_id: &RecordId) -> Vec<u8> {
    let mut ctx = b"medvault record key:".to_vec();
    ctx.extend_from_slice(record_id.as_bytes());
    ctx
}
