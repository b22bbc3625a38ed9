//! Storage traits: the abstract collaborators the engine depends on.
//!
//! The engine never assumes a backend. It needs a content-addressed blob
//! store for record ciphertext and an append-only ledger for the audit
//! trail. Both are async so network-backed implementations fit.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use medvault_core::{AuditEntry, ContentAddress, SubjectId};

use crate::error::Result;

/// Content-addressed blob storage.
///
/// `put` is idempotent: identical bytes always yield the identical address.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their content address.
    async fn put(&self, bytes: Bytes) -> Result<ContentAddress>;

    /// Fetch bytes by address. Fails with `NotFound` for unknown addresses.
    async fn get(&self, address: &ContentAddress) -> Result<Bytes>;

    /// Check whether an address is stored.
    async fn has(&self, address: &ContentAddress) -> Result<bool>;
}

/// Durable append-only storage for audit entries, keyed by `seq`.
///
/// # Design Notes
///
/// - **Atomic commit**: an entry is either fully durable or absent when
///   `commit` returns.
/// - **Strict succession**: `commit` rejects any entry whose `seq` is not
///   exactly one past the current head (0 for an empty ledger) with
///   `SeqConflict`, so two writers can never both extend the same head.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Durably append an entry.
    async fn commit(&self, entry: &AuditEntry) -> Result<()>;

    /// The entry with the highest seq, if any.
    async fn head(&self) -> Result<Option<AuditEntry>>;

    /// Up to `limit` entries with `seq >= from_seq`, ordered by seq.
    async fn entries_range(&self, from_seq: u64, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Up to `limit` entries about `subject` with `seq >= from_seq`, ordered by seq.
    async fn entries_for(
        &self,
        subject: &SubjectId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<AuditEntry>>;

    /// Number of committed entries.
    async fn len(&self) -> Result<u64>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn put(&self, bytes: Bytes) -> Result<ContentAddress> {
        (**self).put(bytes).await
    }

    async fn get(&self, address: &ContentAddress) -> Result<Bytes> {
        (**self).get(address).await
    }

    async fn has(&self, address: &ContentAddress) -> Result<bool> {
        (**self).has(address).await
    }
}

#[async_trait]
impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    async fn commit(&self, entry: &AuditEntry) -> Result<()> {
        (**self).commit(entry).await
    }

    async fn head(&self) -> Result<Option<AuditEntry>> {
        (**self).head().await
    }

    async fn entries_range(&self, from_seq: u64, limit: usize) -> Result<Vec<AuditEntry>> {
        (**self).entries_range(from_seq, limit).await
    }

    async fn entries_for(
        &self,
        subject: &SubjectId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        (**self).entries_for(subject, from_seq, limit).await
    }

    async fn len(&self) -> Result<u64> {
        (**self).len().await
    }
}

/// The seq a new entry must carry to extend a ledger whose head is `head`.
pub fn next_seq(head: Option<&AuditEntry>) -> u64 {
    head.map(|e| e.seq + 1).unwrap_or(0)
}
