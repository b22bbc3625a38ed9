//! In-memory implementations of the storage traits.
//!
//! Primarily for tests. Same semantics as SQLite, no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use medvault_core::{AuditEntry, ContentAddress, SubjectId};

use crate::error::{Result, StoreError};
use crate::traits::{next_seq, BlobStore, Ledger};

fn read<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockReadGuard<'a, T>> {
    lock.read()
        .map_err(|e| StoreError::Poisoned(format!("{what}: {e}")))
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &str) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write()
        .map_err(|e| StoreError::Poisoned(format!("{what}: {e}")))
}

/// In-memory blob store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentAddress, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Bytes) -> Result<ContentAddress> {
        let address = ContentAddress::of(&bytes);
        write(&self.blobs, "blobs")?.entry(address).or_insert(bytes);
        Ok(address)
    }

    async fn get(&self, address: &ContentAddress) -> Result<Bytes> {
        read(&self.blobs, "blobs")?
            .get(address)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {address}")))
    }

    async fn has(&self, address: &ContentAddress) -> Result<bool> {
        Ok(read(&self.blobs, "blobs")?.contains_key(address))
    }
}

/// In-memory audit ledger.
#[derive(Default)]
pub struct MemoryLedger {
    entries: RwLock<BTreeMap<u64, AuditEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn commit(&self, entry: &AuditEntry) -> Result<()> {
        let mut entries = write(&self.entries, "ledger")?;
        let expected = next_seq(entries.values().next_back());
        if entry.seq != expected {
            return Err(StoreError::SeqConflict {
                expected,
                got: entry.seq,
            });
        }
        entries.insert(entry.seq, entry.clone());
        Ok(())
    }

    async fn head(&self) -> Result<Option<AuditEntry>> {
        Ok(read(&self.entries, "ledger")?.values().next_back().cloned())
    }

    async fn entries_range(&self, from_seq: u64, limit: usize) -> Result<Vec<AuditEntry>> {
        Ok(read(&self.entries, "ledger")?
            .range(from_seq..)
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn entries_for(
        &self,
        subject: &SubjectId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        Ok(read(&self.entries, "ledger")?
            .range(from_seq..)
            .map(|(_, e)| e)
            .filter(|e| &e.subject_id == subject)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<u64> {
        Ok(read(&self.entries, "ledger")?.len() as u64)
    }
}
