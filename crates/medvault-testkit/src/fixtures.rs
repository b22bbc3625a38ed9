//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use medvault::{Decision, Kernel, RecordRef, Result, Session, SharingRequest, VaultConfig, VerifiedActor};
use medvault_core::{ActorKeys, AuditEntry, Role, SigningKeypair, SubjectId};
use medvault_store::{Ledger, MemoryBlobStore, MemoryLedger, Result as StoreResult};

/// Seed of the fixture's audit log key.
pub const LOG_SEED: [u8; 32] = [0xA5; 32];

/// A session whose keys derive from `seed`.
pub fn actor(id: &str, role: Role, seed: u8) -> Session {
    Session::new(VerifiedActor::new(id, role), ActorKeys::from_seed([seed; 32]))
}

/// A kernel with three registered actors over a [`TamperLedger`].
pub struct KernelFixture {
    pub kernel: Kernel,
    pub ledger: Arc<TamperLedger>,
    pub patient: Session,
    pub physician: Session,
    pub auditor: Session,
}

impl KernelFixture {
    pub async fn new() -> Result<Self> {
        Self::with_config(VaultConfig::default()).await
    }

    pub async fn with_config(config: VaultConfig) -> Result<Self> {
        let ledger = Arc::new(TamperLedger::new());
        let kernel = Kernel::open(
            Arc::new(MemoryBlobStore::new()),
            ledger.clone(),
            SigningKeypair::from_seed(&LOG_SEED),
            config,
        )
        .await?;

        let fixture = Self {
            kernel,
            ledger,
            patient: actor("did:eth:patient1", Role::Patient, 1),
            physician: actor("did:eth:physician1", Role::Physician, 2),
            auditor: actor("did:eth:auditor1", Role::Auditor, 3),
        };
        for session in fixture.sessions() {
            fixture.kernel.register(session)?;
        }
        Ok(fixture)
    }

    /// Patient, physician, auditor.
    pub fn sessions(&self) -> [&Session; 3] {
        [&self.patient, &self.physician, &self.auditor]
    }

    /// Upload a patient record and approve the physician's request for it.
    pub async fn shared_record(&self, plaintext: &[u8]) -> Result<(RecordRef, SharingRequest)> {
        let record = self.kernel.upload(&self.patient, plaintext).await?;
        let request = self
            .kernel
            .request_access(&self.physician, &record.record_id)
            .await?;
        let approved = self
            .kernel
            .decide(&self.patient, &request.request_id, Decision::Approved)
            .await?;
        Ok((record, approved))
    }
}

/// An in-memory ledger whose stored entries can be corrupted after commit.
///
/// Corruption is applied on the read path, so it looks exactly like a row
/// edited behind the engine's back.
#[derive(Default)]
pub struct TamperLedger {
    inner: MemoryLedger,
    corrupted: RwLock<BTreeSet<u64>>,
}

impl TamperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip a byte of the stored `entry_hash` at `seq`.
    pub fn corrupt_entry_hash(&self, seq: u64) {
        self.corrupted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(seq);
    }

    fn tamper(&self, mut entry: AuditEntry) -> AuditEntry {
        let corrupted = self.corrupted.read().unwrap_or_else(PoisonError::into_inner);
        if corrupted.contains(&entry.seq) {
            entry.entry_hash.0[0] ^= 0xFF;
        }
        entry
    }

    fn tamper_all(&self, entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
        entries.into_iter().map(|e| self.tamper(e)).collect()
    }
}

#[async_trait]
impl Ledger for TamperLedger {
    async fn commit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.inner.commit(entry).await
    }

    async fn head(&self) -> StoreResult<Option<AuditEntry>> {
        Ok(self.inner.head().await?.map(|e| self.tamper(e)))
    }

    async fn entries_range(&self, from_seq: u64, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.tamper_all(self.inner.entries_range(from_seq, limit).await?))
    }

    async fn entries_for(
        &self,
        subject: &SubjectId,
        from_seq: u64,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        Ok(self.tamper_all(self.inner.entries_for(subject, from_seq, limit).await?))
    }

    async fn len(&self) -> StoreResult<u64> {
        self.inner.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_actors_are_stable() {
        let a = actor("did:eth:a", Role::Patient, 9);
        let b = actor("did:eth:a", Role::Patient, 9);
        assert_eq!(a.public_keys(), b.public_keys());
    }
}
