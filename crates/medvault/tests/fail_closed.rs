//! An operation whose audit entry cannot be written must not happen.
//!
//! These tests run the kernel over a ledger that can be told to reject or
//! stall commits, then check that state is exactly as it was before the
//! failed call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use medvault::{Decision, Kernel, SearchQuery, Session, VaultConfig, VaultError, VerifiedActor};
use medvault_core::{AuditAction, AuditEntry, Role, SigningKeypair, SubjectId};
use medvault_store::{Ledger, MemoryBlobStore, MemoryLedger, Result as StoreResult, StoreError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A ledger whose commits can be switched to fail, hang, or run detached.
#[derive(Default)]
struct SwitchLedger {
    inner: Arc<MemoryLedger>,
    reject: AtomicBool,
    stall: AtomicBool,
    detach: AtomicBool,
}

impl SwitchLedger {
    fn reject(&self, on: bool) {
        self.reject.store(on, Ordering::SeqCst);
    }

    fn stall(&self, on: bool) {
        self.stall.store(on, Ordering::SeqCst);
    }

    /// Run each commit on its own task after a delay, like a blocking-pool
    /// write that keeps going once started.
    fn detach(&self, on: bool) {
        self.detach.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for SwitchLedger {
    async fn commit(&self, entry: &AuditEntry) -> StoreResult<()> {
        while self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("ledger offline".into()));
        }
        if self.detach.load(Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            let entry = entry.clone();
            return tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                inner.commit(&entry).await
            })
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?;
        }
        self.inner.commit(entry).await
    }

    async fn head(&self) -> StoreResult<Option<AuditEntry>> {
        self.inner.head().await
    }

    async fn entries_range(&self, from_seq: u64, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        self.inner.entries_range(from_seq, limit).await
    }

    async fn entries_for(
        &self,
        subject: &SubjectId,
        from_seq: u64,
        limit: usize,
    ) -> StoreResult<Vec<AuditEntry>> {
        self.inner.entries_for(subject, from_seq, limit).await
    }

    async fn len(&self) -> StoreResult<u64> {
        self.inner.len().await
    }
}

struct Harness {
    kernel: Kernel,
    ledger: Arc<SwitchLedger>,
    patient: Session,
    physician: Session,
}

async fn harness(config: VaultConfig) -> Result<Harness> {
    init_tracing();
    let ledger = Arc::new(SwitchLedger::default());
    let kernel = Kernel::open(
        Arc::new(MemoryBlobStore::new()),
        ledger.clone(),
        SigningKeypair::generate(),
        config,
    )
    .await?;
    let patient = Session::establish(VerifiedActor::new("did:eth:patient1", Role::Patient));
    let physician = Session::establish(VerifiedActor::new("did:eth:physician1", Role::Physician));
    kernel.register(&patient)?;
    kernel.register(&physician)?;
    Ok(Harness {
        kernel,
        ledger,
        patient,
        physician,
    })
}

async fn entry_count(h: &Harness) -> Result<u64> {
    Ok(h.kernel.audit().len().await?)
}

#[tokio::test]
async fn test_rejected_upload_registers_nothing() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;

    h.ledger.reject(true);
    let err = h.kernel.upload(&h.patient, b"x-ray").await.unwrap_err();
    assert!(matches!(err, VaultError::Audit(_)), "got {err:?}");
    h.ledger.reject(false);

    assert_eq!(entry_count(&h).await?, 0);
    let hits = h.kernel.search(&h.patient, &SearchQuery::new()).await?;
    assert!(hits.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rejected_request_leaves_nothing_pending() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;
    let record = h.kernel.upload(&h.patient, b"x-ray").await?;

    h.ledger.reject(true);
    assert!(h
        .kernel
        .request_access(&h.physician, &record.record_id)
        .await
        .is_err());
    h.ledger.reject(false);

    assert!(h.kernel.pending_requests_for(&h.patient)?.is_empty());
    // No conflict with a request that never existed.
    h.kernel.request_access(&h.physician, &record.record_id).await?;
    assert_eq!(h.kernel.pending_requests_for(&h.patient)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_rejected_approval_grants_nothing() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;
    let record = h.kernel.upload(&h.patient, b"x-ray").await?;
    let request = h.kernel.request_access(&h.physician, &record.record_id).await?;

    h.ledger.reject(true);
    assert!(h
        .kernel
        .decide(&h.patient, &request.request_id, Decision::Approved)
        .await
        .is_err());
    h.ledger.reject(false);

    assert!(!h.kernel.is_authorized(&record.record_id, h.physician.actor_id())?);
    assert!(h.kernel.access().request(&request.request_id)?.is_pending());
    Ok(())
}

#[tokio::test]
async fn test_unaudited_read_returns_no_plaintext() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;
    let record = h.kernel.upload(&h.patient, b"x-ray").await?;

    h.ledger.reject(true);
    let result = h.kernel.read(&h.patient, &record.record_id).await;
    h.ledger.reject(false);

    assert!(matches!(result, Err(VaultError::Audit(_))));
    Ok(())
}

#[tokio::test]
async fn test_rejected_revoke_keeps_grant() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;
    let record = h.kernel.upload(&h.patient, b"x-ray").await?;
    let request = h.kernel.request_access(&h.physician, &record.record_id).await?;
    h.kernel
        .decide(&h.patient, &request.request_id, Decision::Approved)
        .await?;

    h.ledger.reject(true);
    assert!(h
        .kernel
        .revoke(&h.patient, &record.record_id, h.physician.actor_id())
        .await
        .is_err());
    h.ledger.reject(false);

    assert!(h.kernel.is_authorized(&record.record_id, h.physician.actor_id())?);
    assert_eq!(h.kernel.read(&h.physician, &record.record_id).await?, b"x-ray");
    Ok(())
}

#[tokio::test]
async fn test_rejected_send_delivers_nothing() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;

    h.ledger.reject(true);
    assert!(h
        .kernel
        .send(&h.patient, h.physician.actor_id(), b"hello")
        .await
        .is_err());
    h.ledger.reject(false);

    assert!(h.kernel.inbox(&h.physician).await?.is_empty());
    Ok(())
}

async fn wait_for<F>(mut done: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    for _ in 0..400 {
        if done()? {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    anyhow::bail!("condition not reached")
}

#[tokio::test]
async fn test_stalled_ledger_times_out_and_recovers() -> Result<()> {
    let config = VaultConfig {
        storage_timeout_ms: 50,
        ..VaultConfig::default()
    };
    let h = harness(config).await?;

    h.ledger.stall(true);
    let err = h.kernel.upload(&h.patient, b"x-ray").await.unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    assert_eq!(entry_count(&h).await?, 0);
    h.ledger.stall(false);

    // The timed-out upload had reached the ledger, so it lands in full.
    let record = h.kernel.upload(&h.patient, b"x-ray").await?;
    assert_eq!(h.kernel.read(&h.patient, &record.record_id).await?, b"x-ray");
    assert_eq!(entry_count(&h).await?, 3);
    let hits = h.kernel.search(&h.patient, &SearchQuery::new()).await?;
    assert_eq!(hits.len(), 2);
    h.kernel.verify_chain().await?;
    Ok(())
}

#[tokio::test]
async fn test_commit_finishing_after_deadline_still_applies_effect() -> Result<()> {
    let config = VaultConfig {
        storage_timeout_ms: 100,
        ..VaultConfig::default()
    };
    let h = harness(config).await?;
    let record = h.kernel.upload(&h.patient, b"x-ray").await?;

    h.ledger.detach(true);
    let err = h
        .kernel
        .request_access(&h.physician, &record.record_id)
        .await
        .unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
    h.ledger.detach(false);

    wait_for(|| Ok(h.kernel.pending_requests_for(&h.patient)?.len() == 1)).await?;

    let actions: Vec<AuditAction> = h
        .kernel
        .entries_for(record.record_id)
        .await?
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::RecordUploaded, AuditAction::SharingRequestCreated]
    );
    h.kernel.verify_chain().await?;
    Ok(())
}

#[tokio::test]
async fn test_one_entry_per_successful_operation() -> Result<()> {
    let h = harness(VaultConfig::default()).await?;

    let record = h.kernel.upload(&h.patient, b"x-ray").await?;
    let request = h.kernel.request_access(&h.physician, &record.record_id).await?;
    h.kernel
        .decide(&h.patient, &request.request_id, Decision::Approved)
        .await?;
    h.kernel.read(&h.physician, &record.record_id).await?;
    h.kernel
        .revoke(&h.patient, &record.record_id, h.physician.actor_id())
        .await?;
    let denied = h.kernel.read(&h.physician, &record.record_id).await;
    assert!(matches!(denied, Err(VaultError::AccessDenied { .. })));

    let actions: Vec<AuditAction> = h
        .kernel
        .entries_for(record.record_id)
        .await?
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::RecordUploaded,
            AuditAction::SharingRequestCreated,
            AuditAction::SharingRequestApproved,
            AuditAction::RecordAccessed,
            AuditAction::AccessRevoked,
            AuditAction::RecordAccessDenied,
        ]
    );
    assert_eq!(entry_count(&h).await?, 6);
    h.kernel.verify_chain().await?;
    Ok(())
}
