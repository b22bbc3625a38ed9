//! The Kernel: unified API for MedVault.
//!
//! The Kernel wires the audit log, access controller, record vault, and
//! mailbox to one blob store and one ledger, and exposes the operations
//! callers need.

use std::path::Path;
use std::sync::Arc;

use medvault_access::{AccessGrant, Decision, RecordRef, SharingRequest};
use medvault_core::{
    ActorId, AuditEntry, Ed25519PublicKey, RecordId, RequestId, SigningKeypair, SubjectId,
};
use medvault_store::{BlobStore, Ledger, MemoryBlobStore, MemoryLedger, SqliteStore};

use crate::access::AccessController;
use crate::audit::AuditLog;
use crate::config::VaultConfig;
use crate::error::Result;
use crate::mailbox::{SealedMessage, SecureMailbox};
use crate::session::{Directory, Session};
use crate::vault::{RecordVault, SearchQuery, SearchResults};

/// The assembled engine.
///
/// Safe to share across tasks behind an `Arc`; every operation takes `&self`.
pub struct Kernel {
    config: VaultConfig,
    directory: Arc<Directory>,
    audit: AuditLog,
    access: Arc<AccessController>,
    vault: RecordVault,
    mailbox: SecureMailbox,
}

impl Kernel {
    /// Assemble a kernel over the given backends.
    ///
    /// `log_key` signs every audit entry; reopening a ledger requires the
    /// same key for `verify_chain` to pass.
    pub async fn open(
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn Ledger>,
        log_key: SigningKeypair,
        config: VaultConfig,
    ) -> Result<Self> {
        config.validate()?;
        let audit = AuditLog::open(
            ledger,
            log_key,
            config.storage_timeout(),
            config.audit_page_size,
        )
        .await?;
        let directory = Arc::new(Directory::new());
        let access = Arc::new(AccessController::new(
            audit.clone(),
            Arc::clone(&directory),
            config.clone(),
        ));
        let vault = RecordVault::new(
            blobs,
            Arc::clone(&access),
            audit.clone(),
            config.storage_timeout(),
        );
        let mailbox = SecureMailbox::new(audit.clone(), Arc::clone(&directory));

        tracing::info!(
            storage_timeout_ms = config.storage_timeout_ms,
            auditor_override = config.auditor_override,
            "kernel opened"
        );
        Ok(Self {
            config,
            directory,
            audit,
            access,
            vault,
            mailbox,
        })
    }

    /// A kernel over in-memory storage.
    pub async fn in_memory(log_key: SigningKeypair, config: VaultConfig) -> Result<Self> {
        Self::open(
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryLedger::new()),
            log_key,
            config,
        )
        .await
    }

    /// A kernel whose blobs and audit trail live in one SQLite file.
    pub async fn open_sqlite(
        path: impl AsRef<Path>,
        log_key: SigningKeypair,
        config: VaultConfig,
    ) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(path)?);
        Self::open(store.clone(), store, log_key, config).await
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn access(&self) -> &AccessController {
        &self.access
    }

    pub fn vault(&self) -> &RecordVault {
        &self.vault
    }

    pub fn mailbox(&self) -> &SecureMailbox {
        &self.mailbox
    }

    /// The key that verifies audit entry signatures.
    pub fn log_public_key(&self) -> Ed25519PublicKey {
        self.audit.public_key()
    }

    /// Publish a session's public keys so others can grant to and message it.
    pub fn register(&self, session: &Session) -> Result<()> {
        self.directory.register(session)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn upload(&self, owner: &Session, plaintext: &[u8]) -> Result<RecordRef> {
        self.vault.upload(owner, plaintext).await
    }

    pub async fn upload_tagged<I, T>(
        &self,
        owner: &Session,
        plaintext: &[u8],
        tags: I,
    ) -> Result<RecordRef>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.vault.upload_tagged(owner, plaintext, tags).await
    }

    pub async fn read(&self, reader: &Session, record_id: &RecordId) -> Result<Vec<u8>> {
        self.vault.read(reader, record_id).await
    }

    pub async fn search(&self, requester: &Session, query: &SearchQuery) -> Result<SearchResults> {
        self.vault.search(requester, query).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn request_access(
        &self,
        requester: &Session,
        record_id: &RecordId,
    ) -> Result<SharingRequest> {
        self.access.request_access(requester, record_id).await
    }

    pub async fn decide(
        &self,
        decider: &Session,
        request_id: &RequestId,
        decision: Decision,
    ) -> Result<SharingRequest> {
        self.access.decide(decider, request_id, decision).await
    }

    pub async fn revoke(&self, owner: &Session, record_id: &RecordId, grantee: &ActorId) -> Result<()> {
        self.access.revoke(owner, record_id, grantee).await
    }

    pub fn is_authorized(&self, record_id: &RecordId, actor: &ActorId) -> Result<bool> {
        self.access.is_authorized(record_id, actor)
    }

    /// Pending requests awaiting the session owner's decision.
    pub fn pending_requests_for(&self, owner: &Session) -> Result<Vec<SharingRequest>> {
        self.access.pending_requests_for(owner)
    }

    /// Grant history of a record, for its owner or an auditor.
    pub fn grants_for(&self, viewer: &Session, record_id: &RecordId) -> Result<Vec<AccessGrant>> {
        self.access.grants_for(viewer, record_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn send(
        &self,
        sender: &Session,
        recipient: &ActorId,
        plaintext: &[u8],
    ) -> Result<SealedMessage> {
        self.mailbox.send(sender, recipient, plaintext).await
    }

    pub async fn inbox(&self, reader: &Session) -> Result<Vec<SealedMessage>> {
        self.mailbox.inbox(reader).await
    }

    pub fn open_message(&self, reader: &Session, message: &SealedMessage) -> Result<Vec<u8>> {
        self.mailbox.open(reader, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn verify_chain(&self) -> Result<()> {
        Ok(self.audit.verify_chain().await?)
    }

    /// All entries about `subject`, ordered by seq.
    pub async fn entries_for(&self, subject: impl Into<SubjectId>) -> Result<Vec<AuditEntry>> {
        Ok(self.audit.entries_for(&subject.into()).collect().await?)
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medvault_core::{AuditAction, Role};
    use crate::error::{AuditError, VaultError};
    use crate::session::VerifiedActor;

    async fn kernel() -> Kernel {
        Kernel::in_memory(SigningKeypair::generate(), VaultConfig::default())
            .await
            .unwrap()
    }

    fn session(id: &str, role: Role) -> Session {
        Session::establish(VerifiedActor::new(id, role))
    }

    #[tokio::test]
    async fn test_owner_reads_own_record() {
        let kernel = kernel().await;
        let patient = session("did:eth:patient1", Role::Patient);
        kernel.register(&patient).unwrap();

        let record = kernel.upload(&patient, b"blood panel").await.unwrap();
        assert_eq!(kernel.read(&patient, &record.record_id).await.unwrap(), b"blood panel");

        let actions: Vec<AuditAction> = kernel
            .entries_for(record.record_id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::RecordUploaded, AuditAction::RecordAccessed]);
    }

    #[tokio::test]
    async fn test_grantee_reads_with_rewrapped_key() {
        let kernel = kernel().await;
        let patient = session("did:eth:patient1", Role::Patient);
        let physician = session("did:eth:physician1", Role::Physician);
        kernel.register(&patient).unwrap();
        kernel.register(&physician).unwrap();

        let record = kernel.upload(&patient, b"mri report").await.unwrap();
        let request = kernel
            .request_access(&physician, &record.record_id)
            .await
            .unwrap();
        assert_eq!(kernel.pending_requests_for(&patient).unwrap().len(), 1);

        kernel
            .decide(&patient, &request.request_id, Decision::Approved)
            .await
            .unwrap();
        assert!(kernel.pending_requests_for(&patient).unwrap().is_empty());
        assert_eq!(
            kernel.read(&physician, &record.record_id).await.unwrap(),
            b"mri report"
        );
        assert_eq!(kernel.grants_for(&patient, &record.record_id).unwrap().len(), 1);
        assert!(matches!(
            kernel.grants_for(&physician, &record.record_id),
            Err(VaultError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_approval_requires_registered_grantee() {
        let kernel = kernel().await;
        let patient = session("did:eth:patient1", Role::Patient);
        let physician = session("did:eth:physician1", Role::Physician);
        kernel.register(&patient).unwrap();

        let record = kernel.upload(&patient, b"x").await.unwrap();
        let request = kernel
            .request_access(&physician, &record.record_id)
            .await
            .unwrap();
        let before = kernel.audit().len().await.unwrap();

        let err = kernel
            .decide(&patient, &request.request_id, Decision::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert_eq!(kernel.audit().len().await.unwrap(), before);
        assert!(kernel.access().request(&request.request_id).unwrap().is_pending());
    }

    #[tokio::test]
    async fn test_search_filters_metadata_and_is_audited() {
        let kernel = kernel().await;
        let patient = session("did:eth:patient1", Role::Patient);
        kernel.register(&patient).unwrap();

        kernel
            .upload_tagged(&patient, b"a", ["lab", "2024"])
            .await
            .unwrap();
        kernel.upload_tagged(&patient, b"b", ["imaging"]).await.unwrap();

        let hits = kernel
            .search(&patient, &SearchQuery::new().tag("lab"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|r| r.has_tag("lab")));

        let all = kernel.search(&patient, &SearchQuery::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let stranger = session("did:eth:physician9", Role::Physician);
        assert!(kernel
            .search(&stranger, &SearchQuery::new())
            .await
            .unwrap()
            .is_empty());

        let searches = kernel.entries_for(patient.actor_id()).await.unwrap();
        assert_eq!(searches.len(), 2);
        assert!(searches.iter().all(|e| e.action == AuditAction::RecordsSearched));
    }

    #[tokio::test]
    async fn test_messages_roundtrip_and_are_audited() {
        let kernel = kernel().await;
        let physician = session("did:eth:physician1", Role::Physician);
        let patient = session("did:eth:patient1", Role::Patient);
        kernel.register(&physician).unwrap();
        kernel.register(&patient).unwrap();

        let sent = kernel
            .send(&physician, patient.actor_id(), b"results are in")
            .await
            .unwrap();
        let inbox = kernel.inbox(&patient).await.unwrap();
        assert_eq!(inbox, vec![sent.clone()]);
        assert_eq!(
            kernel.open_message(&patient, &inbox[0]).unwrap(),
            b"results are in"
        );
        assert!(kernel.inbox(&physician).await.unwrap().is_empty());

        let sent_entries = kernel.entries_for(sent.message_id).await.unwrap();
        assert_eq!(sent_entries.len(), 1);
        assert_eq!(sent_entries[0].action, AuditAction::MessageSent);
    }

    #[tokio::test]
    async fn test_tampered_message_is_rejected() {
        let kernel = kernel().await;
        let physician = session("did:eth:physician1", Role::Physician);
        let patient = session("did:eth:patient1", Role::Patient);
        kernel.register(&physician).unwrap();
        kernel.register(&patient).unwrap();

        let mut message = kernel
            .send(&physician, patient.actor_id(), b"take 2 daily")
            .await
            .unwrap();
        message.timestamp += 1;
        assert!(matches!(
            kernel.open_message(&patient, &message),
            Err(VaultError::Decryption(_))
        ));
        assert!(matches!(
            kernel.open_message(&physician, &message),
            Err(VaultError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_recipient() {
        let kernel = kernel().await;
        let physician = session("did:eth:physician1", Role::Physician);
        kernel.register(&physician).unwrap();
        let err = kernel
            .send(&physician, &ActorId::new("did:eth:nobody"), b"hi")
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert_eq!(kernel.audit().len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_kernel_persists_audit_trail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let log_key = SigningKeypair::from_seed(&[11; 32]);
        let patient = session("did:eth:patient1", Role::Patient);

        let record = {
            let kernel = Kernel::open_sqlite(&path, log_key.clone(), VaultConfig::default())
                .await
                .unwrap();
            kernel.upload(&patient, b"x-ray").await.unwrap()
        };

        let kernel = Kernel::open_sqlite(&path, log_key, VaultConfig::default())
            .await
            .unwrap();
        kernel.verify_chain().await.unwrap();
        let entries = kernel.entries_for(record.record_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::RecordUploaded);
    }

    #[tokio::test]
    async fn test_sqlite_row_edited_out_of_band_breaks_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let kernel = Kernel::open_sqlite(&path, SigningKeypair::generate(), VaultConfig::default())
            .await
            .unwrap();
        let patient = session("did:eth:patient1", Role::Patient);
        kernel.register(&patient).unwrap();

        let record = kernel.upload(&patient, b"x-ray").await.unwrap();
        for _ in 0..4 {
            kernel.read(&patient, &record.record_id).await.unwrap();
        }
        kernel.verify_chain().await.unwrap();

        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE audit_entries SET action = 'record_accessed ' WHERE seq = 3",
            [],
        )
        .unwrap();
        drop(conn);

        let err = kernel.verify_chain().await.unwrap_err();
        assert!(
            matches!(err, VaultError::Audit(AuditError::BrokenAt { seq: 3 })),
            "got {err:?}"
        );
    }
}
