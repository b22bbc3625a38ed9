//! The record vault.
//!
//! Record bodies are encrypted under a fresh per-record content key and
//! stored in the [`BlobStore`]. The content key is wrapped for the owner at
//! upload and re-wrapped for each grantee on approval.
//!
//! Every read attempt is audited: success as `record_accessed`, a missing
//! grant as `record_access_denied`, and any other failure (unknown record,
//! storage, decryption) as `record_access_failed`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use medvault_access::{key_context, RecordRef};
use medvault_core::{
    now_millis, ActorId, AuditAction, ContentKey, Envelope, RecordId, SubjectId, WrappedKey,
};
use medvault_store::BlobStore;

use crate::access::AccessController;
use crate::audit::AuditLog;
use crate::deadline::bounded;
use crate::error::{Result, VaultError};
use crate::session::Session;

/// Metadata filter for [`RecordVault::search`].
///
/// All set fields must match. An empty query matches every record the
/// requester may read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub owner: Option<ActorId>,
    pub tag: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<i64>,
    /// Exclusive upper bound on `created_at`.
    pub created_until: Option<i64>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: impl Into<ActorId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn created_between(mut self, from: i64, until: i64) -> Self {
        self.created_from = Some(from);
        self.created_until = Some(until);
        self
    }

    pub fn matches(&self, record: &RecordRef) -> bool {
        self.owner.as_ref().map_or(true, |o| &record.owner_id == o)
            && self.tag.as_deref().map_or(true, |t| record.has_tag(t))
            && self.created_from.map_or(true, |t| record.created_at >= t)
            && self.created_until.map_or(true, |t| record.created_at < t)
    }
}

/// Search hits: a finite snapshot that can be walked any number of times.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    records: Vec<RecordRef>,
}

impl SearchResults {
    pub fn iter(&self) -> std::slice::Iter<'_, RecordRef> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<RecordRef> {
        self.records
    }
}

impl IntoIterator for SearchResults {
    type Item = RecordRef;
    type IntoIter = std::vec::IntoIter<RecordRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a RecordRef;
    type IntoIter = std::slice::Iter<'a, RecordRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Encrypted record lifecycle, gated by the [`AccessController`].
pub struct RecordVault {
    blobs: Arc<dyn BlobStore>,
    access: Arc<AccessController>,
    audit: AuditLog,
    timeout: Duration,
}

impl RecordVault {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        access: Arc<AccessController>,
        audit: AuditLog,
        timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            access,
            audit,
            timeout,
        }
    }

    /// Encrypt and store a record owned by the session's actor.
    pub async fn upload(&self, owner: &Session, plaintext: &[u8]) -> Result<RecordRef> {
        self.upload_tagged(owner, plaintext, std::iter::empty::<String>())
            .await
    }

    /// [`upload`](Self::upload) with searchable metadata tags.
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
        let record_id = RecordId::generate();
        let content_key = ContentKey::generate();
        let envelope = Envelope::encrypt(plaintext, &content_key)?;
        let owner_key = WrappedKey::wrap(
            &content_key,
            &owner.public_keys().sealing,
            &key_context(&record_id),
        )?;

        let content_address = bounded::<_, VaultError, _>(
            self.timeout,
            "blob put",
            self.blobs.put(Bytes::from(envelope.to_bytes()?)),
        )
        .await?;

        let record = RecordRef {
            record_id,
            owner_id: owner.actor_id().clone(),
            content_address,
            created_at: now_millis(),
            tags: tags.into_iter().map(Into::into).collect::<BTreeSet<_>>(),
        };

        let access = Arc::clone(&self.access);
        let registered = record.clone();
        let (_, applied) = self
            .audit
            .append_then(
                owner.actor_id(),
                AuditAction::RecordUploaded,
                SubjectId::from(record_id),
                move |_| access.register_record(registered, owner_key),
            )
            .await?;
        applied?;

        info!(record = %record_id, owner = %record.owner_id, "record uploaded");
        Ok(record)
    }

    /// Decrypt a record for the session's actor.
    ///
    /// Authorization and the key to unwrap come from one snapshot of the
    /// grant state. A revoke that commits after that snapshot does not
    /// affect this read; any read starting after it is denied.
    pub async fn read(&self, reader: &Session, record_id: &RecordId) -> Result<Vec<u8>> {
        let reader_id = reader.actor_id();
        let subject = SubjectId::from(*record_id);

        let access = match self.access.read_access(record_id, reader_id) {
            Ok(access) => access,
            Err(VaultError::Authorization(_)) => {
                warn!(record = %record_id, reader = %reader_id, "record access denied");
                self.audit
                    .append(reader_id, AuditAction::RecordAccessDenied, subject)
                    .await?;
                return Err(VaultError::AccessDenied {
                    actor: reader_id.clone(),
                    record_id: *record_id,
                });
            }
            Err(e) => return Err(self.fail_read(reader_id, record_id, e).await),
        };

        match self.decrypt(reader, &access.record, &access.wrapped_key).await {
            Ok(plaintext) => {
                self.audit
                    .append(reader_id, AuditAction::RecordAccessed, subject)
                    .await?;
                debug!(
                    record = %record_id,
                    reader = %reader_id,
                    via_grant = access.via_grant,
                    "record read"
                );
                Ok(plaintext)
            }
            Err(e) => Err(self.fail_read(reader_id, record_id, e).await),
        }
    }

    async fn decrypt(
        &self,
        reader: &Session,
        record: &RecordRef,
        wrapped_key: &WrappedKey,
    ) -> Result<Vec<u8>> {
        let bytes = bounded::<_, VaultError, _>(
            self.timeout,
            "blob get",
            self.blobs.get(&record.content_address),
        )
        .await?;
        let envelope = Envelope::from_bytes(&bytes)?;
        let content_key = wrapped_key.unwrap_key(reader.sealing_secret(), &record.key_context())?;
        Ok(envelope.decrypt(&content_key)?)
    }

    /// Audit a failed read and hand back the error to return.
    ///
    /// If the failure entry itself cannot be written, that error wins.
    async fn fail_read(&self, reader: &ActorId, record_id: &RecordId, cause: VaultError) -> VaultError {
        warn!(record = %record_id, reader = %reader, error = %cause, "record access failed");
        match self
            .audit
            .append(reader, AuditAction::RecordAccessFailed, SubjectId::from(*record_id))
            .await
        {
            Ok(_) => cause,
            Err(audit) => audit.into(),
        }
    }

    /// Metadata of records the session's actor may read that match `query`.
    ///
    /// Never touches ciphertext. The search itself is audited.
    pub async fn search(&self, requester: &Session, query: &SearchQuery) -> Result<SearchResults> {
        let records: Vec<RecordRef> = self
            .access
            .visible_records(requester.actor_id())?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();

        self.audit
            .append(
                requester.actor_id(),
                AuditAction::RecordsSearched,
                SubjectId::from(requester.actor_id()),
            )
            .await?;

        debug!(requester = %requester.actor_id(), hits = records.len(), "records searched");
        Ok(SearchResults { records })
    }
}

impl std::fmt::Debug for RecordVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordVault")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

