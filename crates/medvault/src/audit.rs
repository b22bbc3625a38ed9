//! The audit log.
//!
//! One logical writer extends a hash chain stored in a [`Ledger`]. Every
//! entry is signed with the log's key and is durable before `append`
//! returns.
//!
//! # Concurrency
//!
//! Appends are serialized by an async mutex around the chain head, so seqs
//! are assigned strictly in order. Each append runs in its own task: once
//! started it completes even if the caller's future is dropped.
//!
//! The storage deadline bounds the caller's wait, not the commit. An append
//! that has not reached the ledger by the deadline is abandoned. One whose
//! commit has started is driven to completion and its effect applied, even
//! if the caller already received [`StorageTimeout`](crate::StorageTimeout).
//! A backend may finish a write after its future stops being polled, so a
//! started commit is never dropped.
//!
//! A failed commit leaves the in-memory head marked stale; the next append
//! reloads the head from the ledger before building its entry.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use medvault_core::{
    now_millis, ActorId, AuditAction, AuditEntry, Blake3Hash, Ed25519PublicKey, SigningKeypair,
    SubjectId, GENESIS_HASH,
};
use medvault_store::{next_seq, Ledger, StoreError};

use crate::deadline::{bounded, expired};
use crate::error::{AuditError, AuditResult};

#[derive(Debug, Clone, Copy)]
struct ChainHead {
    next_seq: u64,
    last_hash: Blake3Hash,
    stale: bool,
}

impl ChainHead {
    fn from_entry(head: Option<&AuditEntry>) -> Self {
        Self {
            next_seq: next_seq(head),
            last_hash: head.map(|e| e.entry_hash).unwrap_or(GENESIS_HASH),
            stale: false,
        }
    }
}

struct LogInner {
    ledger: Arc<dyn Ledger>,
    signer: SigningKeypair,
    head: Mutex<ChainHead>,
    timeout: Duration,
    page_size: usize,
}

impl LogInner {
    async fn load_head(&self) -> AuditResult<ChainHead> {
        let head =
            bounded::<_, AuditError, _>(self.timeout, "ledger head", self.ledger.head()).await?;
        Ok(ChainHead::from_entry(head.as_ref()))
    }

    async fn append(
        &self,
        actor_id: ActorId,
        action: AuditAction,
        subject_id: SubjectId,
        deadline: Instant,
    ) -> AuditResult<AuditEntry> {
        let mut head = tokio::time::timeout_at(deadline, self.head.lock())
            .await
            .map_err(|_| expired(self.timeout, "audit writer"))?;
        if head.stale {
            *head = self.load_head().await?;
            debug!(next_seq = head.next_seq, "audit head resynced from ledger");
        }
        if Instant::now() >= deadline {
            return Err(expired(self.timeout, "ledger commit").into());
        }

        let entry = AuditEntry::create(
            head.next_seq,
            head.last_hash,
            actor_id,
            action,
            subject_id,
            now_millis(),
            &self.signer,
        );

        // Not bounded: the write may land even if we stop waiting for it.
        match self.ledger.commit(&entry).await {
            Ok(()) => {
                head.next_seq = entry.seq + 1;
                head.last_hash = entry.entry_hash;
                debug!(
                    seq = entry.seq,
                    action = %entry.action,
                    actor = %entry.actor_id,
                    subject = %entry.subject_id,
                    "audit entry appended"
                );
                Ok(entry)
            }
            Err(e) => {
                head.stale = true;
                let e = AuditError::from(e);
                error!(seq = entry.seq, action = %entry.action, error = %e, "audit append failed");
                Err(e)
            }
        }
    }
}

/// Running state of a chain walk.
struct ChainCheck {
    log_key: Ed25519PublicKey,
    expected_seq: u64,
    prev_hash: Blake3Hash,
}

impl ChainCheck {
    fn new(log_key: Ed25519PublicKey) -> Self {
        Self {
            log_key,
            expected_seq: 0,
            prev_hash: GENESIS_HASH,
        }
    }

    fn step(&mut self, entry: &AuditEntry) -> AuditResult<()> {
        if entry.seq != self.expected_seq
            || entry.prev_hash != self.prev_hash
            || !entry.is_intact(&self.log_key)
        {
            return Err(self.broken(entry.seq));
        }
        self.prev_hash = entry.entry_hash;
        self.expected_seq += 1;
        Ok(())
    }

    fn broken(&self, seq: u64) -> AuditError {
        let seq = self.expected_seq.min(seq);
        warn!(seq, "audit chain verification failed");
        AuditError::BrokenAt { seq }
    }
}

/// Append-only, hash-chained, signed audit trail.
///
/// Cheap to clone; clones share the same writer.
#[derive(Clone)]
pub struct AuditLog {
    inner: Arc<LogInner>,
}

impl AuditLog {
    /// Open the log over `ledger`, resuming from its current head.
    pub async fn open(
        ledger: Arc<dyn Ledger>,
        signer: SigningKeypair,
        timeout: Duration,
        page_size: usize,
    ) -> AuditResult<Self> {
        let head = bounded::<_, AuditError, _>(timeout, "ledger head", ledger.head()).await?;
        let head = ChainHead::from_entry(head.as_ref());
        debug!(next_seq = head.next_seq, "audit log opened");
        Ok(Self {
            inner: Arc::new(LogInner {
                ledger,
                signer,
                head: Mutex::new(head),
                timeout,
                page_size: page_size.max(1),
            }),
        })
    }

    /// The key that verifies every entry's signature.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.inner.signer.public_key()
    }

    /// Append one entry and return it once it is durable.
    pub async fn append(
        &self,
        actor_id: &ActorId,
        action: AuditAction,
        subject_id: SubjectId,
    ) -> AuditResult<AuditEntry> {
        self.append_then(actor_id, action, subject_id, |_| ())
            .await
            .map(|(entry, ())| entry)
    }

    /// Append one entry, then run `effect` once it is durable.
    ///
    /// Both happen in one spawned task, so dropping the returned future
    /// after the append has started cannot separate the entry from its
    /// effect. `effect` is skipped if the append fails.
    ///
    /// A `Timeout` error means the outcome is unknown: the entry and its
    /// effect may still land together after the deadline.
    pub async fn append_then<T, F>(
        &self,
        actor_id: &ActorId,
        action: AuditAction,
        subject_id: SubjectId,
        effect: F,
    ) -> AuditResult<(AuditEntry, T)>
    where
        F: FnOnce(&AuditEntry) -> T + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let actor_id = actor_id.clone();
        let limit = inner.timeout;
        let now = Instant::now();
        // Same cap tokio applies to an unrepresentable timeout.
        let deadline = now
            .checked_add(limit)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30));
        let task = tokio::spawn(async move {
            let entry = inner.append(actor_id, action, subject_id, deadline).await?;
            let out = effect(&entry);
            Ok::<_, AuditError>((entry, out))
        });

        match tokio::time::timeout_at(deadline, task).await {
            Ok(joined) => joined.map_err(|e| AuditError::Task(e.to_string()))?,
            Err(_) => Err(expired(limit, "ledger commit").into()),
        }
    }

    /// Number of committed entries.
    pub async fn len(&self) -> AuditResult<u64> {
        bounded(self.inner.timeout, "ledger len", self.inner.ledger.len()).await
    }

    /// Recompute the chain from seq 0 upward.
    ///
    /// Fails with `BrokenAt(seq)` at the first entry whose seq, link to its
    /// predecessor, hash, or signature is wrong, or that no longer decodes.
    pub async fn verify_chain(&self) -> AuditResult<()> {
        let mut check = ChainCheck::new(self.public_key());
        let mut cursor = self.entries();

        loop {
            match cursor.next().await {
                Ok(Some(entry)) => check.step(&entry)?,
                Ok(None) => break,
                Err(AuditError::Store(StoreError::Corrupt { seq, reason })) => {
                    // The failed page may hold earlier rows that are also broken.
                    let limit = usize::try_from(seq.saturating_sub(check.expected_seq))
                        .unwrap_or(usize::MAX);
                    let before = bounded::<_, AuditError, _>(
                        self.inner.timeout,
                        "ledger entries_range",
                        self.inner.ledger.entries_range(check.expected_seq, limit),
                    )
                    .await?;
                    for entry in &before {
                        check.step(entry)?;
                    }
                    warn!(seq, %reason, "audit entry does not decode");
                    return Err(check.broken(seq));
                }
                Err(e) => return Err(e),
            }
        }

        debug!(entries = check.expected_seq, "audit chain verified");
        Ok(())
    }

    /// Entries about `subject`, ordered by seq.
    pub fn entries_for(&self, subject: &SubjectId) -> AuditCursor {
        AuditCursor::new(Arc::clone(&self.inner), Some(subject.clone()))
    }

    /// Every entry, ordered by seq.
    pub fn entries(&self) -> AuditCursor {
        AuditCursor::new(Arc::clone(&self.inner), None)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Lazy, restartable walk over audit entries.
///
/// Fetches one page at a time from the ledger. Entries committed after the
/// cursor passed their seq are not revisited until [`restart`](Self::restart).
pub struct AuditCursor {
    log: Arc<LogInner>,
    subject: Option<SubjectId>,
    next_seq: u64,
    buffer: VecDeque<AuditEntry>,
    exhausted: bool,
}

impl AuditCursor {
    fn new(log: Arc<LogInner>, subject: Option<SubjectId>) -> Self {
        Self {
            log,
            subject,
            next_seq: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The next entry, or `None` at the end.
    pub async fn next(&mut self) -> AuditResult<Option<AuditEntry>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Rewind to seq 0.
    pub fn restart(&mut self) {
        self.next_seq = 0;
        self.buffer.clear();
        self.exhausted = false;
    }

    /// Drain the remaining entries.
    pub async fn collect(mut self) -> AuditResult<Vec<AuditEntry>> {
        let mut out = Vec::new();
        while let Some(entry) = self.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    async fn fill(&mut self) -> AuditResult<()> {
        let limit = self.log.page_size;
        let page = match &self.subject {
            Some(subject) => {
                bounded::<_, AuditError, _>(
                    self.log.timeout,
                    "ledger entries_for",
                    self.log.ledger.entries_for(subject, self.next_seq, limit),
                )
                .await?
            }
            None => {
                bounded::<_, AuditError, _>(
                    self.log.timeout,
                    "ledger entries_range",
                    self.log.ledger.entries_range(self.next_seq, limit),
                )
                .await?
            }
        };

        if page.len() < limit {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.next_seq = last.seq + 1;
        }
        self.buffer.extend(page);
        Ok(())
    }
}
