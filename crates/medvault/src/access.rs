//! The access controller.
//!
//! Wraps [`AccessState`] with per-pair serialization and audit logging.
//! Every transition follows the same order:
//!
//! 1. take the (record, actor) pair lock
//! 2. validate against current state
//! 3. append the audit entry
//! 4. apply the mutation
//!
//! If step 3 fails the state is untouched. Steps 3 and 4 run in one task
//! that holds the pair lock, so once the append has started the mutation
//! happens even if the caller goes away. No transition exists without its
//! entry and no entry exists without its transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use medvault_access::{
    key_context, AccessGrant, AccessState, Decision, DecisionPolicy, GrantIssue, ReadAccess,
    RecordRef, SharingRequest,
};
use medvault_core::{
    now_millis, ActorId, AuditAction, RecordId, RequestId, Role, SubjectId, WrappedKey,
};

use crate::audit::AuditLog;
use crate::config::VaultConfig;
use crate::error::{Result, VaultError};
use crate::session::{Directory, Session};

type Pair = (RecordId, ActorId);

fn read_state(state: &RwLock<AccessState>) -> Result<RwLockReadGuard<'_, AccessState>> {
    state
        .read()
        .map_err(|e| VaultError::Internal(format!("access state lock: {e}")))
}

fn write_state(state: &RwLock<AccessState>) -> Result<RwLockWriteGuard<'_, AccessState>> {
    state
        .write()
        .map_err(|e| VaultError::Internal(format!("access state lock: {e}")))
}

/// Prune idle pair locks once the table grows past this.
const PAIR_LOCK_PRUNE_AT: usize = 1024;

/// Sharing-request state machine and grant registry.
pub struct AccessController {
    state: Arc<RwLock<AccessState>>,
    pair_locks: Mutex<HashMap<Pair, Arc<AsyncMutex<()>>>>,
    audit: AuditLog,
    directory: Arc<Directory>,
    policy: DecisionPolicy,
    config: VaultConfig,
}

impl AccessController {
    pub fn new(audit: AuditLog, directory: Arc<Directory>, config: VaultConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(AccessState::new())),
            pair_locks: Mutex::new(HashMap::new()),
            audit,
            directory,
            policy: DecisionPolicy {
                auditor_override: config.auditor_override,
            },
            config,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, AccessState>> {
        read_state(&self.state)
    }

    async fn lock_pair(&self, record_id: RecordId, actor: &ActorId) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .pair_locks
                .lock()
                .map_err(|e| VaultError::Internal(format!("pair lock table: {e}")))?;
            if locks.len() >= PAIR_LOCK_PRUNE_AT {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            Arc::clone(locks.entry((record_id, actor.clone())).or_default())
        };
        Ok(lock.lock_owned().await)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Register an uploaded record. Called after its upload entry is durable.
    pub(crate) fn register_record(&self, record: RecordRef, owner_key: WrappedKey) -> Result<()> {
        write_state(&self.state)?.register_record(record, owner_key)?;
        Ok(())
    }

    pub fn record(&self, record_id: &RecordId) -> Result<RecordRef> {
        self.read()?
            .record(record_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("record {record_id}")))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a pending request for `record_id`.
    ///
    /// Fails with `Conflict` if the requester already has one pending.
    pub async fn request_access(
        &self,
        requester: &Session,
        record_id: &RecordId,
    ) -> Result<SharingRequest> {
        let requester_id = requester.actor_id();
        let pair = self.lock_pair(*record_id, requester_id).await?;

        let request = self.read()?.check_request(requester_id, record_id, now_millis())?;

        let state = Arc::clone(&self.state);
        let pending = request.clone();
        let (_, applied) = self
            .audit
            .append_then(
                requester_id,
                AuditAction::SharingRequestCreated,
                SubjectId::from(*record_id),
                move |_| -> Result<_> {
                    let _pair = pair;
                    write_state(&state)?.apply_request(pending)?;
                    Ok(())
                },
            )
            .await?;
        applied?;

        info!(
            request = %request.request_id,
            record = %record_id,
            requester = %requester_id,
            "sharing request created"
        );
        Ok(request)
    }

    /// Approve or deny a pending request.
    ///
    /// Only the owner may decide; with auditor override enabled an auditor
    /// may deny. Approval unwraps the owner's copy of the content key with
    /// the deciding session and wraps it for the requester.
    pub async fn decide(
        &self,
        decider: &Session,
        request_id: &RequestId,
        decision: Decision,
    ) -> Result<SharingRequest> {
        let (record_id, requester_id) = self
            .read()?
            .request(request_id)
            .map(SharingRequest::pair)
            .ok_or_else(|| VaultError::NotFound(format!("request {request_id}")))?;
        let pair = self.lock_pair(record_id, &requester_id).await?;

        let decider_id = decider.actor_id();
        let (request, owner_key) = {
            let state = self.read()?;
            let request = state.check_decision(
                request_id,
                decision,
                decider_id,
                decider.role(),
                self.policy,
            )?;
            (request, state.owner_key(&record_id).cloned())
        };

        let now = now_millis();
        let issue = match decision {
            Decision::Approved => {
                let owner_key = owner_key
                    .ok_or_else(|| VaultError::NotFound(format!("record {record_id}")))?;
                let grantee = self.directory.lookup(&request.requester_id)?;
                let context = key_context(&record_id);
                let content_key = owner_key.unwrap_key(decider.sealing_secret(), &context)?;
                Some(GrantIssue {
                    wrapped_key: WrappedKey::wrap(&content_key, &grantee.keys.sealing, &context)?,
                    expires_at: self.config.grant_expiry(now),
                })
            }
            Decision::Denied => None,
        };

        let state = Arc::clone(&self.state);
        let (request_id, decider_owned) = (*request_id, decider_id.clone());
        let (_, decided) = self
            .audit
            .append_then(
                decider_id,
                decision.audit_action(),
                SubjectId::from(record_id),
                move |_| -> Result<_> {
                    let _pair = pair;
                    let decided = write_state(&state)?.apply_decision(
                        &request_id,
                        decision,
                        &decider_owned,
                        now,
                        issue,
                    )?;
                    Ok(decided)
                },
            )
            .await?;
        let decided = decided?;

        info!(
            request = %request_id,
            record = %record_id,
            decider = %decider_id,
            status = %decided.status,
            "sharing request decided"
        );
        Ok(decided)
    }

    /// Revoke `grantee`'s access to `record_id`.
    ///
    /// Only the owner may revoke. Revoking with no active grant succeeds and
    /// is still audited, but changes nothing.
    pub async fn revoke(&self, revoker: &Session, record_id: &RecordId, grantee: &ActorId) -> Result<()> {
        let revoker_id = revoker.actor_id();
        let pair = self.lock_pair(*record_id, grantee).await?;

        let had_grant = self
            .read()?
            .check_revoke(record_id, grantee, revoker_id, now_millis())?;

        let state = Arc::clone(&self.state);
        let (rid, grantee_owned) = (*record_id, grantee.clone());
        let (_, changed) = self
            .audit
            .append_then(
                revoker_id,
                AuditAction::AccessRevoked,
                SubjectId::from(*record_id),
                move |_| -> Result<_> {
                    let _pair = pair;
                    let changed =
                        write_state(&state)?.apply_revoke(&rid, &grantee_owned, now_millis());
                    Ok(changed)
                },
            )
            .await?;
        let changed = changed?;

        if had_grant || changed {
            info!(record = %record_id, grantee = %grantee, "access revoked");
        } else {
            debug!(record = %record_id, grantee = %grantee, "revoke found no active grant");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// True iff `actor` owns the record or holds an active grant on it.
    pub fn is_authorized(&self, record_id: &RecordId, actor: &ActorId) -> Result<bool> {
        Ok(self.read()?.is_authorized(record_id, actor, now_millis()))
    }

    /// Authorization decision and key in one snapshot.
    pub(crate) fn read_access(&self, record_id: &RecordId, actor: &ActorId) -> Result<ReadAccess> {
        Ok(self.read()?.read_access(record_id, actor, now_millis())?)
    }

    pub(crate) fn visible_records(&self, actor: &ActorId) -> Result<Vec<RecordRef>> {
        Ok(self.read()?.visible_records(actor, now_millis()))
    }

    pub fn request(&self, request_id: &RequestId) -> Result<SharingRequest> {
        self.read()?
            .request(request_id)
            .cloned()
            .ok_or_else(|| VaultError::NotFound(format!("request {request_id}")))
    }

    /// Pending requests on records the session's actor owns.
    pub fn pending_requests_for(&self, owner: &Session) -> Result<Vec<SharingRequest>> {
        Ok(self.read()?.pending_for_owner(owner.actor_id()))
    }

    /// Grant history of a record. Visible to its owner and to auditors.
    pub fn grants_for(&self, viewer: &Session, record_id: &RecordId) -> Result<Vec<AccessGrant>> {
        let state = self.read()?;
        let record = state
            .record(record_id)
            .ok_or_else(|| VaultError::NotFound(format!("record {record_id}")))?;
        if &record.owner_id != viewer.actor_id() && viewer.role() != Role::Auditor {
            return Err(VaultError::Authorization(format!(
                "{} may not list grants of record {record_id}",
                viewer.actor_id()
            )));
        }
        Ok(state.grants_for(record_id))
    }
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
