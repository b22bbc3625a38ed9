//! Access state.
//!
//! Holds registered records, sharing requests, and grants, and enforces on
//! every write:
//!
//! - at most one active grant per (record, grantee) pair
//! - at most one pending request per (record, requester) pair
//!
//! Every transition is split into a `check_*` step, which validates against
//! the current state without changing it, and an `apply_*` step, which
//! performs the mutation. Callers serialize both steps per pair and record
//! the transition durably in between.

use std::collections::HashMap;

use medvault_core::{ActorId, RecordId, RequestId, Role, WrappedKey};

use crate::error::{AccessError, Result};
use crate::grant::AccessGrant;
use crate::record::RecordRef;
use crate::request::{Decision, RequestStatus, SharingRequest};

/// Who besides the owner may decide a pending request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionPolicy {
    /// Auditors may deny (never approve) pending requests.
    pub auditor_override: bool,
}

/// Material for the grant created by an approval.
#[derive(Debug, Clone)]
pub struct GrantIssue {
    /// Content key wrapped for the grantee.
    pub wrapped_key: WrappedKey,
    pub expires_at: Option<i64>,
}

/// A consistent view of what one actor may decrypt for one record.
#[derive(Debug, Clone)]
pub struct ReadAccess {
    pub record: RecordRef,
    /// The owner's key for owners, the grant's key for grantees.
    pub wrapped_key: WrappedKey,
    pub via_grant: bool,
}

#[derive(Debug, Clone)]
struct RecordEntry {
    record: RecordRef,
    owner_key: WrappedKey,
}

type Pair = (RecordId, ActorId);

/// In-memory access state.
#[derive(Debug, Default)]
pub struct AccessState {
    records: HashMap<RecordId, RecordEntry>,

    requests: HashMap<RequestId, SharingRequest>,

    /// Index: (record, requester) -> the one pending request.
    pending: HashMap<Pair, RequestId>,

    /// Grant history per (record, grantee). Only the last can be active.
    grants: HashMap<Pair, Vec<AccessGrant>>,
}

impl AccessState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- records ----

    /// Register an uploaded record together with the owner's wrapped key.
    pub fn register_record(&mut self, record: RecordRef, owner_key: WrappedKey) -> Result<()> {
        if self.records.contains_key(&record.record_id) {
            return Err(AccessError::DuplicateRecord(record.record_id));
        }
        self.records
            .insert(record.record_id, RecordEntry { record, owner_key });
        Ok(())
    }

    pub fn record(&self, record_id: &RecordId) -> Option<&RecordRef> {
        self.records.get(record_id).map(|e| &e.record)
    }

    pub fn owner_key(&self, record_id: &RecordId) -> Option<&WrappedKey> {
        self.records.get(record_id).map(|e| &e.owner_key)
    }

    fn owner_of(&self, record_id: &RecordId) -> Result<&ActorId> {
        self.record(record_id)
            .map(|r| &r.owner_id)
            .ok_or(AccessError::RecordNotFound(*record_id))
    }

    // ---- requests ----

    /// Validate a new request and build it. Does not insert it.
    pub fn check_request(
        &self,
        requester: &ActorId,
        record_id: &RecordId,
        now: i64,
    ) -> Result<SharingRequest> {
        let owner = self.owner_of(record_id)?;
        if owner == requester {
            return Err(AccessError::OwnRecord(requester.clone(), *record_id));
        }
        if let Some(existing) = self.pending.get(&(*record_id, requester.clone())) {
            return Err(AccessError::Conflict {
                existing: *existing,
            });
        }
        Ok(SharingRequest::new(
            *record_id,
            requester.clone(),
            owner.clone(),
            now,
        ))
    }

    /// Insert a request produced by [`check_request`](Self::check_request).
    pub fn apply_request(&mut self, request: SharingRequest) -> Result<()> {
        let pair = request.pair();
        if let Some(existing) = self.pending.get(&pair) {
            return Err(AccessError::Conflict {
                existing: *existing,
            });
        }
        self.pending.insert(pair, request.request_id);
        self.requests.insert(request.request_id, request);
        Ok(())
    }

    pub fn request(&self, request_id: &RequestId) -> Option<&SharingRequest> {
        self.requests.get(request_id)
    }

    pub fn requests(&self) -> impl Iterator<Item = &SharingRequest> {
        self.requests.values()
    }

    /// Pending requests on records owned by `owner`, oldest first.
    pub fn pending_for_owner(&self, owner: &ActorId) -> Vec<SharingRequest> {
        let mut pending: Vec<SharingRequest> = self
            .pending
            .values()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect();
        pending.sort_by_key(|r| (r.created_at, r.request_id));
        pending
    }

    // ---- decisions ----

    /// Validate a decision and return the pending request it applies to.
    pub fn check_decision(
        &self,
        request_id: &RequestId,
        decision: Decision,
        decider: &ActorId,
        role: Role,
        policy: DecisionPolicy,
    ) -> Result<SharingRequest> {
        let request = self
            .requests
            .get(request_id)
            .ok_or(AccessError::RequestNotFound(*request_id))?;

        let is_owner = &request.owner_id == decider;
        let auditor_denial =
            policy.auditor_override && role == Role::Auditor && decision == Decision::Denied;
        if !is_owner && !auditor_denial {
            return Err(AccessError::Unauthorized {
                actor: decider.clone(),
                action: "decide this request",
            });
        }

        if !request.is_pending() {
            return Err(AccessError::InvalidState {
                request_id: *request_id,
                status: request.status,
            });
        }

        Ok(request.clone())
    }

    /// Move a pending request to its decided state.
    ///
    /// An approval creates a grant from `issue`, or refreshes the expiry of
    /// the pair's active grant if there is one.
    pub fn apply_decision(
        &mut self,
        request_id: &RequestId,
        decision: Decision,
        decider: &ActorId,
        now: i64,
        issue: Option<GrantIssue>,
    ) -> Result<SharingRequest> {
        let request = self
            .requests
            .get_mut(request_id)
            .ok_or(AccessError::RequestNotFound(*request_id))?;
        if !request.is_pending() {
            return Err(AccessError::InvalidState {
                request_id: *request_id,
                status: request.status,
            });
        }

        request.status = decision.status();
        request.decided_at = Some(now);
        request.decided_by = Some(decider.clone());
        let request = request.clone();
        self.pending.remove(&request.pair());

        if let (Decision::Approved, Some(issue)) = (decision, issue) {
            let history = self.grants.entry(request.pair()).or_default();
            match history.last_mut().filter(|g| g.is_active(now)) {
                Some(active) => active.refresh(issue.expires_at),
                None => history.push(AccessGrant::new(
                    request.record_id,
                    request.requester_id.clone(),
                    now,
                    issue.expires_at,
                    issue.wrapped_key,
                )),
            }
        }

        Ok(request)
    }

    // ---- revocation ----

    /// Validate a revocation. Returns whether an active grant exists.
    pub fn check_revoke(
        &self,
        record_id: &RecordId,
        grantee: &ActorId,
        revoker: &ActorId,
        now: i64,
    ) -> Result<bool> {
        let owner = self.owner_of(record_id)?;
        if owner != revoker {
            return Err(AccessError::Unauthorized {
                actor: revoker.clone(),
                action: "revoke access to this record",
            });
        }
        Ok(self.active_grant(record_id, grantee, now).is_some())
    }

    /// Revoke the pair's active grant, if any, and mark approved requests
    /// for the pair revoked. Returns whether anything changed.
    pub fn apply_revoke(&mut self, record_id: &RecordId, grantee: &ActorId, now: i64) -> bool {
        let pair = (*record_id, grantee.clone());
        let mut changed = false;

        if let Some(active) = self
            .grants
            .get_mut(&pair)
            .and_then(|h| h.last_mut())
            .filter(|g| g.is_active(now))
        {
            active.revoke(now);
            changed = true;
        }

        for request in self.requests.values_mut() {
            if request.pair() == pair && request.status == RequestStatus::Approved {
                request.status = RequestStatus::Revoked;
                changed = true;
            }
        }

        changed
    }

    // ---- queries ----

    pub fn active_grant(
        &self,
        record_id: &RecordId,
        grantee: &ActorId,
        now: i64,
    ) -> Option<&AccessGrant> {
        self.grants
            .get(&(*record_id, grantee.clone()))
            .and_then(|h| h.last())
            .filter(|g| g.is_active(now))
    }

    /// Grant history of a record, oldest first.
    pub fn grants_for(&self, record_id: &RecordId) -> Vec<AccessGrant> {
        let mut grants: Vec<AccessGrant> = self
            .grants
            .iter()
            .filter(|((rid, _), _)| rid == record_id)
            .flat_map(|(_, history)| history.iter().cloned())
            .collect();
        grants.sort_by(|a, b| {
            (a.granted_at, &a.grantee_id).cmp(&(b.granted_at, &b.grantee_id))
        });
        grants
    }

    /// True iff `actor` owns the record or holds an active grant on it.
    pub fn is_authorized(&self, record_id: &RecordId, actor: &ActorId, now: i64) -> bool {
        match self.record(record_id) {
            Some(record) => {
                &record.owner_id == actor || self.active_grant(record_id, actor, now).is_some()
            }
            None => false,
        }
    }

    /// The record and the key `actor` may unwrap, as of `now`.
    pub fn read_access(&self, record_id: &RecordId, actor: &ActorId, now: i64) -> Result<ReadAccess> {
        let entry = self
            .records
            .get(record_id)
            .ok_or(AccessError::RecordNotFound(*record_id))?;

        if &entry.record.owner_id == actor {
            return Ok(ReadAccess {
                record: entry.record.clone(),
                wrapped_key: entry.owner_key.clone(),
                via_grant: false,
            });
        }

        match self.active_grant(record_id, actor, now) {
            Some(grant) => Ok(ReadAccess {
                record: entry.record.clone(),
                wrapped_key: grant.wrapped_key.clone(),
                via_grant: true,
            }),
            None => Err(AccessError::Unauthorized {
                actor: actor.clone(),
                action: "read this record",
            }),
        }
    }

    /// Metadata of every record `actor` may read, oldest first.
    pub fn visible_records(&self, actor: &ActorId, now: i64) -> Vec<RecordRef> {
        let mut records: Vec<RecordRef> = self
            .records
            .values()
            .map(|e| &e.record)
            .filter(|r| self.is_authorized(&r.record_id, actor, now))
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.created_at, r.record_id));
        records
    }
}
