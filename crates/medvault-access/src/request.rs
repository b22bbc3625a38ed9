//! Sharing requests.
//!
//! A request moves `Pending -> Approved | Denied` exactly once, and
//! `Approved -> Revoked` when the owner withdraws access. `Denied` and
//! `Revoked` are terminal.

use std::fmt;

use serde::{Deserialize, Serialize};

use medvault_core::{ActorId, AuditAction, RecordId, RequestId};

/// Lifecycle state of a [`SharingRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Revoked,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Denied => "denied",
            RequestStatus::Revoked => "revoked",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Denied | RequestStatus::Revoked)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An owner's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
}

impl Decision {
    pub fn status(&self) -> RequestStatus {
        match self {
            Decision::Approved => RequestStatus::Approved,
            Decision::Denied => RequestStatus::Denied,
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            Decision::Approved => AuditAction::SharingRequestApproved,
            Decision::Denied => AuditAction::SharingRequestDenied,
        }
    }
}

/// A requester's ask for access to one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingRequest {
    pub request_id: RequestId,
    pub record_id: RecordId,
    pub requester_id: ActorId,
    pub owner_id: ActorId,
    pub status: RequestStatus,
    /// Unix milliseconds.
    pub created_at: i64,
    pub decided_at: Option<i64>,
    /// Who moved the request out of `Pending`.
    pub decided_by: Option<ActorId>,
}

impl SharingRequest {
    /// A fresh pending request.
    pub fn new(record_id: RecordId, requester_id: ActorId, owner_id: ActorId, now: i64) -> Self {
        Self {
            request_id: RequestId::generate(),
            record_id,
            requester_id,
            owner_id,
            status: RequestStatus::Pending,
            created_at: now,
            decided_at: None,
            decided_by: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    /// The (record, requester) pair this request is about.
    pub fn pair(&self) -> (RecordId, ActorId) {
        (self.record_id, self.requester_id.clone())
    }
}
