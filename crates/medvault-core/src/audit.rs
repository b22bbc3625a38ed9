//! Audit entry format.
//!
//! Entries form a hash chain: each `entry_hash` covers the previous entry's
//! hash, so altering or removing any entry invalidates every hash after it.
//! The log's signing key additionally signs each `entry_hash`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, SigningKeypair};
use crate::error::CoreError;
use crate::types::{ActorId, SubjectId};

const ENTRY_DOMAIN: &str = "medvault audit entry v1";

/// `prev_hash` of the entry at seq 0.
pub const GENESIS_HASH: Blake3Hash = Blake3Hash::ZERO;

/// Security-relevant actions recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SharingRequestCreated,
    SharingRequestApproved,
    SharingRequestDenied,
    AccessRevoked,
    RecordUploaded,
    RecordAccessed,
    RecordAccessDenied,
    RecordAccessFailed,
    RecordsSearched,
    MessageSent,
    InboxRead,
}

impl AuditAction {
    pub const ALL: [AuditAction; 11] = [
        AuditAction::SharingRequestCreated,
        AuditAction::SharingRequestApproved,
        AuditAction::SharingRequestDenied,
        AuditAction::AccessRevoked,
        AuditAction::RecordUploaded,
        AuditAction::RecordAccessed,
        AuditAction::RecordAccessDenied,
        AuditAction::RecordAccessFailed,
        AuditAction::RecordsSearched,
        AuditAction::MessageSent,
        AuditAction::InboxRead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SharingRequestCreated => "sharing_request_created",
            AuditAction::SharingRequestApproved => "sharing_request_approved",
            AuditAction::SharingRequestDenied => "sharing_request_denied",
            AuditAction::AccessRevoked => "access_revoked",
            AuditAction::RecordUploaded => "record_uploaded",
            AuditAction::RecordAccessed => "record_accessed",
            AuditAction::RecordAccessDenied => "record_access_denied",
            AuditAction::RecordAccessFailed => "record_access_failed",
            AuditAction::RecordsSearched => "records_searched",
            AuditAction::MessageSent => "message_sent",
            AuditAction::InboxRead => "inbox_read",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| CoreError::Serialization(format!("unknown audit action: {s}")))
    }
}

/// One immutable entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub prev_hash: Blake3Hash,
    pub entry_hash: Blake3Hash,
    pub actor_id: ActorId,
    pub action: AuditAction,
    pub subject_id: SubjectId,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Log signature over `entry_hash`.
    pub signature: Ed25519Signature,
}

impl AuditEntry {
    /// Build and sign the entry that follows `prev_hash` at position `seq`.
    pub fn create(
        seq: u64,
        prev_hash: Blake3Hash,
        actor_id: ActorId,
        action: AuditAction,
        subject_id: SubjectId,
        timestamp: i64,
        signer: &SigningKeypair,
    ) -> Self {
        let entry_hash =
            Self::compute_hash(&prev_hash, &actor_id, action, &subject_id, timestamp, seq);
        Self {
            seq,
            prev_hash,
            entry_hash,
            actor_id,
            action,
            subject_id,
            timestamp,
            signature: signer.sign(entry_hash.as_bytes()),
        }
    }

    /// `Hash(prevHash ‖ actorId ‖ action ‖ subjectId ‖ timestamp ‖ seq)`.
    pub fn compute_hash(
        prev_hash: &Blake3Hash,
        actor_id: &ActorId,
        action: AuditAction,
        subject_id: &SubjectId,
        timestamp: i64,
        seq: u64,
    ) -> Blake3Hash {
        Blake3Hash::derive(
            ENTRY_DOMAIN,
            &[
                prev_hash.as_bytes(),
                actor_id.as_str().as_bytes(),
                action.as_str().as_bytes(),
                subject_id.as_str().as_bytes(),
                &timestamp.to_le_bytes(),
                &seq.to_le_bytes(),
            ],
        )
    }

    /// Recompute the hash from the stored fields.
    pub fn recompute_hash(&self) -> Blake3Hash {
        Self::compute_hash(
            &self.prev_hash,
            &self.actor_id,
            self.action,
            &self.subject_id,
            self.timestamp,
            self.seq,
        )
    }

    /// True if the stored hash matches the fields and the signature matches the hash.
    pub fn is_intact(&self, log_key: &Ed25519PublicKey) -> bool {
        self.recompute_hash() == self.entry_hash
            && log_key.is_valid(self.entry_hash.as_bytes(), &self.signature)
    }

    /// True if this entry is the direct successor of `previous`.
    pub fn follows(&self, previous: &AuditEntry) -> bool {
        self.seq == previous.seq + 1 && self.prev_hash == previous.entry_hash
    }
}
