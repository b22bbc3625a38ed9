//! Error types for the engine.

use medvault_access::AccessError;
use medvault_core::{ActorId, CoreError, RecordId, RequestId};
use medvault_store::StoreError;
use thiserror::Error;

/// A BlobStore or Ledger call exceeded its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} timed out after {after_ms} ms")]
pub struct StorageTimeout {
    pub operation: &'static str,
    pub after_ms: u64,
}

/// Errors raised by the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The chain fails verification at this seq.
    #[error("audit chain broken at seq {seq}")]
    BrokenAt { seq: u64 },

    /// The ledger did not answer in time. Nothing was appended.
    #[error("audit storage timeout: {0}")]
    Timeout(#[from] StorageTimeout),

    /// The ledger rejected or failed the write.
    #[error("audit storage error: {0}")]
    Store(#[from] StoreError),

    /// The append task panicked.
    #[error("audit append task failed: {0}")]
    Task(String),
}

/// Result type for audit operations.
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The actor lacks the ownership or role the operation requires.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// A pending request already exists for this record and requester.
    #[error("conflict: request {existing} is already pending")]
    Conflict { existing: RequestId },

    /// Transition attempted from the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Key mismatch, corrupted ciphertext, or a bad signature.
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Storage did not answer in time. Retryable.
    #[error("storage timeout: {0}")]
    StorageTimeout(#[from] StorageTimeout),

    /// The record, request, actor, or blob does not exist. Terminal.
    #[error("not found: {0}")]
    NotFound(String),

    /// The reader holds no active grant for the record.
    #[error("access denied: {actor} may not read record {record_id}")]
    AccessDenied { actor: ActorId, record_id: RecordId },

    /// The audit log failed; the triggering operation did not happen.
    #[error("audit error: {0}")]
    Audit(AuditError),

    /// Storage failure other than timeout or not-found.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// Encryption or serialization failure.
    #[error("crypto error: {0}")]
    Crypto(CoreError),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// In-process state is unusable (poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),
}

impl VaultError {
    /// Whether the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::StorageTimeout(_))
    }
}

impl From<AuditError> for VaultError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::Timeout(t) => VaultError::StorageTimeout(t),
            other => VaultError::Audit(other),
        }
    }
}

impl From<StoreError> for VaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => VaultError::NotFound(what),
            other => VaultError::Store(other),
        }
    }
}

impl From<CoreError> for VaultError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Decryption(msg) => VaultError::Decryption(msg),
            CoreError::InvalidSignature => VaultError::Decryption("invalid signature".into()),
            other => VaultError::Crypto(other),
        }
    }
}

impl From<AccessError> for VaultError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::RecordNotFound(id) => VaultError::NotFound(format!("record {id}")),
            AccessError::RequestNotFound(id) => VaultError::NotFound(format!("request {id}")),
            AccessError::Conflict { existing } => VaultError::Conflict { existing },
            AccessError::Unauthorized { .. } => VaultError::Authorization(err.to_string()),
            AccessError::InvalidState { .. }
            | AccessError::OwnRecord(..)
            | AccessError::DuplicateRecord(_) => VaultError::InvalidState(err.to_string()),
        }
    }
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_retryable() {
        let timeout = StorageTimeout {
            operation: "blob get",
            after_ms: 10,
        };
        assert!(VaultError::from(timeout).is_retryable());
        assert!(VaultError::from(AuditError::Timeout(timeout)).is_retryable());
        assert!(!VaultError::NotFound("x".into()).is_retryable());
        assert!(!VaultError::from(AuditError::BrokenAt { seq: 3 }).is_retryable());
    }

    #[test]
    fn test_store_not_found_maps_to_not_found() {
        let err = VaultError::from(StoreError::NotFound("blob".into()));
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[test]
    fn test_access_errors_map_to_taxonomy() {
        let existing = RequestId::generate();
        assert!(matches!(
            VaultError::from(AccessError::Conflict { existing }),
            VaultError::Conflict { existing: e } if e == existing
        ));
        assert!(matches!(
            VaultError::from(AccessError::Unauthorized {
                actor: ActorId::new("did:eth:x"),
                action: "decide this request",
            }),
            VaultError::Authorization(_)
        ));
    }
}
