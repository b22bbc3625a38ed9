//! Error types for the access module.

use thiserror::Error;

use medvault_core::{ActorId, RecordId, RequestId};

use crate::request::RequestStatus;

/// Errors raised when a transition would break the access state machine.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The record is not registered.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The sharing request does not exist.
    #[error("sharing request not found: {0}")]
    RequestNotFound(RequestId),

    /// A record with this id is already registered.
    #[error("record already registered: {0}")]
    DuplicateRecord(RecordId),

    /// A pending request already exists for the (record, requester) pair.
    #[error("request {existing} is already pending for this record and requester")]
    Conflict { existing: RequestId },

    /// The request is not in a state that allows the transition.
    #[error("request {request_id} is {status}, transition not allowed")]
    InvalidState {
        request_id: RequestId,
        status: RequestStatus,
    },

    /// The owner asked for access to their own record.
    #[error("{0} already owns record {1}")]
    OwnRecord(ActorId, RecordId),

    /// The actor lacks the ownership or role the transition requires.
    #[error("{actor} is not authorized to {action}")]
    Unauthorized { actor: ActorId, action: &'static str },
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;
