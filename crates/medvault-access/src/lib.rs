//! # MedVault Access
//!
//! The consent model: sharing requests, their approval state machine, and
//! the grant registry that decides who may decrypt which record.
//!
//! ## Overview
//!
//! A requester asks for access to a record. The owner approves or denies the
//! pending request exactly once. Approval creates an [`AccessGrant`] carrying
//! the record's content key wrapped for the grantee. The owner may revoke the
//! grant at any time; grants may also expire.
//!
//! [`AccessState`] is synchronous and does no I/O. The engine crate wraps it
//! with locking and audit logging.
//!
//! ## Key Types
//!
//! - [`AccessState`] - records, requests, and grants with their invariants
//! - [`SharingRequest`] / [`RequestStatus`] / [`Decision`] - the state machine
//! - [`AccessGrant`] - an active or historical permission
//! - [`RecordRef`] - searchable record metadata

pub mod error;
pub mod grant;
pub mod record;
pub mod request;
pub mod state;

pub use error::{AccessError, Result};
pub use grant::AccessGrant;
pub use record::{key_context, RecordRef};
pub use request::{Decision, RequestStatus, SharingRequest};
pub use state::{AccessState, DecisionPolicy, GrantIssue, ReadAccess};
