//! # MedVault Core
//!
//! Pure primitives for the MedVault access-control engine: identifiers,
//! hashing, signing, sealing, and the hash-chained audit entry format.
//!
//! This crate contains no I/O, no storage, no concurrency. Every function is
//! deterministic given its inputs (and the RNG, for key and nonce generation).
//!
//! ## Key Types
//!
//! - [`ActorId`], [`Role`] - identity handed over by the upstream verifier
//! - [`RecordId`], [`RequestId`], [`MessageId`] - random 128-bit identifiers
//! - [`ContentAddress`] - Blake3 locator of stored bytes
//! - [`SealedBox`], [`Envelope`], [`WrappedKey`] - the sealing primitives
//! - [`AuditEntry`] - one link of the tamper-evident audit chain

pub mod audit;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod seal;
pub mod types;

pub use audit::{AuditAction, AuditEntry, GENESIS_HASH};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, SigningKeypair};
pub use error::{CoreError, Result};
pub use keys::{ActorKeys, ActorPublicKeys};
pub use seal::{ContentKey, Envelope, SealNonce, SealedBox, SealingSecret, WrappedKey, X25519PublicKey};
pub use types::{now_millis, ActorId, ContentAddress, MessageId, RecordId, RequestId, Role, SubjectId};
