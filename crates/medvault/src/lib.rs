//! # MedVault
//!
//! Access-control and audit engine for encrypted health records.
//!
//! ## Overview
//!
//! - [`AuditLog`] - append-only, hash-chained, signed trail of every
//!   security-relevant action
//! - [`AccessController`] - sharing requests and grants, serialized per
//!   (record, actor) pair
//! - [`RecordVault`] - per-record encryption, gated reads, metadata search
//! - [`SecureMailbox`] - sealed, signed peer-to-peer messages
//! - [`Kernel`] - all of the above over one blob store and one ledger
//!
//! Callers arrive with a [`Session`]: an identity verified upstream plus the
//! keys generated for that session.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use medvault::{Decision, Kernel, Session, VaultConfig, VerifiedActor};
//! use medvault_core::{Role, SigningKeypair};
//!
//! async fn example() -> medvault::Result<()> {
//!     let kernel = Kernel::in_memory(SigningKeypair::generate(), VaultConfig::default()).await?;
//!
//!     let patient = Session::establish(VerifiedActor::new("did:eth:patient1", Role::Patient));
//!     let physician = Session::establish(VerifiedActor::new("did:eth:physician1", Role::Physician));
//!     kernel.register(&patient)?;
//!     kernel.register(&physician)?;
//!
//!     let record = kernel.upload(&patient, b"lab results").await?;
//!     let request = kernel.request_access(&physician, &record.record_id).await?;
//!     kernel.decide(&patient, &request.request_id, Decision::Approved).await?;
//!
//!     let plaintext = kernel.read(&physician, &record.record_id).await?;
//!     assert_eq!(plaintext, b"lab results");
//!     kernel.verify_chain().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Policy
//!
//! Every operation appends its audit entry before applying its effect. If the
//! append fails, the operation fails and nothing changes. Failed reads are
//! themselves audited.

pub mod access;
pub mod audit;
pub mod config;
mod deadline;
pub mod error;
pub mod kernel;
pub mod mailbox;
pub mod session;
pub mod vault;

pub use access::AccessController;
pub use audit::{AuditCursor, AuditLog};
pub use config::VaultConfig;
pub use error::{AuditError, AuditResult, Result, StorageTimeout, VaultError};
pub use kernel::Kernel;
pub use mailbox::{SealedMessage, SecureMailbox};
pub use session::{Directory, DirectoryEntry, Session, VerifiedActor};
pub use vault::{RecordVault, SearchQuery, SearchResults};

// Re-export the access-layer types that appear in this crate's API.
pub use medvault_access::{AccessGrant, Decision, RecordRef, RequestStatus, SharingRequest};
