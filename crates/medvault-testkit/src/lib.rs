//! # MedVault Testkit
//!
//! Testing utilities for MedVault.
//!
//! ## Overview
//!
//! - **Fixtures**: a kernel with deterministic patient, physician, and
//!   auditor sessions, over a ledger that tests can tamper with
//! - **Generators**: Proptest strategies for tagged uploads and random
//!   sharing workloads
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use medvault_testkit::KernelFixture;
//!
//! # async fn demo() -> medvault::Result<()> {
//! let fx = KernelFixture::new().await?;
//! let (record, _request) = fx.shared_record(b"lab results").await?;
//! assert_eq!(fx.kernel.read(&fx.physician, &record.record_id).await?, b"lab results");
//! # Ok(())
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use medvault_testkit::generators::sharing_ops;
//!
//! proptest! {
//!     #[test]
//!     fn workload_keeps_chain_intact(ops in sharing_ops(16)) {
//!         // replay `ops` against a KernelFixture
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{KernelFixture, TamperLedger};
pub use generators::{sharing_ops, SharingOp};
