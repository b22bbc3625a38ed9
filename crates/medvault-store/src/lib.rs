//! # MedVault Store
//!
//! Storage abstraction for MedVault. The engine depends on two traits:
//!
//! - [`BlobStore`] - content-addressed storage for record ciphertext
//! - [`Ledger`] - append-only, seq-ordered storage for audit entries
//!
//! [`SqliteStore`] implements both over one database file.
//! [`MemoryBlobStore`] and [`MemoryLedger`] are in-process equivalents for tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use medvault_store::{BlobStore, Ledger, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("vault.db").unwrap();
//!     let address = store.put(Bytes::from_static(b"ciphertext")).await.unwrap();
//!     assert!(store.has(&address).await.unwrap());
//!     assert_eq!(store.len().await.unwrap(), 0);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent puts**: storing the same bytes twice yields the same address
//! - **Strict succession**: the ledger accepts only `head.seq + 1`
//! - **No updates or deletes**: neither trait exposes a way to change stored data

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::{MemoryBlobStore, MemoryLedger};
pub use sqlite::SqliteStore;
pub use traits::{next_seq, BlobStore, Ledger};
