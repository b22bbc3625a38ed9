//! SQLite implementation of the storage traits.
//!
//! The durable backend. rusqlite with bundled SQLite, made async by running
//! every statement on `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use medvault_core::{
    now_millis, ActorId, AuditAction, AuditEntry, Blake3Hash, ContentAddress, Ed25519Signature,
    SubjectId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{next_seq, BlobStore, Ledger};

const ENTRY_COLUMNS: &str =
    "seq, prev_hash, entry_hash, actor_id, action, subject_id, timestamp, signature";

/// SQLite-backed blob store and ledger.
///
/// Both traits share one connection, so blobs and audit entries live in
/// the same database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(format!("sqlite connection: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn blob_column<const N: usize>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, format!("blob[{N}]"), rusqlite::types::Type::Blob)
    })
}

/// Decode one audit row.
///
/// Only a missing or non-integer seq is a query error. Any other column that
/// no longer decodes yields `Corrupt` for that seq.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<AuditEntry>> {
    let seq = row.get::<_, i64>(0)? as u64;
    Ok(decode_entry(seq, row).map_err(|e| StoreError::Corrupt {
        seq,
        reason: e.to_string(),
    }))
}

fn decode_entry(seq: u64, row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    let action: String = row.get(4)?;
    let action = action.parse::<AuditAction>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(AuditEntry {
        seq,
        prev_hash: Blake3Hash(blob_column::<32>(row, 1)?),
        entry_hash: Blake3Hash(blob_column::<32>(row, 2)?),
        actor_id: ActorId::new(row.get::<_, String>(3)?),
        action,
        subject_id: SubjectId::new(row.get::<_, String>(5)?),
        timestamp: row.get(6)?,
        signature: Ed25519Signature(blob_column::<64>(row, 7)?),
    })
}

fn collect_entries(
    rows: impl Iterator<Item = rusqlite::Result<Result<AuditEntry>>>,
) -> Result<Vec<AuditEntry>> {
    rows.collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .collect()
}

#[async_trait]
impl BlobStore for SqliteStore {
    async fn put(&self, bytes: Bytes) -> Result<ContentAddress> {
        let address = ContentAddress::of(&bytes);
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blobs (address, bytes, stored_at) VALUES (?1, ?2, ?3)",
                params![address.as_bytes().as_slice(), bytes.as_ref(), now_millis()],
            )?;
            Ok(address)
        })
        .await
    }

    async fn get(&self, address: &ContentAddress) -> Result<Bytes> {
        let address = *address;
        self.blocking(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT bytes FROM blobs WHERE address = ?1",
                    params![address.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            bytes
                .map(Bytes::from)
                .ok_or_else(|| StoreError::NotFound(format!("blob {address}")))
        })
        .await
    }

    async fn has(&self, address: &ContentAddress) -> Result<bool> {
        let address = *address;
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blobs WHERE address = ?1",
                    params![address.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}

fn select_head(conn: &Connection) -> Result<Option<AuditEntry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM audit_entries ORDER BY seq DESC LIMIT 1"),
        [],
        row_to_entry,
    )
    .optional()?
    .transpose()
}

#[async_trait]
impl Ledger for SqliteStore {
    async fn commit(&self, entry: &AuditEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            // Write lock before the head read; contention waits on the busy timeout.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let expected = next_seq(select_head(&tx)?.as_ref());
            if entry.seq != expected {
                return Err(StoreError::SeqConflict {
                    expected,
                    got: entry.seq,
                });
            }

            tx.execute(
                &format!(
                    "INSERT INTO audit_entries ({ENTRY_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    entry.seq as i64,
                    entry.prev_hash.as_bytes().as_slice(),
                    entry.entry_hash.as_bytes().as_slice(),
                    entry.actor_id.as_str(),
                    entry.action.as_str(),
                    entry.subject_id.as_str(),
                    entry.timestamp,
                    entry.signature.as_bytes().as_slice(),
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn head(&self) -> Result<Option<AuditEntry>> {
        self.blocking(|conn| select_head(conn)).await
    }

    async fn entries_range(&self, from_seq: u64, limit: usize) -> Result<Vec<AuditEntry>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_entries
                 WHERE seq >= ?1 ORDER BY seq LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![from_seq as i64, limit as i64], row_to_entry)?;
            collect_entries(rows)
        })
        .await
    }

    async fn entries_for(
        &self,
        subject: &SubjectId,
        from_seq: u64,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        let subject = subject.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM audit_entries
                 WHERE subject_id = ?1 AND seq >= ?2 ORDER BY seq LIMIT ?3"
            ))?;
            let rows = stmt.query_map(
                params![subject.as_str(), from_seq as i64, limit as i64],
                row_to_entry,
            )?;
            collect_entries(rows)
        })
        .await
    }

    async fn len(&self) -> Result<u64> {
        self.blocking(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM audit_entries", [], |row| row.get(0))?;
            Ok(count as u64)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medvault_core::{SigningKeypair, GENESIS_HASH};

    fn chain(len: u64, signer: &SigningKeypair) -> Vec<AuditEntry> {
        let mut prev = GENESIS_HASH;
        (0..len)
            .map(|seq| {
                let entry = AuditEntry::create(
                    seq,
                    prev,
                    ActorId::new("did:eth:patient1"),
                    AuditAction::RecordUploaded,
                    SubjectId::new(format!("record:{}", seq % 3)),
                    1_700_000_000_000 + seq as i64,
                    signer,
                );
                prev = entry.entry_hash;
                entry
            })
            .collect()
    }

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let address = store.put(Bytes::from_static(b"sealed")).await.unwrap();
        assert_eq!(address, ContentAddress::of(b"sealed"));
        assert!(store.has(&address).await.unwrap());
        assert_eq!(store.get(&address).await.unwrap().as_ref(), b"sealed");

        let again = store.put(Bytes::from_static(b"sealed")).await.unwrap();
        assert_eq!(again, address);
    }

    #[tokio::test]
    async fn test_blob_missing() {
        let store = SqliteStore::open_memory().unwrap();
        let err = store.get(&ContentAddress::of(b"x")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ledger_roundtrip_preserves_entries() {
        let store = SqliteStore::open_memory().unwrap();
        let signer = SigningKeypair::generate();
        let entries = chain(5, &signer);
        for entry in &entries {
            store.commit(entry).await.unwrap();
        }

        let loaded = store.entries_range(0, 100).await.unwrap();
        assert_eq!(loaded, entries);
        assert_eq!(store.len().await.unwrap(), 5);
        assert_eq!(store.head().await.unwrap().unwrap().seq, 4);

        let for_zero = store
            .entries_for(&SubjectId::new("record:0"), 0, 10)
            .await
            .unwrap();
        let seqs: Vec<u64> = for_zero.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 3]);
    }

    #[tokio::test]
    async fn test_ledger_rejects_out_of_order_commit() {
        let store = SqliteStore::open_memory().unwrap();
        let signer = SigningKeypair::generate();
        let entries = chain(3, &signer);
        store.commit(&entries[0]).await.unwrap();

        let err = store.commit(&entries[2]).await.unwrap_err();
        assert!(matches!(err, StoreError::SeqConflict { expected: 1, got: 2 }));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let signer = SigningKeypair::generate();
        let entries = chain(3, &signer);

        {
            let store = SqliteStore::open(&path).unwrap();
            for entry in &entries {
                store.commit(entry).await.unwrap();
            }
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.head().await.unwrap(), entries.last().cloned());
    }

    #[tokio::test]
    async fn test_out_of_band_edit_is_visible_on_read() {
        let store = SqliteStore::open_memory().unwrap();
        let signer = SigningKeypair::generate();
        for entry in chain(4, &signer) {
            store.commit(&entry).await.unwrap();
        }

        store
            .blocking(|conn| {
                conn.execute(
                    "UPDATE audit_entries SET entry_hash = ?1 WHERE seq = 3",
                    params![[0xeeu8; 32].as_slice()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let loaded = store.entries_range(3, 1).await.unwrap();
        assert!(!loaded[0].is_intact(&signer.public_key()));
    }

    async fn edit(store: &SqliteStore, sql: &'static str) {
        store
            .blocking(move |conn| {
                conn.execute(sql, [])?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_row_reports_its_seq() {
        let store = SqliteStore::open_memory().unwrap();
        let signer = SigningKeypair::generate();
        for entry in chain(5, &signer) {
            store.commit(&entry).await.unwrap();
        }

        edit(&store, "UPDATE audit_entries SET action = 'record_accessed ' WHERE seq = 3").await;
        let err = store.entries_range(0, 10).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { seq: 3, .. }), "got {err:?}");
        assert_eq!(store.entries_range(0, 3).await.unwrap().len(), 3);

        edit(&store, "UPDATE audit_entries SET entry_hash = x'00' WHERE seq = 4").await;
        let err = store.head().await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { seq: 4, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_commit_waits_for_another_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let store = SqliteStore::open(&path).unwrap();
        let signer = SigningKeypair::generate();
        let entries = chain(1, &signer);

        let other = Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            other.execute_batch("COMMIT").unwrap();
        });

        store.commit(&entries[0]).await.unwrap();
        release.join().unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }
}
