//! Store-backed verification.
//!
//! Runs the same four checks as the offline bundle path, but against the
//! live tables. It additionally compares the Merkle root recomputed from
//! the entries against the root persisted in `metadata`, which is the check
//! that catches a forged metadata row.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use witness_merkle::MerkleTree;

use crate::store::{attestation_from_row, entry_from_row};
use crate::{leaf_pairs, scan_chain, AuditStore, Entry, StoreError, VerifyResult};

/// Read-only verification pass over an audit database.
///
/// The auditor issues only SELECTs; it opens its own pool so it can inspect
/// a database no store currently owns.
#[derive(Debug)]
pub struct Auditor {
    pool: SqlitePool,
}

impl Auditor {
    /// Open the database at `path` for auditing. Fails if the file does not
    /// exist; an absent run is not a valid run.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(false)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Audit the tables of an already-open store.
    pub fn for_store(store: &AuditStore) -> Self {
        Self {
            pool: store.pool().clone(),
        }
    }

    /// Run all checks and aggregate the result.
    pub async fn run(&self) -> Result<VerifyResult, StoreError> {
        let entries = match self.fetch_entries().await {
            Ok(entries) => entries,
            // Unparseable rows are themselves a tamper signal.
            Err(e @ (StoreError::InvalidState(_) | StoreError::Marshal(_))) => {
                return Ok(VerifyResult {
                    valid: false,
                    hash_chain_valid: false,
                    root_hash_valid: false,
                    attestations_valid: false,
                    rekor_proofs_present: false,
                    entry_count: 0,
                    first_invalid_seq: None,
                    error: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e),
        };

        let rekor_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rekor_proofs")
            .fetch_one(&self.pool)
            .await?;
        let mut result = VerifyResult::passing(entries.len() as u64, rekor_count > 0);

        let chain = scan_chain(&entries);
        if !chain.valid {
            result.valid = false;
            result.hash_chain_valid = false;
            result.first_invalid_seq = chain.first_invalid_seq;
            result.error = chain.error;
        }

        let stored_root: Option<String> =
            sqlx::query_scalar("SELECT value FROM metadata WHERE key = 'merkle_root'")
                .fetch_optional(&self.pool)
                .await?;
        let stored_root = stored_root.unwrap_or_default();
        let computed_root = MerkleTree::build(&leaf_pairs(&entries)).root();
        if stored_root != computed_root {
            result.valid = false;
            result.root_hash_valid = false;
            result.error.get_or_insert_with(|| {
                format!(
                    "merkle root mismatch: metadata holds {stored_root}, entries compute {computed_root}"
                )
            });
        }

        let rows = sqlx::query(
            "SELECT seq, root_hash, timestamp, signature, public_key \
             FROM attestations ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in &rows {
            let attestation = attestation_from_row(row)?;
            if !attestation.verify() {
                result.valid = false;
                result.attestations_valid = false;
                result.error.get_or_insert_with(|| {
                    format!(
                        "attestation at sequence {} has an invalid signature",
                        attestation.sequence
                    )
                });
            }
        }

        debug!(
            "audit complete: {} entries, valid={}",
            result.entry_count, result.valid
        );
        Ok(result)
    }

    async fn fetch_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let rows =
            sqlx::query("SELECT seq, ts, type, prev_hash, data, hash FROM entries ORDER BY seq ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(entry_from_row).collect()
    }
}
