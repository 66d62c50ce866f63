//! Entry query and aggregation helpers.
//!
//! The `type` and `ts` indexes exist for these lookups: pulling one event
//! stream out of a run, or a time slice of everything.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::store::entry_from_row;
use crate::{AuditStore, Entry, EntryKind, StoreError};

/// Aggregate counters over one audit database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub entry_count: u64,
    pub attestation_count: u64,
    pub rekor_proof_count: u64,
    pub entries_by_kind: HashMap<String, u64>,
    pub last_updated: DateTime<Utc>,
}

impl AuditStore {
    /// Entries of one kind in sequence order, newest last, optionally
    /// limited.
    pub async fn range_by_kind(
        &self,
        kind: EntryKind,
        limit: Option<u32>,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    "SELECT seq, ts, type, prev_hash, data, hash FROM entries \
                     WHERE type = ? ORDER BY seq ASC LIMIT ?",
                )
                .bind(kind.as_str())
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT seq, ts, type, prev_hash, data, hash FROM entries \
                     WHERE type = ? ORDER BY seq ASC",
                )
                .bind(kind.as_str())
                .fetch_all(self.pool())
                .await?
            }
        };
        rows.iter().map(entry_from_row).collect()
    }

    /// Entries whose timestamp falls in `[from, to]`.
    ///
    /// Timestamps are stored as fixed-width RFC 3339 UTC text, so the index
    /// comparison is chronological.
    pub async fn range_by_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(
            "SELECT seq, ts, type, prev_hash, data, hash FROM entries \
             WHERE ts >= ? AND ts <= ? ORDER BY seq ASC",
        )
        .bind(from.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(to.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let entry_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(self.pool())
            .await?;
        let attestation_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attestations")
            .fetch_one(self.pool())
            .await?;
        let rekor_proof_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rekor_proofs")
            .fetch_one(self.pool())
            .await?;

        let mut entries_by_kind = HashMap::new();
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT type, COUNT(*) FROM entries GROUP BY type")
                .fetch_all(self.pool())
                .await?;
        for (kind, count) in rows {
            entries_by_kind.insert(kind, count as u64);
        }

        Ok(StoreStats {
            entry_count: entry_count as u64,
            attestation_count: attestation_count as u64,
            rekor_proof_count: rekor_proof_count as u64,
            entries_by_kind,
            last_updated: Utc::now(),
        })
    }
}
