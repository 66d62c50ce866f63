//! Persistent, sequenced, hash-chained entry store.
//!
//! One process owns the database file. A single writer lock serializes the
//! append path across `{last_sequence, last_hash, frontier, merkle_root}`
//! and the insert itself; readers query the pool concurrently under WAL.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use witness_crypto::Signer;
use witness_merkle::{IncrementalMerkle, InclusionProof, MerkleTree};

use crate::{
    leaf_pairs, scan_chain, Attestation, ChainVerification, ConsoleEvent, ContainerEvent,
    CredentialEvent, Entry, EntryKind, EventPayload, NetworkEvent, ProofBundle, RekorProof,
    SecretEvent, SshEvent, StoreError, BUNDLE_VERSION,
};

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub database_path: PathBuf,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("logs.db"),
            max_connections: 5,
        }
    }
}

const MERKLE_ROOT_KEY: &str = "merkle_root";

/// Append cursor and Merkle frontier, guarded by one lock because the chain
/// invariants span all of these fields.
#[derive(Debug, Default)]
struct Cursor {
    last_sequence: u64,
    last_hash: String,
    merkle_root: String,
    frontier: IncrementalMerkle,
}

/// Append-only audit log over SQLite.
#[derive(Debug, Clone)]
pub struct AuditStore {
    pool: SqlitePool,
    cursor: Arc<RwLock<Cursor>>,
}

impl AuditStore {
    /// Open the store at `path`, creating schema on first use and rebuilding
    /// the in-memory frontier from the persisted chain.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(&StoreConfig {
            database_path: path.as_ref().to_path_buf(),
            ..StoreConfig::default()
        })
        .await
    }

    pub async fn open_with(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            cursor: Arc::new(RwLock::new(Cursor::default())),
        };
        store.initialize_schema().await?;
        store.load_cursor().await?;

        let cursor = store.cursor.read().await;
        info!(
            "audit store open at {} ({} entries)",
            config.database_path.display(),
            cursor.last_sequence
        );
        drop(cursor);

        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                seq INTEGER PRIMARY KEY,
                ts TEXT NOT NULL,
                type TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                data TEXT NOT NULL,
                hash TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attestations (
                seq INTEGER PRIMARY KEY,
                root_hash TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                signature BLOB NOT NULL,
                public_key BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rekor_proofs (
                seq INTEGER PRIMARY KEY,
                log_index INTEGER NOT NULL,
                log_id TEXT NOT NULL,
                tree_size INTEGER NOT NULL,
                root_hash TEXT NOT NULL,
                hashes TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                entry_uuid TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_entries_type ON entries (type)",
            "CREATE INDEX IF NOT EXISTS idx_entries_ts ON entries (ts)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn load_cursor(&self) -> Result<(), StoreError> {
        let last = sqlx::query("SELECT seq, hash FROM entries ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        let stored_root: Option<String> =
            sqlx::query_scalar("SELECT value FROM metadata WHERE key = ?")
                .bind(MERKLE_ROOT_KEY)
                .fetch_optional(&self.pool)
                .await?;

        let mut frontier = IncrementalMerkle::new();
        let hashes: Vec<String> = sqlx::query_scalar("SELECT hash FROM entries ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await?;
        for hash in &hashes {
            frontier.append(hash);
        }

        let mut cursor = self.cursor.write().await;
        if let Some(row) = last {
            cursor.last_sequence = row.get::<i64, _>("seq") as u64;
            cursor.last_hash = row.get("hash");
        }
        cursor.merkle_root = stored_root.unwrap_or_default();
        cursor.frontier = frontier;
        Ok(())
    }

    /// Append one entry, extending the hash chain and the Merkle frontier.
    ///
    /// The payload is serialized before the lock is taken; everything from
    /// sequence assignment to frontier extension happens inside the critical
    /// section. A metadata-root write failure is logged, not propagated: the
    /// entry is already durable and the auditor reports any resulting
    /// stored-versus-computed root divergence.
    pub async fn append<T>(&self, kind: EntryKind, data: &T) -> Result<Entry, StoreError>
    where
        T: Serialize + ?Sized,
    {
        let canonical = match serde_json::to_string(data) {
            Ok(canonical) => canonical,
            Err(e) => {
                warn!("rejecting {kind} append: payload not serializable: {e}");
                return Err(StoreError::Marshal(e));
            }
        };

        let mut cursor = self.cursor.write().await;
        let sequence = cursor.last_sequence + 1;
        let entry = Entry::from_canonical(
            sequence,
            Utc::now(),
            kind,
            cursor.last_hash.clone(),
            canonical,
        )?;

        // The UNIQUE constraint on hash rejects replayed entries.
        sqlx::query(
            "INSERT INTO entries (seq, ts, type, prev_hash, data, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sequence as i64)
        .bind(entry.ts_rfc3339())
        .bind(kind.as_str())
        .bind(&entry.prev_hash)
        .bind(entry.canonical_data())
        .bind(&entry.hash)
        .execute(&self.pool)
        .await?;

        cursor.last_sequence = sequence;
        cursor.last_hash = entry.hash.clone();
        cursor.frontier.append(&entry.hash);
        cursor.merkle_root = cursor.frontier.root_hash();

        if let Err(e) = self.persist_root(&cursor.merkle_root).await {
            warn!("merkle root metadata write failed after entry {sequence}: {e}");
        }

        debug!("appended {kind} entry {sequence}");
        Ok(entry)
    }

    async fn persist_root(&self, root: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO metadata (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(MERKLE_ROOT_KEY)
        .bind(root)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_console(&self, line: impl Into<String>) -> Result<Entry, StoreError> {
        self.append(EntryKind::Console, &ConsoleEvent { line: line.into() })
            .await
    }

    pub async fn append_network(&self, event: &NetworkEvent) -> Result<Entry, StoreError> {
        self.append(EntryKind::Network, event).await
    }

    pub async fn append_credential(&self, event: &CredentialEvent) -> Result<Entry, StoreError> {
        self.append(EntryKind::Credential, event).await
    }

    pub async fn append_secret(&self, event: &SecretEvent) -> Result<Entry, StoreError> {
        self.append(EntryKind::Secret, event).await
    }

    pub async fn append_ssh(&self, event: &SshEvent) -> Result<Entry, StoreError> {
        self.append(EntryKind::Ssh, event).await
    }

    pub async fn append_container(&self, event: &ContainerEvent) -> Result<Entry, StoreError> {
        self.append(EntryKind::Container, event).await
    }

    pub async fn append_payload(&self, payload: &EventPayload) -> Result<Entry, StoreError> {
        let value = payload.to_value()?;
        self.append(payload.kind(), &value).await
    }

    /// Fetch one entry by sequence.
    pub async fn get(&self, seq: u64) -> Result<Entry, StoreError> {
        let row = sqlx::query(
            "SELECT seq, ts, type, prev_hash, data, hash FROM entries WHERE seq = ?",
        )
        .bind(seq as i64)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => entry_from_row(&row),
            None => Err(StoreError::NotFound(seq)),
        }
    }

    /// Fetch entries with `start <= seq <= end` in sequence order.
    pub async fn range(&self, start: u64, end: u64) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(
            "SELECT seq, ts, type, prev_hash, data, hash FROM entries \
             WHERE seq >= ? AND seq <= ? ORDER BY seq ASC",
        )
        .bind(start as i64)
        .bind(end as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub(crate) async fn all_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let rows =
            sqlx::query("SELECT seq, ts, type, prev_hash, data, hash FROM entries ORDER BY seq ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn last_sequence(&self) -> u64 {
        self.cursor.read().await.last_sequence
    }

    pub async fn last_hash(&self) -> String {
        self.cursor.read().await.last_hash.clone()
    }

    /// Current Merkle root as tracked by the append path.
    pub async fn merkle_root(&self) -> String {
        self.cursor.read().await.merkle_root.clone()
    }

    pub async fn save_attestation(&self, attestation: &Attestation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO attestations (seq, root_hash, timestamp, signature, public_key) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(attestation.sequence as i64)
        .bind(&attestation.root_hash)
        .bind(
            attestation
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        )
        .bind(&attestation.signature)
        .bind(&attestation.public_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_attestations(&self) -> Result<Vec<Attestation>, StoreError> {
        let rows = sqlx::query(
            "SELECT seq, root_hash, timestamp, signature, public_key \
             FROM attestations ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(attestation_from_row).collect()
    }

    /// Sign the current root with `signer`, persist and return the
    /// attestation.
    pub async fn attest(&self, signer: &Signer) -> Result<Attestation, StoreError> {
        let (sequence, root_hash) = {
            let cursor = self.cursor.read().await;
            (cursor.last_sequence, cursor.merkle_root.clone())
        };
        let attestation = Attestation::new(signer, sequence, root_hash);
        self.save_attestation(&attestation).await?;
        info!("attested log at sequence {sequence}");
        Ok(attestation)
    }

    pub async fn save_rekor_proof(&self, seq: u64, proof: &RekorProof) -> Result<(), StoreError> {
        let hashes = serde_json::to_string(&proof.hashes).map_err(StoreError::Marshal)?;
        sqlx::query(
            "INSERT OR REPLACE INTO rekor_proofs \
             (seq, log_index, log_id, tree_size, root_hash, hashes, timestamp, entry_uuid) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(seq as i64)
        .bind(proof.log_index as i64)
        .bind(&proof.log_id)
        .bind(proof.tree_size as i64)
        .bind(&proof.root_hash)
        .bind(hashes)
        .bind(proof.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true))
        .bind(&proof.entry_uuid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_rekor_proofs(&self) -> Result<HashMap<u64, RekorProof>, StoreError> {
        let rows = sqlx::query(
            "SELECT seq, log_index, log_id, tree_size, root_hash, hashes, timestamp, entry_uuid \
             FROM rekor_proofs ORDER BY seq ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut proofs = HashMap::with_capacity(rows.len());
        for row in &rows {
            let (seq, proof) = rekor_from_row(row)?;
            proofs.insert(seq, proof);
        }
        Ok(proofs)
    }

    /// Produce an inclusion proof for `seq` against the current root.
    pub async fn prove_entry(&self, seq: u64) -> Result<InclusionProof, StoreError> {
        let entries = self.all_entries().await?;
        let tree = MerkleTree::build(&leaf_pairs(&entries));
        Ok(tree.prove_inclusion(seq)?)
    }

    /// Snapshot the whole log as a portable proof bundle.
    pub async fn export(&self) -> Result<ProofBundle, StoreError> {
        self.export_inner(&[]).await
    }

    /// Snapshot with inclusion proofs for the requested sequences; fails if
    /// any of them is absent.
    pub async fn export_with_proofs(&self, seqs: &[u64]) -> Result<ProofBundle, StoreError> {
        self.export_inner(seqs).await
    }

    async fn export_inner(&self, proof_seqs: &[u64]) -> Result<ProofBundle, StoreError> {
        // Hold the read lock so appends cannot interleave with the snapshot.
        let cursor = self.cursor.read().await;
        let entries = self.all_entries().await?;
        let attestations = self.load_attestations().await?;
        let rekor_map = self.load_rekor_proofs().await?;

        let mut rekor_seqs: Vec<u64> = rekor_map.keys().copied().collect();
        rekor_seqs.sort_unstable();
        let rekor_proofs = rekor_seqs
            .into_iter()
            .filter_map(|seq| rekor_map.get(&seq).cloned())
            .collect();

        let mut inclusion_proofs = Vec::with_capacity(proof_seqs.len());
        if !proof_seqs.is_empty() {
            let tree = MerkleTree::build(&leaf_pairs(&entries));
            for seq in proof_seqs {
                inclusion_proofs.push(tree.prove_inclusion(*seq)?);
            }
        }

        Ok(ProofBundle {
            version: BUNDLE_VERSION,
            created_at: Utc::now(),
            merkle_root: cursor.merkle_root.clone(),
            entries,
            attestations,
            rekor_proofs,
            inclusion_proofs,
        })
    }

    /// Scan the persisted chain for sequence gaps, broken linkage and hash
    /// mismatches.
    pub async fn verify_chain(&self) -> Result<ChainVerification, StoreError> {
        let entries = self.all_entries().await?;
        Ok(scan_chain(&entries))
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn entry_from_row(row: &SqliteRow) -> Result<Entry, StoreError> {
    Entry::from_stored(
        row.get::<i64, _>("seq") as u64,
        row.get::<&str, _>("ts"),
        row.get::<&str, _>("type"),
        row.get("prev_hash"),
        row.get("data"),
        row.get("hash"),
    )
}

pub(crate) fn attestation_from_row(row: &SqliteRow) -> Result<Attestation, StoreError> {
    let timestamp = chrono::DateTime::parse_from_rfc3339(row.get::<&str, _>("timestamp"))
        .map_err(|e| StoreError::InvalidState(format!("attestation: bad timestamp: {e}")))?
        .with_timezone(&chrono::Utc);
    Ok(Attestation {
        sequence: row.get::<i64, _>("seq") as u64,
        root_hash: row.get("root_hash"),
        timestamp,
        public_key: row.get("public_key"),
        signature: row.get("signature"),
    })
}

pub(crate) fn rekor_from_row(row: &SqliteRow) -> Result<(u64, RekorProof), StoreError> {
    let hashes: Vec<String> =
        serde_json::from_str(row.get::<&str, _>("hashes")).map_err(StoreError::Marshal)?;
    let timestamp = chrono::DateTime::parse_from_rfc3339(row.get::<&str, _>("timestamp"))
        .map_err(|e| StoreError::InvalidState(format!("rekor proof: bad timestamp: {e}")))?
        .with_timezone(&chrono::Utc);
    let proof = RekorProof {
        log_index: row.get::<i64, _>("log_index") as u64,
        log_id: row.get("log_id"),
        tree_size: row.get::<i64, _>("tree_size") as u64,
        root_hash: row.get("root_hash"),
        hashes,
        timestamp,
        entry_uuid: row.get("entry_uuid"),
    };
    Ok((row.get::<i64, _>("seq") as u64, proof))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NetworkEvent;

    async fn create_test_store() -> (tempfile::TempDir, AuditStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(dir.path().join("logs.db")).await.unwrap();
        (dir, store)
    }

    fn network_event() -> NetworkEvent {
        NetworkEvent {
            method: "GET".into(),
            url: "https://x/".into(),
            status_code: 200,
            duration_ms: 5,
            credential_used: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_fresh_chain_of_three() {
        let (_dir, store) = create_test_store().await;

        let e1 = store.append_console("a").await.unwrap();
        let e2 = store.append_console("b").await.unwrap();
        let e3 = store.append_network(&network_event()).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 3);
        assert_eq!((e1.sequence, e2.sequence, e3.sequence), (1, 2, 3));
        assert_eq!(e1.prev_hash, "");
        assert_eq!(e2.prev_hash, e1.hash);
        assert_eq!(e3.prev_hash, e2.hash);
        assert_eq!(store.last_hash().await, e3.hash);

        let result = store.verify_chain().await.unwrap();
        assert!(result.valid);
        assert_eq!(result.entry_count, 3);
    }

    #[tokio::test]
    async fn test_get_and_range() {
        let (_dir, store) = create_test_store().await;
        for i in 0..5 {
            store.append_console(format!("line {i}")).await.unwrap();
        }

        let entry = store.get(3).await.unwrap();
        assert_eq!(entry.sequence, 3);
        assert!(entry.verify());

        let middle = store.range(2, 4).await.unwrap();
        assert_eq!(
            middle.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );

        assert!(matches!(store.get(99).await, Err(StoreError::NotFound(99))));
    }

    #[tokio::test]
    async fn test_reopen_preserves_cursor_and_extends_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.db");

        let store = AuditStore::open(&path).await.unwrap();
        store.append_console("a").await.unwrap();
        let e2 = store.append_console("b").await.unwrap();
        let root = store.merkle_root().await;
        drop(store);

        let reopened = AuditStore::open(&path).await.unwrap();
        assert_eq!(reopened.last_sequence().await, 2);
        assert_eq!(reopened.last_hash().await, e2.hash);
        assert_eq!(reopened.merkle_root().await, root);

        let e3 = reopened.append_console("c").await.unwrap();
        assert_eq!(e3.sequence, 3);
        assert_eq!(e3.prev_hash, e2.hash);
        assert!(reopened.verify_chain().await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_incremental_root_matches_batch_rebuild() {
        let (_dir, store) = create_test_store().await;
        for i in 0..17 {
            store.append_console(format!("line {i}")).await.unwrap();
        }

        let entries = store.all_entries().await.unwrap();
        let tree = MerkleTree::build(&leaf_pairs(&entries));
        assert_eq!(store.merkle_root().await, tree.root());
    }

    #[tokio::test]
    async fn test_prove_entry_soundness() {
        let (_dir, store) = create_test_store().await;
        for i in 0..9 {
            store.append_console(format!("line {i}")).await.unwrap();
        }

        let root = store.merkle_root().await;
        for seq in 1..=9 {
            let proof = store.prove_entry(seq).await.unwrap();
            assert!(proof.verify(), "proof for seq {seq}");
            assert_eq!(proof.root_hash, root);
        }

        assert!(matches!(
            store.prove_entry(42).await,
            Err(StoreError::Merkle(witness_merkle::MerkleError::EntryNotFound(42)))
        ));
    }

    #[tokio::test]
    async fn test_attestations_round_trip() {
        let (_dir, store) = create_test_store().await;
        store.append_console("a").await.unwrap();

        let signer = Signer::generate();
        let attestation = store.attest(&signer).await.unwrap();
        assert_eq!(attestation.sequence, 1);
        assert_eq!(attestation.root_hash, store.merkle_root().await);
        assert!(attestation.verify());

        let loaded = store.load_attestations().await.unwrap();
        assert_eq!(loaded, vec![attestation]);
    }

    #[tokio::test]
    async fn test_rekor_proofs_round_trip() {
        let (_dir, store) = create_test_store().await;
        store.append_console("a").await.unwrap();

        let proof = RekorProof {
            log_index: 12345,
            log_id: "c0ffee".into(),
            tree_size: 67890,
            root_hash: "aa".repeat(32),
            hashes: vec!["bb".repeat(32), "cc".repeat(32)],
            timestamp: Utc::now(),
            entry_uuid: "uuid-1".into(),
        };
        store.save_rekor_proof(1, &proof).await.unwrap();

        let loaded = store.load_rekor_proofs().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[&1], proof);
    }

    #[tokio::test]
    async fn test_replayed_entry_is_rejected() {
        let (_dir, store) = create_test_store().await;
        let entry = store.append_console("a").await.unwrap();

        // Re-inserting the same hash violates the UNIQUE replay guard.
        let replay = sqlx::query(
            "INSERT INTO entries (seq, ts, type, prev_hash, data, hash) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(2i64)
        .bind(entry.ts_rfc3339())
        .bind("console")
        .bind(&entry.prev_hash)
        .bind(entry.canonical_data())
        .bind(&entry.hash)
        .execute(store.pool())
        .await;
        assert!(replay.is_err());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_marshal_failure_is_rejected() {
        let (_dir, store) = create_test_store().await;
        // Tuple map keys cannot become JSON object keys.
        let unserializable: HashMap<(u32, u32), u32> = HashMap::from([((1, 2), 3)]);
        let result = store.append(EntryKind::Console, &unserializable).await;
        assert!(matches!(result, Err(StoreError::Marshal(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_linearized() {
        let (_dir, store) = create_test_store().await;

        let mut handles = Vec::new();
        for writer in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .append_console(format!("writer {writer} line {i}"))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 100);
        let result = store.verify_chain().await.unwrap();
        assert!(result.valid);
        assert_eq!(result.entry_count, 100);
    }
}
