//! # Witness Audit Log
//!
//! Tamper-evident, append-only log of agent runtime events. Entries are
//! hash-chained and sequenced, a Merkle root accumulates over the chain, and
//! signed attestations checkpoint the root so a third party can verify a run
//! offline from an exported proof bundle.
//!
//! ## Key Components
//!
//! - **Entry**: one hash-chained record with preserved canonical payload bytes
//! - **AuditStore**: SQLite-backed sequenced store with a single-writer lock
//! - **Attestation / RekorProof**: signed checkpoints and opaque external
//!   inclusion blobs stored alongside the chain
//! - **ProofBundle**: portable export verified without the database
//! - **Auditor**: store-backed verification of chain, root and signatures

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use witness_crypto::Signer;

pub use witness_merkle::{InclusionProof, MerkleError, ProofStep};

mod audit;
mod bundle;
mod query;
mod store;

pub use audit::Auditor;
pub use bundle::{ProofBundle, VerifyResult, BUNDLE_VERSION};
pub use query::StoreStats;
pub use store::{AuditStore, StoreConfig};

/// Store and verification errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("entry {0} not found")]
    NotFound(u64),
    #[error("payload cannot be marshaled: {0}")]
    Marshal(#[source] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    #[error("inconsistent store state: {0}")]
    InvalidState(String),
}

/// Closed set of entry type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Console,
    Network,
    Credential,
    Secret,
    Ssh,
    Container,
}

impl EntryKind {
    pub const ALL: [EntryKind; 6] = [
        EntryKind::Console,
        EntryKind::Network,
        EntryKind::Credential,
        EntryKind::Secret,
        EntryKind::Ssh,
        EntryKind::Container,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Console => "console",
            EntryKind::Network => "network",
            EntryKind::Credential => "credential",
            EntryKind::Secret => "secret",
            EntryKind::Ssh => "ssh",
            EntryKind::Container => "container",
        }
    }

    /// Strict parse of a stored tag.
    pub fn parse(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == tag)
    }

    /// Lenient wire-side mapping: empty or unrecognized tags become console.
    pub fn from_wire(tag: &str) -> Self {
        Self::parse(tag).unwrap_or(EntryKind::Console)
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only log record.
///
/// `hash` commits to every other field; `prev_hash` chains the record to its
/// predecessor (empty for sequence 1). `data` keeps the exact JSON bytes that
/// were hashed at append time: verification never re-encodes a decoded
/// value, so field-order or formatting drift cannot produce false mismatches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub sequence: u64,
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub prev_hash: String,
    pub data: Box<RawValue>,
    pub hash: String,
}

impl Entry {
    /// Build and hash a new entry from a serializable payload.
    pub fn create<T>(
        sequence: u64,
        prev_hash: &str,
        kind: EntryKind,
        data: &T,
    ) -> Result<Self, StoreError>
    where
        T: Serialize + ?Sized,
    {
        let canonical = serde_json::to_string(data).map_err(StoreError::Marshal)?;
        Self::from_canonical(sequence, Utc::now(), kind, prev_hash.to_owned(), canonical)
    }

    pub(crate) fn from_canonical(
        sequence: u64,
        timestamp: DateTime<Utc>,
        kind: EntryKind,
        prev_hash: String,
        canonical: String,
    ) -> Result<Self, StoreError> {
        let hash = compute_entry_hash(sequence, &timestamp, kind, &prev_hash, canonical.as_bytes());
        let data = RawValue::from_string(canonical).map_err(StoreError::Marshal)?;
        Ok(Self {
            sequence,
            timestamp,
            kind,
            prev_hash,
            data,
            hash,
        })
    }

    /// Reassemble a persisted entry without recomputing its hash.
    pub(crate) fn from_stored(
        sequence: u64,
        ts: &str,
        kind_tag: &str,
        prev_hash: String,
        canonical: String,
        hash: String,
    ) -> Result<Self, StoreError> {
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| StoreError::InvalidState(format!("entry {sequence}: bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let kind = EntryKind::parse(kind_tag).ok_or_else(|| {
            StoreError::InvalidState(format!("entry {sequence}: unknown type tag {kind_tag:?}"))
        })?;
        let data = RawValue::from_string(canonical).map_err(StoreError::Marshal)?;
        Ok(Self {
            sequence,
            timestamp,
            kind,
            prev_hash,
            data,
            hash,
        })
    }

    /// Canonical timestamp text, fixed nine-digit nanosecond RFC 3339.
    pub fn ts_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// The exact JSON bytes the hash commits to.
    pub fn canonical_data(&self) -> &str {
        self.data.get()
    }

    /// Decode the payload for inspection.
    pub fn data_value(&self) -> Result<serde_json::Value, StoreError> {
        serde_json::from_str(self.data.get()).map_err(StoreError::Marshal)
    }

    /// Recompute the hash from the stored fields and compare.
    pub fn verify(&self) -> bool {
        compute_entry_hash(
            self.sequence,
            &self.timestamp,
            self.kind,
            &self.prev_hash,
            self.canonical_data().as_bytes(),
        ) == self.hash
    }
}

fn compute_entry_hash(
    sequence: u64,
    timestamp: &DateTime<Utc>,
    kind: EntryKind,
    prev_hash: &str,
    data: &[u8],
) -> String {
    let ts = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
    witness_enc::digest_hex(&[
        &sequence.to_be_bytes(),
        ts.as_bytes(),
        kind.as_str().as_bytes(),
        prev_hash.as_bytes(),
        data,
    ])
}

/// Console output event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEvent {
    pub line: String,
}

/// Outbound network request event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEvent {
    pub method: String,
    pub url: String,
    pub status_code: u16,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Credential access event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEvent {
    pub name: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

/// Secret resolution event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEvent {
    pub name: String,
    pub backend: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SshAction {
    List,
    SignAllowed,
    SignDenied,
}

/// SSH agent operation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshEvent {
    pub action: SshAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerAction {
    Created,
    Started,
    Stopped,
}

/// Container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub action: ContainerAction,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Tagged union over the typed event payloads, with an opaque variant for
/// payloads recorded before their schema was known.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Console(ConsoleEvent),
    Network(NetworkEvent),
    Credential(CredentialEvent),
    Secret(SecretEvent),
    Ssh(SshEvent),
    Container(ContainerEvent),
    Opaque {
        kind: EntryKind,
        data: serde_json::Value,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EntryKind {
        match self {
            EventPayload::Console(_) => EntryKind::Console,
            EventPayload::Network(_) => EntryKind::Network,
            EventPayload::Credential(_) => EntryKind::Credential,
            EventPayload::Secret(_) => EntryKind::Secret,
            EventPayload::Ssh(_) => EntryKind::Ssh,
            EventPayload::Container(_) => EntryKind::Container,
            EventPayload::Opaque { kind, .. } => *kind,
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, StoreError> {
        let value = match self {
            EventPayload::Console(e) => serde_json::to_value(e),
            EventPayload::Network(e) => serde_json::to_value(e),
            EventPayload::Credential(e) => serde_json::to_value(e),
            EventPayload::Secret(e) => serde_json::to_value(e),
            EventPayload::Ssh(e) => serde_json::to_value(e),
            EventPayload::Container(e) => serde_json::to_value(e),
            EventPayload::Opaque { data, .. } => return Ok(data.clone()),
        };
        value.map_err(StoreError::Marshal)
    }
}

/// Signed checkpoint of the log at a given sequence.
///
/// Carries its own public key so an exported record verifies standalone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub sequence: u64,
    pub root_hash: String,
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl Attestation {
    pub fn new(signer: &Signer, sequence: u64, root_hash: impl Into<String>) -> Self {
        let root_hash = root_hash.into();
        let signature = signer.sign(root_hash.as_bytes()).to_vec();
        Self {
            sequence,
            root_hash,
            timestamp: Utc::now(),
            public_key: signer.public_key_bytes().to_vec(),
            signature,
        }
    }

    /// True iff the embedded public key validates the embedded signature
    /// over the root hash.
    pub fn verify(&self) -> bool {
        witness_crypto::verify_signature(
            &self.public_key,
            self.root_hash.as_bytes(),
            &self.signature,
        )
    }
}

/// Opaque inclusion proof from an external transparency log.
///
/// Stored and exported verbatim; verifying it requires network access to the
/// transparency log and is out of scope here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekorProof {
    pub log_index: u64,
    pub log_id: String,
    pub tree_size: u64,
    pub root_hash: String,
    pub hashes: Vec<String>,
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub entry_uuid: String,
}

/// Result of a hash-chain scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub entry_count: u64,
    pub first_invalid_seq: Option<u64>,
    pub error: Option<String>,
}

/// Walk entries in order checking sequence density, prev-hash linkage and
/// per-entry hash correctness. Stops at the first violation.
pub(crate) fn scan_chain(entries: &[Entry]) -> ChainVerification {
    let entry_count = entries.len() as u64;
    let mut prev_hash = "";
    for (i, entry) in entries.iter().enumerate() {
        let expected_seq = i as u64 + 1;
        if entry.sequence != expected_seq {
            return ChainVerification {
                valid: false,
                entry_count,
                first_invalid_seq: Some(expected_seq),
                error: Some(format!(
                    "sequence gap: expected {expected_seq}, found {}",
                    entry.sequence
                )),
            };
        }
        if entry.prev_hash != prev_hash {
            return ChainVerification {
                valid: false,
                entry_count,
                first_invalid_seq: Some(entry.sequence),
                error: Some(format!("entry {}: hash chain broken", entry.sequence)),
            };
        }
        if !entry.verify() {
            return ChainVerification {
                valid: false,
                entry_count,
                first_invalid_seq: Some(entry.sequence),
                error: Some(format!("entry {}: stored hash mismatch", entry.sequence)),
            };
        }
        prev_hash = &entry.hash;
    }
    ChainVerification {
        valid: true,
        entry_count,
        first_invalid_seq: None,
        error: None,
    }
}

pub(crate) fn leaf_pairs(entries: &[Entry]) -> Vec<(u64, String)> {
    entries
        .iter()
        .map(|entry| (entry.sequence, entry.hash.clone()))
        .collect()
}

/// Fixed nine-digit-nanosecond RFC 3339 serde representation.
pub(crate) mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Lowercase-hex serde representation for key and signature bytes.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_hash_round_trip() {
        let entry = Entry::create(1, "", EntryKind::Console, &ConsoleEvent {
            line: "hello".into(),
        })
        .unwrap();

        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.prev_hash, "");
        assert!(entry.verify());
        assert_eq!(entry.canonical_data(), r#"{"line":"hello"}"#);
    }

    #[test]
    fn test_entry_verify_detects_field_changes() {
        let entry = Entry::create(3, "abc123", EntryKind::Network, &serde_json::json!({
            "method": "GET",
            "url": "https://x/",
        }))
        .unwrap();
        assert!(entry.verify());

        let mut tampered = entry.clone();
        tampered.sequence = 4;
        assert!(!tampered.verify());

        let mut tampered = entry.clone();
        tampered.prev_hash = "def456".into();
        assert!(!tampered.verify());

        let mut tampered = entry.clone();
        tampered.kind = EntryKind::Console;
        assert!(!tampered.verify());

        let mut tampered = entry;
        tampered.data = RawValue::from_string(r#"{"method":"POST"}"#.into()).unwrap();
        assert!(!tampered.verify());
    }

    #[test]
    fn test_entry_serde_preserves_canonical_bytes() {
        // Payload whose key order would not survive a re-encode through a
        // sorted map representation.
        let canonical = r#"{"zeta":1,"alpha":2}"#;
        let entry = Entry::from_canonical(
            1,
            Utc::now(),
            EntryKind::Console,
            String::new(),
            canonical.to_string(),
        )
        .unwrap();

        let json = serde_json::to_string(&entry).unwrap();
        let decoded: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.canonical_data(), canonical);
        assert!(decoded.verify());
    }

    #[test]
    fn test_unknown_wire_tag_defaults_to_console() {
        assert_eq!(EntryKind::from_wire("network"), EntryKind::Network);
        assert_eq!(EntryKind::from_wire(""), EntryKind::Console);
        assert_eq!(EntryKind::from_wire("telemetry"), EntryKind::Console);
        assert_eq!(EntryKind::parse("telemetry"), None);
    }

    #[test]
    fn test_attestation_round_trip() {
        let signer = Signer::generate();
        let attestation = Attestation::new(&signer, 7, "deadbeef");
        assert!(attestation.verify());

        let json = serde_json::to_string(&attestation).unwrap();
        let decoded: Attestation = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, attestation);
        assert!(decoded.verify());
    }

    #[test]
    fn test_attestation_rejects_forged_signature() {
        let signer = Signer::generate();
        let mut attestation = Attestation::new(&signer, 7, "deadbeef");
        attestation.signature[10] ^= 0xff;
        assert!(!attestation.verify());

        let mut attestation = Attestation::new(&signer, 7, "deadbeef");
        attestation.root_hash = "feedface".into();
        assert!(!attestation.verify());
    }

    #[test]
    fn test_scan_chain_reports_first_violation() {
        let e1 = Entry::create(1, "", EntryKind::Console, &ConsoleEvent { line: "a".into() })
            .unwrap();
        let e2 = Entry::create(2, &e1.hash, EntryKind::Console, &ConsoleEvent {
            line: "b".into(),
        })
        .unwrap();
        let e3 = Entry::create(3, &e2.hash, EntryKind::Console, &ConsoleEvent {
            line: "c".into(),
        })
        .unwrap();

        let ok = scan_chain(&[e1.clone(), e2.clone(), e3.clone()]);
        assert!(ok.valid);
        assert_eq!(ok.entry_count, 3);

        let mut broken = e2.clone();
        broken.data = RawValue::from_string(r#"{"line":"TAMPERED"}"#.into()).unwrap();
        let result = scan_chain(&[e1.clone(), broken, e3.clone()]);
        assert!(!result.valid);
        assert_eq!(result.first_invalid_seq, Some(2));

        let result = scan_chain(&[e1, e3]);
        assert!(!result.valid);
        assert_eq!(result.first_invalid_seq, Some(2));
    }

    #[test]
    fn test_payload_kinds() {
        let payload = EventPayload::Ssh(SshEvent {
            action: SshAction::SignDenied,
            host: Some("git.example.com".into()),
            fingerprint: None,
            error: None,
        });
        assert_eq!(payload.kind(), EntryKind::Ssh);

        let value = payload.to_value().unwrap();
        assert_eq!(value["action"], "sign_denied");
        assert!(value.get("fingerprint").is_none());
    }
}
