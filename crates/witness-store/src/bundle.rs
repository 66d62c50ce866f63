//! Portable proof bundle for offline verification.
//!
//! A bundle carries everything a third party needs to check a run without
//! the database: the full entry chain, the Merkle root, every attestation
//! and the Rekor blobs recorded alongside. Rekor proofs are reported as
//! present but never verified here, since that requires network access to
//! the transparency log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use witness_merkle::MerkleTree;

use crate::{
    leaf_pairs, rfc3339, scan_chain, Attestation, Entry, InclusionProof, RekorProof, StoreError,
};

pub const BUNDLE_VERSION: u32 = 1;

/// Self-contained export of one audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofBundle {
    pub version: u32,
    #[serde(with = "rfc3339")]
    pub created_at: DateTime<Utc>,
    pub merkle_root: String,
    pub entries: Vec<Entry>,
    pub attestations: Vec<Attestation>,
    pub rekor_proofs: Vec<RekorProof>,
    pub inclusion_proofs: Vec<InclusionProof>,
}

/// Outcome of a full verification pass, shared by bundle and store-backed
/// audits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub valid: bool,
    pub hash_chain_valid: bool,
    pub root_hash_valid: bool,
    pub attestations_valid: bool,
    pub rekor_proofs_present: bool,
    pub entry_count: u64,
    pub first_invalid_seq: Option<u64>,
    pub error: Option<String>,
}

impl VerifyResult {
    pub(crate) fn passing(entry_count: u64, rekor_proofs_present: bool) -> Self {
        Self {
            valid: true,
            hash_chain_valid: true,
            root_hash_valid: true,
            attestations_valid: true,
            rekor_proofs_present,
            entry_count,
            first_invalid_seq: None,
            error: None,
        }
    }

    /// One-line verdict for human-readable reports.
    pub fn verdict(&self) -> String {
        if self.valid {
            format!("INTACT — {} entries verified", self.entry_count)
        } else {
            let reason = self.error.as_deref().unwrap_or("verification failed");
            format!("TAMPERED — {reason}")
        }
    }
}

impl ProofBundle {
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string_pretty(self).map_err(StoreError::Marshal)
    }

    pub fn from_json(text: &str) -> Result<Self, StoreError> {
        serde_json::from_str(text).map_err(StoreError::Marshal)
    }

    /// Verify the bundle offline: hash chain, Merkle root, attestation
    /// signatures, and Rekor proof presence.
    pub fn verify(&self) -> VerifyResult {
        let mut result = VerifyResult::passing(
            self.entries.len() as u64,
            !self.rekor_proofs.is_empty(),
        );
        if self.entries.is_empty() {
            return result;
        }

        let chain = scan_chain(&self.entries);
        if !chain.valid {
            result.valid = false;
            result.hash_chain_valid = false;
            result.first_invalid_seq = chain.first_invalid_seq;
            result.error = chain.error;
            return result;
        }

        let tree = MerkleTree::build(&leaf_pairs(&self.entries));
        if tree.root() != self.merkle_root {
            result.valid = false;
            result.root_hash_valid = false;
            result.error = Some(format!(
                "merkle root mismatch: bundle claims {}, entries compute {}",
                self.merkle_root,
                tree.root()
            ));
        }

        for attestation in &self.attestations {
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

        result
    }
}
