//! Binary Merkle tree over audit chain entries.
//!
//! Two builders share one node format: [`MerkleTree`] constructs the full
//! tree from a batch of entry hashes and can produce inclusion proofs;
//! [`IncrementalMerkle`] maintains only the frontier of perfect-subtree
//! roots and extends it in amortized O(1) per append. Both compute the same
//! root for the same leaves, for every tree size.
//!
//! Leaves are `SHA-256(0x00 || entry_hash_hex)`, interior nodes
//! `SHA-256(0x01 || left_hex || right_hex)`. A level with an odd node count
//! promotes its trailing node unchanged to the next level, never duplicates
//! it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use witness_enc::{domain_hash_hex, domains};

#[derive(Error, Debug)]
pub enum MerkleError {
    #[error("empty tree cannot prove inclusion")]
    EmptyTree,
    #[error("entry {0} is not a leaf of this tree")]
    EntryNotFound(u64),
}

/// Hash a chain entry hash into its leaf digest.
pub fn leaf_hash(entry_hash: &str) -> String {
    domain_hash_hex(domains::LEAF, &[entry_hash.as_bytes()])
}

/// Combine two child digests into their parent digest.
pub fn node_hash(left: &str, right: &str) -> String {
    domain_hash_hex(domains::NODE, &[left.as_bytes(), right.as_bytes()])
}

/// One sibling on the path from a leaf to the root.
///
/// `is_right` records the sibling's side: true when the sibling sits to the
/// right of the running hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub is_right: bool,
}

/// Self-contained inclusion proof for one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub entry_seq: u64,
    pub leaf_hash: String,
    pub root_hash: String,
    pub siblings: Vec<ProofStep>,
}

impl InclusionProof {
    /// Fold the siblings bottom-up and compare against `root_hash`.
    pub fn verify(&self) -> bool {
        let mut current = self.leaf_hash.clone();
        for step in &self.siblings {
            current = if step.is_right {
                node_hash(&current, &step.hash)
            } else {
                node_hash(&step.hash, &current)
            };
        }
        current == self.root_hash
    }
}

/// Batch-built Merkle tree retaining every level.
///
/// Level 0 holds the leaf digests in sequence order; the last level holds
/// the root alone.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    seqs: Vec<u64>,
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    /// Build the tree from `(sequence, entry_hash)` pairs in log order.
    pub fn build(entries: &[(u64, String)]) -> Self {
        let seqs = entries.iter().map(|(seq, _)| *seq).collect();
        if entries.is_empty() {
            return Self { seqs, levels: Vec::new() };
        }

        let leaves: Vec<String> = entries.iter().map(|(_, h)| leaf_hash(h)).collect();
        let mut levels = vec![leaves];
        while levels.last().map(Vec::len).unwrap_or(0) > 1 {
            let current = levels.last().expect("non-empty levels");
            let mut next = Vec::with_capacity((current.len() + 1) / 2);
            for pair in current.chunks(2) {
                match pair {
                    [left, right] => next.push(node_hash(left, right)),
                    // Odd trailing node is promoted unchanged.
                    [lone] => next.push(lone.clone()),
                    _ => unreachable!("chunks(2) yields 1 or 2 nodes"),
                }
            }
            levels.push(next);
        }

        Self { seqs, levels }
    }

    /// Root digest, or the empty string for an empty tree.
    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// Collect the sibling path for the leaf carrying `seq`.
    pub fn prove_inclusion(&self, seq: u64) -> Result<InclusionProof, MerkleError> {
        if self.is_empty() {
            return Err(MerkleError::EmptyTree);
        }
        let mut index = self
            .seqs
            .iter()
            .position(|s| *s == seq)
            .ok_or(MerkleError::EntryNotFound(seq))?;

        let leaf = self.levels[0][index].clone();
        let mut siblings = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            // A promoted node has no sibling at this level.
            if sibling < level.len() {
                siblings.push(ProofStep {
                    hash: level[sibling].clone(),
                    is_right: index % 2 == 0,
                });
            }
            index /= 2;
        }

        Ok(InclusionProof {
            entry_seq: seq,
            leaf_hash: leaf,
            root_hash: self.root(),
            siblings,
        })
    }
}

/// Incremental Merkle frontier.
///
/// Slot `i`, when occupied, holds the root of a perfect subtree of `2^i`
/// leaves. Appending a leaf carries through occupied slots exactly like
/// binary addition; the root folds the occupied slots together, placing the
/// older (larger) subtree on the left.
#[derive(Debug, Clone, Default)]
pub struct IncrementalMerkle {
    slots: Vec<Option<String>>,
    len: u64,
}

impl IncrementalMerkle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest the next entry hash in sequence order.
    pub fn append(&mut self, entry_hash: &str) {
        let mut carry = leaf_hash(entry_hash);
        self.len += 1;
        for slot in self.slots.iter_mut() {
            match slot.take() {
                Some(left) => carry = node_hash(&left, &carry),
                None => {
                    *slot = Some(carry);
                    return;
                }
            }
        }
        self.slots.push(Some(carry));
    }

    /// Current root digest, identical to [`MerkleTree::root`] over the same
    /// leaves. Empty string before the first append.
    pub fn root_hash(&self) -> String {
        let mut acc: Option<String> = None;
        for slot in self.slots.iter().flatten() {
            acc = Some(match acc {
                None => slot.clone(),
                Some(right) => node_hash(slot, &right),
            });
        }
        acc.unwrap_or_default()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
