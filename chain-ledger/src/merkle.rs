//! Merkle tree over transaction hashes
//!
//! # Design
//!
//! - Binary tree, each parent is `SHA256(SHA256(left || right))` over raw bytes
//! - Odd levels duplicate their last node
//! - A single leaf is its own root; no leaves gives [`ZERO_HASH`]
//! - Inclusion proofs walk the same pairing from leaf to root

use crate::crypto::{decode_hash, double_sha256, ZERO_HASH};
use crate::Result;

/// Hash a pair of nodes
fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut concat = [0u8; 64];
    concat[..32].copy_from_slice(left);
    concat[32..].copy_from_slice(right);
    double_sha256(&concat)
}

/// Reduce one level into its parents
fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => hash_pair(left, right),
            [single] => hash_pair(single, single),
            _ => unreachable!("chunks(2) yields one or two nodes"),
        })
        .collect()
}

/// Merkle root of hex-encoded transaction hashes, in the given order
pub fn compute_merkle_root<S: AsRef<str>>(hashes: &[S]) -> Result<String> {
    if hashes.is_empty() {
        return Ok(ZERO_HASH.to_string());
    }

    let tree = MerkleTree::from_hex_leaves(hashes)?;
    Ok(hex::encode(tree.root()))
}

/// Merkle proof (path from leaf to root)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    /// Leaf hash being proven
    pub leaf_hash: [u8; 32],
    /// Sibling hashes along the path to root
    pub siblings: Vec<(Direction, [u8; 32])>,
    /// Root hash
    pub root_hash: [u8; 32],
}

/// Direction of sibling in Merkle tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sibling is on the left
    Left,
    /// Sibling is on the right
    Right,
}

impl MerkleProof {
    /// Verify proof against its root hash
    pub fn verify(&self) -> bool {
        let mut current_hash = self.leaf_hash;

        for (direction, sibling_hash) in &self.siblings {
            current_hash = match direction {
                Direction::Left => hash_pair(sibling_hash, &current_hash),
                Direction::Right => hash_pair(&current_hash, sibling_hash),
            };
        }

        current_hash == self.root_hash
    }

    /// Verify against an externally known root (e.g. a block's `merkle_root`)
    pub fn verify_against(&self, merkle_root: &str) -> bool {
        match decode_hash(merkle_root) {
            Ok(root) => root == self.root_hash && self.verify(),
            Err(_) => false,
        }
    }

    /// Root as lowercase hex
    pub fn root_hex(&self) -> String {
        hex::encode(self.root_hash)
    }
}

/// Merkle tree built from a fixed list of leaves
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
}

impl MerkleTree {
    /// Create tree from raw leaves
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        Self { leaves }
    }

    /// Create tree from hex-encoded leaves
    pub fn from_hex_leaves<S: AsRef<str>>(hashes: &[S]) -> Result<Self> {
        let leaves = hashes
            .iter()
            .map(|h| decode_hash(h.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_leaves(leaves))
    }

    /// Get number of leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Compute Merkle root
    pub fn root(&self) -> [u8; 32] {
        if self.leaves.is_empty() {
            return [0u8; 32];
        }

        let mut current_level = self.leaves.clone();
        while current_level.len() > 1 {
            current_level = next_level(&current_level);
        }
        current_level[0]
    }

    /// Generate Merkle proof for a leaf at given index
    pub fn generate_proof(&self, leaf_index: usize) -> Option<MerkleProof> {
        let leaf_hash = *self.leaves.get(leaf_index)?;
        let mut siblings = Vec::new();

        let mut current_level = self.leaves.clone();
        let mut current_index = leaf_index;

        while current_level.len() > 1 {
            let is_left = current_index % 2 == 0;
            let (direction, sibling_index) = if is_left {
                // Last node on an odd level pairs with itself
                (
                    Direction::Right,
                    (current_index + 1).min(current_level.len() - 1),
                )
            } else {
                (Direction::Left, current_index - 1)
            };

            siblings.push((direction, current_level[sibling_index]));

            current_level = next_level(&current_level);
            current_index /= 2;
        }

        Some(MerkleProof {
            leaf_hash,
            siblings,
            root_hash: current_level[0],
        })
    }

    /// Verify that a leaf exists in the tree at `leaf_index`
    pub fn verify_leaf(&self, leaf_index: usize, leaf_hash: [u8; 32]) -> bool {
        if self.leaves.get(leaf_index) != Some(&leaf_hash) {
            return false;
        }

        self.generate_proof(leaf_index)
            .map(|proof| proof.verify())
            .unwrap_or(false)
    }
}
