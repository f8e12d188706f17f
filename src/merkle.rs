//! Fixed-depth incremental Merkle accumulators.
//!
//! Leaves are appended at the next free index and the tree is always treated
//! as holding `2^depth` positions: unused positions carry the tree's zero
//! value.  Interior nodes are Poseidon two-to-one compressions, so the root is
//! a pure function of the ordered leaf sequence and matches the contract's
//! incremental tree after the same insertions.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{MaciError, MaciResult};
use crate::poseidon::hash_pair;

/// Largest supported tree depth.
pub const MAX_TREE_DEPTH: u8 = 32;

static NOTHING_UP_MY_SLEEVE: Lazy<Fr> =
    Lazy::new(|| Fr::from_be_bytes_mod_order(&Keccak256::digest(b"Maci")));

/// Zero leaf of the state and message trees: `keccak256("Maci") mod p`.
pub fn nothing_up_my_sleeve() -> Fr {
    *NOTHING_UP_MY_SLEEVE
}

/// Append-only binary Merkle tree with `O(depth)` insertion.
#[derive(Debug, Clone)]
pub struct IncrementalTree {
    depth: u8,
    zero: Fr,
    // zeros[h] is the root of an empty subtree of height h.
    zeros: Vec<Fr>,
    // levels[0] holds the leaves, levels[h] the filled nodes at height h.
    levels: Vec<Vec<Fr>>,
}

impl IncrementalTree {
    /// Creates an empty tree.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is zero or exceeds [`MAX_TREE_DEPTH`]; round
    /// configurations are validated before any tree is built.
    pub fn new(depth: u8, zero: Fr) -> Self {
        assert!(
            (1..=MAX_TREE_DEPTH).contains(&depth),
            "tree depth must be in 1..=32"
        );
        let mut zeros = Vec::with_capacity(depth as usize + 1);
        zeros.push(zero);
        for h in 0..depth as usize {
            let below = zeros[h];
            zeros.push(hash_pair(&below, &below));
        }
        Self {
            depth,
            zero,
            zeros,
            levels: vec![Vec::new(); depth as usize + 1],
        }
    }

    /// Builds a tree by inserting `leaves` in order.
    pub fn from_leaves(depth: u8, zero: Fr, leaves: &[Fr]) -> MaciResult<Self> {
        let mut tree = Self::new(depth, zero);
        for leaf in leaves {
            tree.insert(*leaf)?;
        }
        Ok(tree)
    }

    /// Tree depth.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Value of an unused leaf position.
    pub fn zero_value(&self) -> Fr {
        self.zero
    }

    /// Number of leaf positions.
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Index the next insertion will receive.
    pub fn next_index(&self) -> u64 {
        self.levels[0].len() as u64
    }

    /// Free leaf positions left.
    pub fn remaining(&self) -> u64 {
        self.capacity() - self.next_index()
    }

    /// Inserted leaves in index order.
    pub fn leaves(&self) -> &[Fr] {
        &self.levels[0]
    }

    /// Leaf at `index`, or the zero value for an unused position.
    pub fn leaf(&self, index: u64) -> Fr {
        self.levels[0]
            .get(index as usize)
            .copied()
            .unwrap_or(self.zero)
    }

    /// Appends `leaf` and returns its index.
    pub fn insert(&mut self, leaf: Fr) -> MaciResult<u64> {
        if self.next_index() >= self.capacity() {
            return Err(MaciError::CapacityExceeded {
                depth: self.depth,
                capacity: self.capacity(),
            });
        }
        let index = self.next_index();
        self.levels[0].push(leaf);
        let mut idx = index as usize;
        let mut node = leaf;
        for h in 0..self.depth as usize {
            let sibling_idx = idx ^ 1;
            let sibling = self.node(h, sibling_idx);
            node = if idx % 2 == 0 {
                hash_pair(&node, &sibling)
            } else {
                hash_pair(&sibling, &node)
            };
            idx /= 2;
            let parent_level = &mut self.levels[h + 1];
            if idx < parent_level.len() {
                parent_level[idx] = node;
            } else {
                parent_level.push(node);
            }
        }
        Ok(index)
    }

    /// Current root over all `2^depth` positions.
    pub fn root(&self) -> Fr {
        self.levels[self.depth as usize]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.depth as usize])
    }

    /// Authentication path for the leaf position `index`.
    pub fn path(&self, index: u64) -> MaciResult<MerklePath> {
        if index >= self.capacity() {
            return Err(MaciError::CapacityExceeded {
                depth: self.depth,
                capacity: self.capacity(),
            });
        }
        let mut idx = index as usize;
        let mut siblings = Vec::with_capacity(self.depth as usize);
        for h in 0..self.depth as usize {
            siblings.push(self.node(h, idx ^ 1));
            idx /= 2;
        }
        Ok(MerklePath { index, siblings })
    }

    fn node(&self, height: usize, idx: usize) -> Fr {
        self.levels[height]
            .get(idx)
            .copied()
            .unwrap_or(self.zeros[height])
    }
}

/// Sibling hashes from a leaf up to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// Leaf position the path authenticates.
    pub index: u64,
    /// Sibling at each height, leaf level first.
    #[serde(with = "crate::data::fr_hex_vec")]
    pub siblings: Vec<Fr>,
}

impl MerklePath {
    /// Recomputes the root implied by `leaf` sitting at this path's index.
    pub fn compute_root(&self, leaf: &Fr) -> Fr {
        let mut idx = self.index;
        let mut hash = *leaf;
        for sibling in &self.siblings {
            hash = if idx % 2 == 0 {
                hash_pair(&hash, sibling)
            } else {
                hash_pair(sibling, &hash)
            };
            idx /= 2;
        }
        hash
    }

    /// Checks that `leaf` at this path's index produces `root`.
    pub fn verify(&self, leaf: &Fr, root: &Fr) -> bool {
        self.compute_root(leaf) == *root
    }

    /// Serialises the path to JSON with hex-encoded siblings.
    pub fn to_json_string(&self) -> MaciResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a path previously emitted by [`MerklePath::to_json_string`].
    pub fn from_json_str(input: &str) -> MaciResult<Self> {
        Ok(serde_json::from_str(input)?)
    }
}
