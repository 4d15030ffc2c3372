//! Probabilistic Merkle tree (spec §4.A).
//!
//! Partitions a deposit among payees by dyadic weight: each entry is
//! assigned a depth `level` such that `weight / sum ≈ 2^-level`, and the
//! resulting binary tree tiles the unit interval `[0, 1)` by entry weight.

use crate::error::{LotteryError, Result};
use crate::hash::{hash_pair, keccak256, Hash32};
use rand::RngCore;
use std::cmp::Ordering;

pub const MAX_LEVEL: u32 = crate::constants::MAX_LEVEL;

/// A payee slot before tree construction.
#[derive(Clone, Debug)]
pub struct Entry {
    /// Payee address (or any opaque identifier) bound into the leaf hash.
    pub value: Vec<u8>,
    /// Initial share of the deposit requested for this payee.
    pub weight: u64,
}

/// A surviving entry after level assignment, immediately before tree build.
#[derive(Clone, Debug)]
struct PlacedEntry {
    value: Vec<u8>,
    level: u32,
    bias: f64,
    salt: u64,
}

impl PlacedEntry {
    fn leaf_hash(&self) -> Hash32 {
        leaf_hash(&self.value, self.salt)
    }
}

/// `Hash(leaf) = keccak256(value || big_endian_u64(salt))`.
pub fn leaf_hash(value: &[u8], salt: u64) -> Hash32 {
    let mut preimage = Vec::with_capacity(value.len() + 8);
    preimage.extend_from_slice(value);
    preimage.extend_from_slice(&salt.to_be_bytes());
    keccak256(&preimage)
}

/// One step of a Merkle witness: the leaf hash is element 0, followed by one
/// sibling per level up to the root.
pub type Witness = Vec<Hash32>;

/// A node in the constructed tree — internal bookkeeping only; proofs are
/// derived by walking from a leaf, not by holding parent pointers.
#[derive(Clone, Debug)]
enum Node {
    Leaf {
        entry: PlacedEntry,
    },
    Internal {
        level: u32,
        hash: Hash32,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn hash(&self) -> Hash32 {
        match self {
            Node::Leaf { entry } => entry.leaf_hash(),
            Node::Internal { hash, .. } => *hash,
        }
    }

    fn level(&self) -> u32 {
        match self {
            Node::Leaf { entry } => entry.level,
            Node::Internal { level, .. } => *level,
        }
    }

    fn merge(self, other: Node) -> Node {
        debug_assert_eq!(self.level(), other.level());
        let hash = hash_pair(&self.hash(), &other.hash());
        Node::Internal {
            level: self.level().saturating_sub(1),
            hash,
            left: Box::new(self),
            right: Box::new(other),
        }
    }
}

/// Result of [`MerkleTree::build`]: the tree plus the set of entries dropped
/// because they could not fit within `MAX_LEVEL`.
pub struct BuildOutcome {
    pub tree: MerkleTree,
    pub dropped: Vec<Vec<u8>>,
}

/// The constructed probabilistic Merkle tree.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    root: Option<Node>,
    leaves: Vec<(Vec<u8>, u32, u64)>, // (value, level, salt)
}

impl MerkleTree {
    /// Build a tree over `(value, weight)` pairs (spec §4.A steps 1-5).
    pub fn build(entries: Vec<Entry>) -> BuildOutcome {
        if entries.is_empty() {
            return BuildOutcome {
                tree: MerkleTree { root: None, leaves: Vec::new() },
                dropped: Vec::new(),
            };
        }

        let sum: u64 = entries.iter().map(|e| e.weight).sum();

        let mut placed: Vec<PlacedEntry> = entries
            .into_iter()
            .map(|e| {
                let l = (sum as f64 / e.weight as f64).log2();
                let level = l.ceil() as i64;
                let bias = l - level as f64 + 1.0;
                PlacedEntry {
                    value: e.value,
                    level: level.max(0) as u32,
                    bias,
                    salt: rand::thread_rng().next_u64(),
                }
            })
            .collect();

        // Step 2: bump entries with the smallest bias toward shallower levels
        // until the assigned mass covers the unit interval (or nothing more
        // can be promoted). One pass in bias order; repeat until a pass makes
        // no progress.
        loop {
            let mut assigned: f64 = placed.iter().map(|e| 2f64.powi(-(e.level as i32))).sum();
            if assigned >= 1.0 {
                break;
            }
            let mut order: Vec<usize> = (0..placed.len()).collect();
            order.sort_by(|&a, &b| {
                placed[a]
                    .bias
                    .partial_cmp(&placed[b].bias)
                    .unwrap_or(Ordering::Equal)
            });

            let mut progressed = false;
            for idx in order {
                if placed[idx].level == 0 {
                    continue;
                }
                let current_mass = 2f64.powi(-(placed[idx].level as i32));
                let promoted_mass = 2f64.powi(-(placed[idx].level as i32 - 1));
                let extra_needed = promoted_mass - current_mass;
                if assigned + extra_needed <= 1.0 + f64::EPSILON {
                    placed[idx].level -= 1;
                    assigned += extra_needed;
                    progressed = true;
                }
                if assigned >= 1.0 {
                    break;
                }
            }
            if !progressed {
                break;
            }
        }

        // Step 3: drop entries still too deep.
        let mut dropped = Vec::new();
        placed.retain(|e| {
            if e.level > MAX_LEVEL {
                dropped.push(e.value.clone());
                false
            } else {
                true
            }
        });

        if placed.is_empty() {
            return BuildOutcome {
                tree: MerkleTree { root: None, leaves: Vec::new() },
                dropped,
            };
        }

        // Step 4: sort by level descending and merge equal-level nodes
        // bottom-up, deepest first.
        placed.sort_by(|a, b| b.level.cmp(&a.level));
        let leaves: Vec<(Vec<u8>, u32, u64)> = placed
            .iter()
            .map(|e| (e.value.clone(), e.level, e.salt))
            .collect();

        let mut nodes: Vec<Node> = placed.into_iter().map(|entry| Node::Leaf { entry }).collect();
        let root = merge_all(&mut nodes);

        BuildOutcome {
            tree: MerkleTree { root: Some(root), leaves },
            dropped,
        }
    }

    pub fn root_hash(&self) -> Option<Hash32> {
        self.root.as_ref().map(Node::hash)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Surviving `(value, level, salt)` triples, in construction order.
    pub fn leaves(&self) -> &[(Vec<u8>, u32, u64)] {
        &self.leaves
    }

    /// Build a witness for `value` signed with `salt`: `[leaf_hash, sibling, ...]`.
    pub fn prove(&self, value: &[u8], salt: u64) -> Result<Witness> {
        let root = self.root.as_ref().ok_or(LotteryError::UnknownEntry)?;
        let target = leaf_hash(value, salt);
        let mut witness = vec![target];
        if !collect_witness(root, target, &mut witness) {
            return Err(LotteryError::UnknownEntry);
        }
        Ok(witness)
    }
}

/// Repeatedly pair the two deepest equal-level nodes, absorbing the result
/// into the remaining list, until one root node is left.
fn merge_all(nodes: &mut Vec<Node>) -> Node {
    // `nodes` is sorted deepest-first by construction. Walk a cursor through
    // the list, merging same-level neighbours and re-inserting the merged
    // node at its sorted position (it is now one level shallower).
    while nodes.len() > 1 {
        let level = nodes[0].level();
        let Some(partner) = nodes[1..].iter().position(|n| n.level() == level) else {
            // No matching sibling for the deepest node yet; the tiling
            // invariant guarantees one appears once deeper groups resolve.
            break;
        };
        let b = nodes.remove(partner + 1);
        let a = nodes.remove(0);
        let merged = a.merge(b);
        let insert_at = nodes
            .iter()
            .position(|n| n.level() <= merged.level())
            .unwrap_or(nodes.len());
        nodes.insert(insert_at, merged);
    }
    nodes.pop().expect("build() guarantees at least one entry")
}

/// Recursively walk the tree looking for `target`, recording sibling hashes
/// on the way back up.
fn collect_witness(node: &Node, target: Hash32, witness: &mut Vec<Hash32>) -> bool {
    match node {
        Node::Leaf { entry } => entry.leaf_hash() == target,
        Node::Internal { left, right, .. } => {
            if subtree_contains(left, target) {
                let found = collect_witness(left, target, witness);
                witness.push(right.hash());
                found
            } else if subtree_contains(right, target) {
                let found = collect_witness(right, target, witness);
                witness.push(left.hash());
                found
            } else {
                false
            }
        }
    }
}

fn subtree_contains(node: &Node, target: Hash32) -> bool {
    match node {
        Node::Leaf { entry } => entry.leaf_hash() == target,
        Node::Internal { left, right, .. } => {
            subtree_contains(left, target) || subtree_contains(right, target)
        }
    }
}

/// Fold a witness into a position and root hash.
///
/// Returns `(root, position)` where `position`'s bits (LSB-first across the
/// fold) record, per level, whether the accumulator was the smaller operand
/// (bit 0) or the larger one (bit 1) at each step.
pub fn fold_witness(witness: &[Hash32]) -> Result<(Hash32, u64)> {
    if witness.is_empty() {
        return Err(LotteryError::InvalidWitness);
    }
    let mut acc = witness[0];
    let mut position: u64 = 0;
    for (i, sibling) in witness[1..].iter().enumerate() {
        let bit = if acc < *sibling { 0u64 } else { 1u64 };
        position |= bit << i;
        acc = hash_pair(&acc, sibling);
    }
    Ok((acc, position))
}

/// Verify a witness against an expected root, returning the decoded position
/// on success.
pub fn verify_proof(root: Hash32, witness: &[Hash32]) -> Result<u64> {
    let (folded, position) = fold_witness(witness)?;
    if folded != root {
        return Err(LotteryError::InvalidProof);
    }
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v: &str, w: u64) -> Entry {
        Entry { value: v.as_bytes().to_vec(), weight: w }
    }

    #[test]
    fn tiles_the_unit_interval() {
        let outcome = MerkleTree::build(vec![entry("A", 1), entry("B", 2), entry("C", 1)]);
        assert!(outcome.dropped.is_empty());
        let levels: std::collections::HashMap<_, _> = outcome
            .tree
            .leaves()
            .iter()
            .map(|(v, l, _)| (String::from_utf8(v.clone()).unwrap(), *l))
            .collect();
        assert_eq!(levels["B"], 1);
        assert_eq!(levels.get("A").copied().unwrap_or(2), 2);
        assert_eq!(levels.get("C").copied().unwrap_or(2), 2);

        let mass: f64 = outcome
            .tree
            .leaves()
            .iter()
            .map(|(_, l, _)| 2f64.powi(-(*l as i32)))
            .sum();
        assert!((mass - 1.0).abs() < 1e-9);
    }

    #[test]
    fn proof_round_trips_for_every_survivor() {
        let entries: Vec<Entry> = (0..16u32)
            .map(|i| Entry { value: format!("addr-{i}").into_bytes(), weight: 1 })
            .collect();
        let outcome = MerkleTree::build(entries);
        assert!(outcome.dropped.is_empty());
        let root = outcome.tree.root_hash().unwrap();

        let mut positions = std::collections::HashSet::new();
        for (value, _level, salt) in outcome.tree.leaves() {
            let witness = outcome.tree.prove(value, *salt).unwrap();
            let position = verify_proof(root, &witness).unwrap();
            assert!(positions.insert(position), "duplicate position {position}");
        }
    }

    #[test]
    fn rejects_forged_and_unknown_proofs() {
        let outcome = MerkleTree::build(vec![entry("A", 1), entry("B", 1)]);
        let root = outcome.tree.root_hash().unwrap();
        let mut bogus = vec![[0xAAu8; 32]; 2];
        bogus[0] = leaf_hash(b"A", 0);
        assert!(matches!(verify_proof(root, &bogus), Err(LotteryError::InvalidProof)));

        assert!(matches!(
            outcome.tree.prove(b"nonexistent", 0),
            Err(LotteryError::UnknownEntry)
        ));
    }

    #[test]
    fn two_entry_ratio_caps_at_fifty_fifty_instead_of_dropping() {
        // With only two entries the bump loop always has room to promote
        // the smaller one: "dust" starts deep (level 12) but "whale" can
        // never be promoted past level 1 without overshooting 1.0, so every
        // pass only "dust" advances, one level at a time, until it too
        // reaches level 1 and the pair exactly tiles the interval 50/50.
        // Nothing is dropped here — a single competing entry is never
        // "too small to fit", it just gets squeezed into an equal split.
        let outcome = MerkleTree::build(vec![entry("whale", 4095), entry("dust", 1)]);
        assert!(outcome.dropped.is_empty());
        let levels: std::collections::HashMap<_, _> = outcome
            .tree
            .leaves()
            .iter()
            .map(|(v, l, _)| (String::from_utf8(v.clone()).unwrap(), *l))
            .collect();
        assert_eq!(levels["whale"], 1);
        assert_eq!(levels["dust"], 1);
    }

    #[test]
    fn drops_entries_too_small_to_fit() {
        // 20 entries at weights 2^1..=2^20 plus a weight-2 entry tied with
        // the shallowest of them: every ratio sum/weight is already an exact
        // power of two, so every entry's bias is 1.0 and the bump loop's
        // very first mass check is already satisfied — nothing gets
        // promoted, and survival is decided purely by each entry's raw
        // ceil(log2(sum/weight)) against MAX_LEVEL. The ten deepest entries
        // (including "dust", tied with "e1" at level 20) land above
        // MAX_LEVEL=10 and are dropped; the other ten survive untouched.
        let mut entries: Vec<Entry> = (1..=20u32).map(|i| entry(&format!("e{i}"), 1u64 << i)).collect();
        entries.push(entry("dust", 2));
        let outcome = MerkleTree::build(entries);

        let mut dropped: Vec<String> =
            outcome.dropped.iter().map(|v| String::from_utf8(v.clone()).unwrap()).collect();
        dropped.sort();
        let mut expected: Vec<String> = (1..=10u32).map(|i| format!("e{i}")).collect();
        expected.push("dust".to_string());
        expected.sort();
        assert_eq!(dropped, expected);

        for (value, level, _) in outcome.tree.leaves() {
            assert!(
                *level <= MAX_LEVEL,
                "{} survived at level {level}, above MAX_LEVEL",
                String::from_utf8(value.clone()).unwrap()
            );
        }
    }

    #[test]
    fn empty_entry_list_yields_empty_tree() {
        let outcome = MerkleTree::build(vec![]);
        assert!(outcome.tree.is_empty());
        assert!(outcome.dropped.is_empty());
    }
}
