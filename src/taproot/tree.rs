use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use super::hashes::hash_tap_branch;
use super::TaprootError;

pub const TAPROOT_MAX_DEPTH: u8 = 128;

/// Merkle root of a script tree and, per leaf, the sibling hashes from leaf to root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taptree {
    pub root: [u8; 32],
    pub paths: BTreeMap<usize, Vec<[u8; 32]>>,
}

struct Subtree {
    hash: [u8; 32],
    leaves: Vec<usize>,
}

impl Subtree {
    fn leaf(index: usize, hash: [u8; 32]) -> Self {
        Subtree {
            hash,
            leaves: vec![index],
        }
    }

    fn combine(self, other: Subtree, paths: &mut BTreeMap<usize, Vec<[u8; 32]>>) -> Subtree {
        for leaf in &self.leaves {
            paths.entry(*leaf).or_default().push(other.hash);
        }
        for leaf in &other.leaves {
            paths.entry(*leaf).or_default().push(self.hash);
        }
        let mut leaves = self.leaves;
        leaves.extend(other.leaves);
        Subtree {
            hash: hash_tap_branch(&self.hash, &other.hash),
            leaves,
        }
    }
}

impl Taptree {
    /// Build a weight-balanced tree. Heavier leaves end up closer to the root.
    ///
    /// Equal weights are combined in insertion order.
    pub fn huffman(leaves: &[(u32, [u8; 32])]) -> Result<Taptree, TaprootError> {
        if leaves.is_empty() {
            return Err(TaprootError::EmptyTree);
        }
        let mut nodes: Vec<Option<Subtree>> = Vec::with_capacity(leaves.len() * 2);
        let mut queue = BinaryHeap::new();
        let mut paths = BTreeMap::new();
        for (index, (weight, hash)) in leaves.iter().enumerate() {
            if *weight == 0 {
                return Err(TaprootError::InvalidWeight(index));
            }
            paths.insert(index, Vec::new());
            queue.push(Reverse((u64::from(*weight), nodes.len())));
            nodes.push(Some(Subtree::leaf(index, *hash)));
        }

        while let (Some(Reverse((wa, a))), Some(Reverse((wb, b)))) = (queue.pop(), queue.pop()) {
            let (Some(left), Some(right)) = (nodes[a].take(), nodes[b].take()) else {
                return Err(TaprootError::IncompleteTree);
            };
            let combined = left.combine(right, &mut paths);
            queue.push(Reverse((wa + wb, nodes.len())));
            nodes.push(Some(combined));
        }

        let root = nodes
            .iter_mut()
            .rev()
            .find_map(Option::take)
            .ok_or(TaprootError::EmptyTree)?;
        Ok(Taptree {
            root: root.hash,
            paths,
        })
    }

    /// Huffman tree with every leaf at weight 1.
    pub fn balanced(leaf_hashes: &[[u8; 32]]) -> Result<Taptree, TaprootError> {
        let weighted: Vec<_> = leaf_hashes.iter().map(|hash| (1, *hash)).collect();
        Taptree::huffman(&weighted)
    }

    /// Build a tree from leaves given in depth-first pre-order as `(depth, leaf_hash)`.
    pub fn depth_first(leaves: &[(u8, [u8; 32])]) -> Result<Taptree, TaprootError> {
        if leaves.is_empty() {
            return Err(TaprootError::EmptyTree);
        }
        let mut stack: Vec<(u8, Subtree)> = Vec::new();
        let mut paths = BTreeMap::new();
        for (index, (depth, hash)) in leaves.iter().enumerate() {
            if *depth > TAPROOT_MAX_DEPTH {
                return Err(TaprootError::DepthExceeded(*depth));
            }
            if stack.last().is_some_and(|(top, _)| top > depth) {
                return Err(TaprootError::IncompleteTree);
            }
            paths.insert(index, Vec::new());
            stack.push((*depth, Subtree::leaf(index, *hash)));

            while stack.len() >= 2 && stack[stack.len() - 1].0 == stack[stack.len() - 2].0 {
                let (Some((depth, right)), Some((_, left))) = (stack.pop(), stack.pop()) else {
                    return Err(TaprootError::IncompleteTree);
                };
                if depth == 0 {
                    return Err(TaprootError::IncompleteTree);
                }
                stack.push((depth - 1, left.combine(right, &mut paths)));
            }
        }
        match stack.pop() {
            Some((0, root)) if stack.is_empty() => Ok(Taptree {
                root: root.hash,
                paths,
            }),
            _ => Err(TaprootError::IncompleteTree),
        }
    }

    pub fn path(&self, leaf_index: usize) -> Option<&[[u8; 32]]> {
        self.paths.get(&leaf_index).map(Vec::as_slice)
    }

    pub fn depth(&self, leaf_index: usize) -> Option<usize> {
        self.path(leaf_index).map(<[_]>::len)
    }
}

/// Recompute the root from a leaf hash and its sibling path and compare.
pub fn verify_merkle_path(leaf_hash: &[u8; 32], path: &[[u8; 32]], root: &[u8; 32]) -> bool {
    let computed = path
        .iter()
        .fold(*leaf_hash, |node, sibling| hash_tap_branch(&node, sibling));
    &computed == root
}
