// Merkle tree over transaction IDs

use crate::core::{sha256, Hash256};

/// A node in the Merkle tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    pub data: Hash256,
}

impl MerkleNode {
    fn leaf(txid: &Hash256) -> Self {
        Self {
            left: None,
            right: None,
            data: sha256(txid.as_bytes()),
        }
    }

    fn parent(left: MerkleNode, right: MerkleNode) -> Self {
        let mut combined = Vec::with_capacity(64);
        combined.extend_from_slice(left.data.as_bytes());
        combined.extend_from_slice(right.data.as_bytes());
        Self {
            data: sha256(&combined),
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
        }
    }
}

/// Binary hash tree summarizing a block's transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    pub root: MerkleNode,
}

impl MerkleTree {
    /// Build the tree; an odd node at any level is paired with itself
    pub fn new(txids: &[Hash256]) -> Self {
        let mut level: Vec<MerkleNode> = txids.iter().map(MerkleNode::leaf).collect();

        if level.is_empty() {
            return Self {
                root: MerkleNode { left: None, right: None, data: Hash256::zero() },
            };
        }

        while level.len() > 1 {
            let mut next_level = Vec::with_capacity(level.len().div_ceil(2));
            let mut nodes = level.into_iter();

            while let Some(left) = nodes.next() {
                let right = nodes.next().unwrap_or_else(|| left.clone());
                next_level.push(MerkleNode::parent(left, right));
            }

            level = next_level;
        }

        Self { root: level.remove(0) }
    }

    pub fn root_hash(&self) -> Hash256 {
        self.root.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u8) -> Vec<Hash256> {
        (1..=n).map(|i| Hash256::new([i; 32])).collect()
    }

    #[test]
    fn test_single_leaf_root() {
        let txids = ids(1);
        let tree = MerkleTree::new(&txids);
        assert_eq!(tree.root_hash(), sha256(txids[0].as_bytes()));
        assert!(tree.root.left.is_none());
    }

    #[test]
    fn test_two_leaves() {
        let txids = ids(2);
        let left = sha256(txids[0].as_bytes());
        let right = sha256(txids[1].as_bytes());
        let mut combined = left.as_bytes().to_vec();
        combined.extend_from_slice(right.as_bytes());

        assert_eq!(MerkleTree::new(&txids).root_hash(), sha256(&combined));
    }

    #[test]
    fn test_odd_leaf_is_duplicated() {
        let three = ids(3);
        let mut four = three.clone();
        four.push(three[2]);

        assert_eq!(MerkleTree::new(&three).root_hash(), MerkleTree::new(&four).root_hash());
    }

    #[test]
    fn test_order_matters() {
        let txids = ids(4);
        let mut reversed = txids.clone();
        reversed.reverse();

        assert_ne!(MerkleTree::new(&txids).root_hash(), MerkleTree::new(&reversed).root_hash());
    }

    #[test]
    fn test_empty_tree() {
        assert_eq!(MerkleTree::new(&[]).root_hash(), Hash256::zero());
    }
}
