//! Merkle-proof gated whitelist.
//!
//! Leaves are `sha256(address)`; each level hashes the sorted pair so proofs carry no
//! left/right flags.

use crate::{LotteryError, Result};
use rentpool_core::Address;
use sha2::{Digest, Sha256};

pub type Hash = [u8; 32];

pub fn leaf_hash(address: &Address) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.finalize().into()
}

fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);
    hasher.finalize().into()
}

/// Parse hex-encoded proof nodes; `0x` prefixes are accepted.
pub fn parse_proof<S: AsRef<str>>(nodes: &[S]) -> Result<Vec<Hash>> {
    nodes
        .iter()
        .map(|node| {
            let node = node.as_ref();
            let bytes = hex::decode(node.trim_start_matches("0x"))
                .map_err(|e| LotteryError::MalformedProof(format!("{}: {}", node, e)))?;
            Hash::try_from(bytes.as_slice())
                .map_err(|_| LotteryError::MalformedProof(format!("{}: expected 32 bytes", node)))
        })
        .collect()
}

/// Checks membership proofs against a fixed root.
#[derive(Debug, Clone)]
pub struct WhitelistVerifier {
    root: Hash,
}

impl WhitelistVerifier {
    pub fn new(root: Hash) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Hash {
        &self.root
    }

    pub fn is_valid(&self, proof: &[Hash], address: &Address) -> bool {
        let computed = proof
            .iter()
            .fold(leaf_hash(address), |acc, sibling| hash_pair(&acc, sibling));
        computed == self.root
    }

    /// Append `address` to `members` if the proof checks out. Invalid proofs and existing
    /// members leave `members` untouched. Returns whether the address was added.
    pub fn verify(&self, members: &mut Vec<Address>, proof: &[Hash], address: &Address) -> bool {
        if !self.is_valid(proof, address) {
            tracing::debug!("Whitelist proof rejected for {}", address);
            return false;
        }

        if members.contains(address) {
            return false;
        }

        members.push(address.clone());
        tracing::info!("Whitelisted {} (member #{})", address, members.len() - 1);
        true
    }
}

/// Builds roots and proofs for an address list. Odd nodes are carried up unpaired.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn new(addresses: &[Address]) -> Self {
        let mut levels = vec![addresses.iter().map(leaf_hash).collect::<Vec<_>>()];

        while levels.last().map_or(false, |level| level.len() > 1) {
            let next = levels
                .last()
                .map(|level| {
                    level
                        .chunks(2)
                        .map(|pair| match pair {
                            [a, b] => hash_pair(a, b),
                            [a] => *a,
                            _ => unreachable!("chunks(2) yields one or two nodes"),
                        })
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            levels.push(next);
        }

        Self { levels }
    }

    /// Root of the tree; all zeroes when empty.
    pub fn root(&self) -> Hash {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or([0u8; 32])
    }

    pub fn proof(&self, address: &Address) -> Option<Vec<Hash>> {
        let leaf = leaf_hash(address);
        let mut index = self.levels.first()?.iter().position(|h| *h == leaf)?;

        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            if let Some(hash) = level.get(sibling) {
                proof.push(*hash);
            }
            index /= 2;
        }

        Some(proof)
    }
}
