//! Binary SHA-256 Merkle root over a stream's content hashes.
//!
//! Leaves are `SHA-256(0x00 || content_hash)` and interior nodes are
//! `SHA-256(0x01 || left || right)`, so a leaf can never be passed off as a
//! node.  An odd node at the end of a level is carried up unchanged.  The
//! root of an empty list is the genesis sentinel.

use sha2::{Digest, Sha256};

use vigil_contracts::record::LedgerRecord;

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

fn leaf(content_hash: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(content_hash.as_bytes());
    hasher.finalize().into()
}

fn node(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Hex Merkle root of `content_hashes`, in the order given.
pub fn merkle_root(content_hashes: &[String]) -> String {
    if content_hashes.is_empty() {
        return LedgerRecord::GENESIS_HASH.to_string();
    }

    let mut level: Vec<[u8; 32]> = content_hashes.iter().map(|h| leaf(h)).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node(left, right),
                _ => pair[0],
            })
            .collect();
    }
    hex::encode(level[0])
}
