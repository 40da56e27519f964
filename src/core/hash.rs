// Hashing utilities

use sha2::{Sha256, Digest};
use crate::core::{Hash256, PubKeyHash};

/// Single SHA256, the content hash for blocks, transactions and Merkle nodes
pub fn sha256(data: &[u8]) -> Hash256 {
    let hash = Sha256::digest(data);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    Hash256::new(result)
}

/// SHA256(SHA256(data)) - used for address checksums
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);
    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    result
}

/// RIPEMD160(SHA256(data)) - the lock hash of a public key
pub fn hash160(data: &[u8]) -> PubKeyHash {
    use ripemd::{Ripemd160, Digest as RipemdDigest};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}
