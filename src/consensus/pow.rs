// Proof of Work implementation

use crate::config::ChainParams;
use crate::core::{Block, BlockHeader, Hash256, Transaction};
use crate::error::{NodeError, Result};
use std::time::Instant;

/// Difficulty target: a digest is valid when it is strictly below 2^(256 - bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub bits: u32,
    value: Hash256,
}

impl Target {
    pub fn from_bits(bits: u32) -> Self {
        let mut target = [0u8; 32];

        match bits {
            // 2^256 does not fit; the largest value accepts every digest but one
            0 => target = [0xff; 32],
            1..=255 => {
                let exponent = (256 - bits) as usize;
                target[31 - exponent / 8] = 1 << (exponent % 8);
            }
            _ => {}
        }

        Self {
            bits,
            value: Hash256::new(target),
        }
    }

    /// Full 256-bit target, big-endian
    pub fn to_hash256(&self) -> Hash256 {
        self.value
    }

    /// Check if a hash meets this target (hash < target, big-endian)
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        hash.as_bytes() < self.value.as_bytes()
    }
}

/// Proof of Work miner
#[derive(Debug, Clone, Copy)]
pub struct Miner {
    /// Fixed difficulty target
    pub target: Target,
    /// Search gives up after this nonce
    pub max_nonce: u64,
}

impl Miner {
    pub fn new(bits: u32, max_nonce: u64) -> Self {
        Self {
            target: Target::from_bits(bits),
            max_nonce,
        }
    }

    pub fn from_params(params: &ChainParams) -> Self {
        Self::new(params.target_bits, params.max_nonce)
    }

    /// Search nonces from 0 for one whose header digest meets the target
    pub fn mine(&self, header: &mut BlockHeader) -> MiningResult {
        let start_time = Instant::now();
        let mut attempts = 0u64;
        header.bits = self.target.bits;

        for nonce in 0..=self.max_nonce {
            header.nonce = nonce;
            let hash = header.hash();
            attempts += 1;

            if self.target.is_valid_hash(&hash) {
                return MiningResult {
                    success: true,
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                };
            }

            if attempts % 1_000_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!("Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        MiningResult {
            success: false,
            nonce: 0,
            hash: Hash256::zero(),
            attempts,
            duration: start_time.elapsed(),
        }
    }

    /// Assemble a block on top of `prev_block_hash` and run the nonce search
    pub fn mine_block(&self, prev_block_hash: Hash256, transactions: Vec<Transaction>) -> Result<Block> {
        let mut block = Block::new(prev_block_hash, transactions, self.target.bits);
        let result = self.mine(&mut block.header);

        if !result.success {
            return Err(NodeError::MiningExhausted(self.max_nonce));
        }

        log::info!(
            "Mined block {} in {} attempts ({:.1} H/s)",
            result.hash,
            result.attempts,
            result.hash_rate()
        );
        Ok(block)
    }

    /// Recompute the digest with the stored nonce; no search
    pub fn verify(&self, header: &BlockHeader) -> bool {
        header.bits == self.target.bits && self.target.is_valid_hash(&header.hash())
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    pub success: bool,
    pub nonce: u64,
    pub hash: Hash256,
    pub attempts: u64,
    pub duration: std::time::Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_from_bits() {
        let target = Target::from_bits(24);
        let bytes = target.to_hash256();

        assert_eq!(bytes.as_bytes()[..2], [0, 0]);
        assert_eq!(bytes.as_bytes()[2], 1);
        assert!(bytes.as_bytes()[3..].iter().all(|b| *b == 0));

        assert_eq!(Target::from_bits(1).to_hash256().as_bytes()[0], 0x80);
    }

    #[test]
    fn test_target_validation() {
        let target = Target::from_bits(24);

        assert!(target.is_valid_hash(&Hash256::zero()));
        assert!(!target.is_valid_hash(&target.to_hash256()));
        assert!(!target.is_valid_hash(&Hash256::new([0xff; 32])));

        let mut just_below = [0u8; 32];
        just_below[3..].fill(0xff);
        assert!(target.is_valid_hash(&Hash256::new(just_below)));
    }

    #[test]
    fn test_pow_mining_easy() {
        let miner = Miner::new(8, u64::MAX);
        let mut header = BlockHeader::new(Hash256::zero(), Hash256::zero(), 1234567890, 0, 0);

        let result = miner.mine(&mut header);
        assert!(result.success);
        assert_eq!(header.nonce, result.nonce);
        assert_eq!(header.hash(), result.hash);
        assert!(miner.verify(&header));

        // Same header and nonce always yield the same verdict
        assert!(miner.verify(&header.clone()));
    }

    #[test]
    fn test_verify_rejects_wrong_bits() {
        let miner = Miner::new(8, u64::MAX);
        let mut header = BlockHeader::new(Hash256::zero(), Hash256::zero(), 1234567890, 0, 0);
        miner.mine(&mut header);

        header.bits = 4;
        assert!(!miner.verify(&header));
        assert!(!Miner::new(4, u64::MAX).verify(&BlockHeader { bits: 8, ..header }));
    }

    #[test]
    fn test_nonce_exhaustion() {
        let miner = Miner::new(250, 10);
        let tx = Transaction::coinbase([1u8; 20], "", 10);

        let err = miner.mine_block(Hash256::zero(), vec![tx]).unwrap_err();
        assert!(matches!(err, NodeError::MiningExhausted(10)));
    }
}
