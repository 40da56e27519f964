// Block data structures

use crate::core::serialize::{ensure_consumed, read_array, read_hash, read_varint, write_varint};
use crate::core::{sha256, Hash256, MerkleTree, Serializable, Transaction};
use crate::error::{NodeError, Result};
use std::io::{Cursor, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

/// Serialized header size: prev hash, merkle root, then three 8-byte integers
pub const HEADER_SIZE: usize = 32 + 32 + 8 + 8 + 8;

/// Block header - every field that feeds the proof-of-work digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Hash of the previous block, zero for genesis
    pub prev_block_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// Difficulty the block was mined at
    pub bits: u32,
    /// Nonce for proof-of-work
    pub nonce: u64,
}

impl BlockHeader {
    pub fn new(prev_block_hash: Hash256, merkle_root: Hash256, timestamp: u64, bits: u32, nonce: u64) -> Self {
        Self {
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// SHA256(prev || merkle root || timestamp || bits || nonce), integers big-endian
    pub fn hash(&self) -> Hash256 {
        sha256(&self.serialize())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.write_all(self.prev_block_hash.as_bytes()).unwrap();
        buf.write_all(self.merkle_root.as_bytes()).unwrap();
        buf.write_all(&self.timestamp.to_be_bytes()).unwrap();
        buf.write_all(&(self.bits as u64).to_be_bytes()).unwrap();
        buf.write_all(&self.nonce.to_be_bytes()).unwrap();
        buf
    }

    pub fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let prev_block_hash = read_hash(reader)?;
        let merkle_root = read_hash(reader)?;
        let timestamp = u64::from_be_bytes(read_array(reader)?);
        let bits = u64::from_be_bytes(read_array(reader)?);
        let nonce = u64::from_be_bytes(read_array(reader)?);

        let bits = u32::try_from(bits)
            .map_err(|_| NodeError::Serialization(format!("bits out of range: {}", bits)))?;

        Ok(Self::new(prev_block_hash, merkle_root, timestamp, bits, nonce))
    }
}

/// Block - header plus the ordered transactions it commits to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble an unmined block on top of `prev_block_hash`
    pub fn new(prev_block_hash: Hash256, transactions: Vec<Transaction>, bits: u32) -> Self {
        let merkle_root = Self::hash_transactions(&transactions);
        let header = BlockHeader::new(prev_block_hash, merkle_root, unix_now(), bits, 0);
        Self {
            header,
            transactions,
        }
    }

    /// Merkle root over the transaction IDs
    pub fn hash_transactions(transactions: &[Transaction]) -> Hash256 {
        let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
        MerkleTree::new(&txids).root_hash()
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash.is_zero()
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();

        write_varint(&mut buf, self.transactions.len() as u64).unwrap();
        for tx in &self.transactions {
            tx.write_to(&mut buf);
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let header = BlockHeader::from_reader(&mut cursor)?;

        let tx_count = read_varint(&mut cursor).map_err(NodeError::serialization)?;
        let mut transactions = Vec::new();
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        ensure_consumed(&cursor)?;
        Ok(Self {
            header,
            transactions,
        })
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_header_serialization() {
        let header = BlockHeader::new(Hash256::new([3; 32]), Hash256::new([4; 32]), 1234567890, 24, 77);

        let serialized = header.serialize();
        assert_eq!(serialized.len(), HEADER_SIZE);
        assert_eq!(&serialized[64..72], &1234567890u64.to_be_bytes());

        let deserialized = BlockHeader::from_reader(&mut Cursor::new(serialized)).unwrap();
        assert_eq!(header, deserialized);
    }

    #[test]
    fn test_block_hash_covers_nonce() {
        let mut header = BlockHeader::new(Hash256::zero(), Hash256::zero(), 1234567890, 24, 0);
        let hash = header.hash();
        assert_eq!(hash, header.hash());

        header.nonce = 1;
        assert_ne!(hash, header.hash());
    }

    #[test]
    fn test_block_serialization() {
        let coinbase = Transaction::coinbase([9u8; 20], "reward", 10);
        let second = Transaction::coinbase([8u8; 20], "", 10);
        let block = Block::new(Hash256::new([1; 32]), vec![coinbase, second], 16);

        let decoded = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
        assert!(!decoded.is_genesis());
    }

    #[test]
    fn test_genesis_detection_and_merkle() {
        let coinbase = Transaction::coinbase([9u8; 20], "genesis", 10);
        let block = Block::new(Hash256::zero(), vec![coinbase.clone()], 16);

        assert!(block.is_genesis());
        assert_eq!(block.header.merkle_root, sha256(coinbase.id.as_bytes()));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let block = Block::new(Hash256::zero(), vec![Transaction::coinbase([9u8; 20], "x", 10)], 16);
        let bytes = block.serialize();
        assert!(Block::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }
}
