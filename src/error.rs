// Error taxonomy shared by every layer of the node

use crate::consensus::ValidationError;
use crate::core::Hash256;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Insufficient funds: have {available}, need {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A transaction references an id that is not in the ledger
    #[error("Transaction {0} not found in the chain")]
    ChainLookupFailure(Hash256),

    #[error("Block rejected: {0}")]
    InvalidBlock(#[from] ValidationError),

    #[error("Peer {addr} is not reachable: {reason}")]
    PeerUnreachable { addr: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No valid nonce below {0}")]
    MiningExhausted(u64),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Ledger is empty, create a blockchain first")]
    EmptyChain,

    #[error("Blockchain already exists")]
    ChainExists,

    /// A stored block links to a block that is not in the store
    #[error("Block {0} is missing from the store")]
    MissingBlock(Hash256),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NodeError {
    pub(crate) fn serialization(e: impl std::fmt::Display) -> Self {
        NodeError::Serialization(e.to_string())
    }
}
