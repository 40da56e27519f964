// Proof-of-work ledger node: hash-linked blocks, UTXO wallet and P2P gossip

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliHandler, Commands};
pub use config::{ChainParams, NodeConfig};
pub use consensus::{BlockValidator, Miner, Target, ValidationError};
pub use self::core::{Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput};
pub use error::{NodeError, Result};
pub use network::{Message, Node};
pub use storage::{BlockchainDB, Storage, UtxoSet};
pub use wallet::{Address, KeyPair, Keystore, TransactionBuilder};
