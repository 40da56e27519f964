// Storage layer for blockchain and UTXO set

mod blockchain_db;
mod utxo_set;

pub use blockchain_db::{BlockchainDB, BlockchainIterator};
pub use utxo_set::{OutPoint, UnspentOutputs, UtxoSet};

use crate::config::ChainParams;
use crate::core::{Block, Hash256, PubKeyHash, Transaction};
use crate::error::{NodeError, Result};
use sled::transaction::TransactionError;
use sled::Transactional;
use std::path::Path;

/// Note carried by the genesis coinbase
pub const GENESIS_COINBASE_NOTE: &str = "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Storage manager - one sled database holding the ledger and its UTXO index
pub struct Storage {
    pub blockchain: BlockchainDB,
    pub utxo_set: UtxoSet,
    db: sled::Db,
}

impl Storage {
    /// Open (or create) the database at `path`
    pub fn new<P: AsRef<Path>>(path: P, params: ChainParams) -> Result<Self> {
        Self::from_db(sled::open(path)?, params)
    }

    /// Create an in-memory storage (for testing)
    pub fn memory(params: ChainParams) -> Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?, params)
    }

    fn from_db(db: sled::Db, params: ChainParams) -> Result<Self> {
        Ok(Self {
            blockchain: BlockchainDB::new(db.open_tree("blocks")?, &params),
            utxo_set: UtxoSet::new(db.open_tree("chainstate")?),
            db,
        })
    }

    /// Mine the genesis block paying the subsidy to `address`
    pub fn create_blockchain(&self, address: PubKeyHash) -> Result<Block> {
        if self.blockchain.tip()?.is_some() {
            return Err(NodeError::ChainExists);
        }

        let subsidy = self.blockchain.subsidy();
        let coinbase = Transaction::coinbase(address, GENESIS_COINBASE_NOTE, subsidy);
        let genesis = self.blockchain.miner().mine_block(Hash256::zero(), vec![coinbase])?;

        self.add_block(&genesis)?;
        log::info!("Created blockchain with genesis {}", genesis.hash());
        Ok(genesis)
    }

    /// Validate a block, then append it and update the UTXO index in one
    /// transaction. Returns false when the block is already stored.
    pub fn add_block(&self, block: &Block) -> Result<bool> {
        let Some(height) = self.blockchain.validate_block(block)? else {
            return Ok(false);
        };
        self.utxo_set.check_spends(block)?;

        (self.blockchain.tree(), self.utxo_set.tree())
            .transaction(|(blocks, chainstate)| {
                blockchain_db::write_block(blocks, block, height)?;
                utxo_set::update(chainstate, block)
            })
            .map_err(abort_into_node_error)?;

        log::info!("Added block {} at height {}", block.hash(), height);
        Ok(true)
    }

    /// Mine `transactions` on top of the tip and append the result
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let tip = self.blockchain.tip()?.ok_or(NodeError::EmptyChain)?;
        let block = self.blockchain.miner().mine_block(tip, transactions)?;
        self.add_block(&block)?;
        Ok(block)
    }

    /// Rebuild the UTXO index from the ledger
    pub fn reindex(&self) -> Result<usize> {
        self.utxo_set.reindex(&self.blockchain)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

pub(crate) fn abort_into_node_error(e: TransactionError<NodeError>) -> NodeError {
    match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => NodeError::Storage(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ValidationError;

    fn params() -> ChainParams {
        ChainParams {
            target_bits: 8,
            subsidy: 10,
            max_nonce: u64::MAX,
        }
    }

    #[test]
    fn test_create_blockchain_once() {
        let storage = Storage::memory(params()).unwrap();
        let genesis = storage.create_blockchain([1u8; 20]).unwrap();

        assert!(genesis.is_genesis());
        assert_eq!(storage.blockchain.best_height().unwrap(), Some(0));
        assert_eq!(
            genesis.transactions[0].inputs[0].pub_key,
            GENESIS_COINBASE_NOTE.as_bytes().to_vec()
        );
        assert!(matches!(
            storage.create_blockchain([1u8; 20]),
            Err(NodeError::ChainExists)
        ));
    }

    #[test]
    fn test_mine_on_empty_chain() {
        let storage = Storage::memory(params()).unwrap();
        let err = storage
            .mine_block(vec![Transaction::coinbase([1u8; 20], "", 10)])
            .unwrap_err();
        assert!(matches!(err, NodeError::EmptyChain));
    }

    #[test]
    fn test_rejected_block_leaves_store_untouched() {
        let storage = Storage::memory(params()).unwrap();
        storage.create_blockchain([1u8; 20]).unwrap();
        let before = storage.utxo_set.snapshot().unwrap();

        let greedy = Transaction::coinbase([2u8; 20], "", 11);
        let err = storage.mine_block(vec![greedy]).unwrap_err();

        assert!(matches!(err, NodeError::InvalidBlock(ValidationError::ExcessiveReward { .. })));
        assert_eq!(storage.blockchain.best_height().unwrap(), Some(0));
        assert_eq!(storage.utxo_set.snapshot().unwrap(), before);
    }

    #[test]
    fn test_reopen_persists_chain() {
        let dir = std::env::temp_dir().join(format!("hashchain-test-{}", rand::random::<u64>()));

        let tip = {
            let storage = Storage::new(&dir, params()).unwrap();
            storage.create_blockchain([1u8; 20]).unwrap();
            let block = storage
                .mine_block(vec![Transaction::coinbase([1u8; 20], "", 10)])
                .unwrap();
            storage.flush().unwrap();
            block.hash()
        };

        let storage = Storage::new(&dir, params()).unwrap();
        assert_eq!(storage.blockchain.tip().unwrap(), Some(tip));
        assert_eq!(storage.utxo_set.balance(&[1u8; 20]).unwrap(), 20);

        drop(storage);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
