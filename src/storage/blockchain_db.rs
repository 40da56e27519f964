// Block ledger on a sled tree

use crate::config::ChainParams;
use crate::consensus::{BlockValidator, Miner, ValidationError};
use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::{NodeError, Result};
use crate::storage::utxo_set::UnspentOutputs;
use p256::ecdsa::SigningKey;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Tree;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Key holding the hash of the latest block
const TIP_KEY: &[u8] = b"l";
/// Key holding the height of the latest block
const HEIGHT_KEY: &[u8] = b"height";

/// Blockchain database: `hash -> block`, plus the tip pointer, a height index
/// and a transaction index (`"t" ‖ txid -> block hash`)
pub struct BlockchainDB {
    tree: Tree,
    validator: BlockValidator,
    miner: Miner,
    subsidy: u64,
}

impl BlockchainDB {
    pub fn new(tree: Tree, params: &ChainParams) -> Self {
        Self {
            tree,
            validator: BlockValidator::new(params),
            miner: Miner::from_params(params),
            subsidy: params.subsidy,
        }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    /// Coinbase reward for new blocks
    pub fn subsidy(&self) -> u64 {
        self.subsidy
    }

    /// Validate then append a block without touching the UTXO index.
    /// Returns false if it is already stored.
    #[cfg(test)]
    pub(crate) fn add_block(&self, block: &Block) -> Result<bool> {
        let Some(height) = self.validate_block(block)? else {
            return Ok(false);
        };

        self.tree
            .transaction(|tree| write_block(tree, block, height))
            .map_err(super::abort_into_node_error)?;

        Ok(true)
    }

    /// Full validation against the current tip. Returns the height the block
    /// would take, or None when the block is already stored.
    pub fn validate_block(&self, block: &Block) -> Result<Option<u64>> {
        let hash = block.hash();
        if self.has_block(&hash)? {
            return Ok(None);
        }

        self.validator.validate_block(block)?;

        let height = match self.tip()? {
            Some(tip) if block.header.prev_block_hash == tip => {
                self.best_height()?.map_or(0, |h| h + 1)
            }
            None if block.is_genesis() => 0,
            _ => return Err(ValidationError::NotExtendingTip.into()),
        };

        for tx in &block.transactions {
            if self.tree.contains_key(tx_key(&tx.id))? {
                return Err(ValidationError::DuplicateTransaction(tx.id).into());
            }
        }

        for tx in block.transactions.iter().skip(1) {
            if !self.verify_transaction(tx)? {
                return Err(ValidationError::InvalidSignature.into());
            }
        }

        Ok(Some(height))
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>> {
        load_block(&self.tree, hash)
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.tree.contains_key(hash.as_bytes())?)
    }

    /// Hash of the latest block, None for an empty ledger
    pub fn tip(&self) -> Result<Option<Hash256>> {
        match self.tree.get(TIP_KEY)? {
            Some(data) => Ok(Some(Hash256::from_slice(&data).map_err(NodeError::Serialization)?)),
            None => Ok(None),
        }
    }

    /// Height of the tip (genesis is 0), None for an empty ledger
    pub fn best_height(&self) -> Result<Option<u64>> {
        match self.tree.get(HEIGHT_KEY)? {
            Some(data) => Ok(Some(decode_u64(&data)?)),
            None => Ok(None),
        }
    }

    /// Get block hash by height
    pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash256>> {
        match self.tree.get(height_key(height))? {
            Some(data) => Ok(Some(Hash256::from_slice(&data).map_err(NodeError::Serialization)?)),
            None => Ok(None),
        }
    }

    /// Get block by height
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        match self.get_hash_by_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Walk from the tip back to genesis
    pub fn iter(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator {
            tree: self.tree.clone(),
            current: self.tip()?,
        })
    }

    /// Every block hash, newest first
    pub fn block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter()?.map(|block| block.map(|b| b.hash())).collect()
    }

    /// Find a transaction anywhere in the ledger
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        let lookup_failure = || NodeError::ChainLookupFailure(*id);

        let data = self.tree.get(tx_key(id))?.ok_or_else(lookup_failure)?;
        let hash = Hash256::from_slice(&data).map_err(NodeError::Serialization)?;
        let block = self.get_block(&hash)?.ok_or(NodeError::MissingBlock(hash))?;

        block
            .transactions
            .into_iter()
            .find(|tx| tx.id == *id)
            .ok_or_else(lookup_failure)
    }

    fn referenced_transactions(&self, tx: &Transaction) -> Result<HashMap<Hash256, Transaction>> {
        let mut prev_txs = HashMap::new();
        for input in &tx.inputs {
            if !prev_txs.contains_key(&input.txid) {
                prev_txs.insert(input.txid, self.find_transaction(&input.txid)?);
            }
        }
        Ok(prev_txs)
    }

    /// Sign every input of `tx` against the outputs it spends
    pub fn sign_transaction(&self, tx: &mut Transaction, key: &SigningKey) -> Result<()> {
        let prev_txs = self.referenced_transactions(tx)?;
        tx.sign(key, &prev_txs)
    }

    /// Verify `tx` against the ledger; unknown references are a lookup failure
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        let prev_txs = self.referenced_transactions(tx)?;
        Ok(tx.verify(&prev_txs))
    }

    /// Unspent outputs of the whole ledger, keyed by transaction ID.
    /// Collects every spent outpoint first so that spends inside the same
    /// block are honoured regardless of order.
    pub fn find_utxo(&self) -> Result<BTreeMap<Hash256, UnspentOutputs>> {
        let mut spent: HashSet<(Hash256, u32)> = HashSet::new();
        let mut transactions = Vec::new();

        for block in self.iter()? {
            for tx in block?.transactions {
                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent.insert((input.txid, input.vout));
                    }
                }
                transactions.push(tx);
            }
        }

        let mut utxo = BTreeMap::new();
        for tx in transactions {
            let mut unspent = UnspentOutputs::default();
            for (index, output) in tx.outputs.into_iter().enumerate() {
                let index = index as u32;
                if !spent.contains(&(tx.id, index)) {
                    unspent.outputs.insert(index, output);
                }
            }
            if !unspent.outputs.is_empty() {
                utxo.insert(tx.id, unspent);
            }
        }

        Ok(utxo)
    }
}

/// Write a block, its height and transaction index entries and the new tip
/// in one transaction
pub(crate) fn write_block(
    tree: &TransactionalTree,
    block: &Block,
    height: u64,
) -> ConflictableTransactionResult<(), NodeError> {
    let hash = block.hash();
    tree.insert(hash.as_bytes().as_slice(), block.serialize())?;
    for tx in &block.transactions {
        tree.insert(tx_key(&tx.id), hash.as_bytes().as_slice())?;
    }
    tree.insert(height_key(height), hash.as_bytes().as_slice())?;
    tree.insert(HEIGHT_KEY, height.to_be_bytes().as_slice())?;
    tree.insert(TIP_KEY, hash.as_bytes().as_slice())?;
    Ok(())
}

fn load_block(tree: &Tree, hash: &Hash256) -> Result<Option<Block>> {
    match tree.get(hash.as_bytes())? {
        Some(data) => Ok(Some(Block::deserialize(&data)?)),
        None => Ok(None),
    }
}

fn decode_u64(data: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = data
        .try_into()
        .map_err(|_| NodeError::Serialization(format!("Invalid height data length: {}", data.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

// Helper: create key for height index
fn height_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'h'); // 'h' for height
    key.extend_from_slice(&height.to_be_bytes());
    key
}

fn tx_key(id: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(b't');
    key.extend_from_slice(id.as_bytes());
    key
}

/// Newest-to-oldest walk over `prev_block_hash` links; ends after genesis
pub struct BlockchainIterator {
    tree: Tree,
    current: Option<Hash256>,
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;

        match load_block(&self.tree, &hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.current = Some(block.header.prev_block_hash);
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(NodeError::MissingBlock(hash))),
            Err(e) => Some(Err(e)),
        }
    }
}
