// UTXO (Unspent Transaction Output) index

use crate::core::{
    ensure_consumed, read_u32_le, read_varint, write_varint, Block, Hash256, PubKeyHash, Transaction,
    TxOutput,
};
use crate::consensus::ValidationError;
use crate::error::{NodeError, Result};
use crate::storage::BlockchainDB;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::{Batch, Tree};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// Unspent outputs of one transaction, keyed by their index in that transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnspentOutputs {
    pub outputs: BTreeMap<u32, TxOutput>,
}

impl UnspentOutputs {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_varint(&mut bytes, self.outputs.len() as u64).unwrap();
        for (index, output) in &self.outputs {
            bytes.extend_from_slice(&index.to_le_bytes());
            output.write_to(&mut bytes);
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let count = read_varint(&mut cursor).map_err(NodeError::serialization)?;

        let mut outputs = BTreeMap::new();
        for _ in 0..count {
            let index = read_u32_le(&mut cursor)?;
            outputs.insert(index, TxOutput::read_from(&mut cursor)?);
        }

        ensure_consumed(&cursor)?;
        Ok(Self { outputs })
    }
}

/// UTXO index: `txid -> UnspentOutputs`, a cache rebuildable from the ledger
pub struct UtxoSet {
    tree: Tree,
}

impl UtxoSet {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Rebuild the index from a full ledger scan, replacing it atomically.
    /// Returns the number of transactions with unspent outputs.
    pub fn reindex(&self, chain: &BlockchainDB) -> Result<usize> {
        let utxo = chain.find_utxo()?;

        let mut batch = Batch::default();
        for key in self.tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid, unspent) in &utxo {
            batch.insert(txid.as_bytes().as_slice(), unspent.to_bytes());
        }

        self.tree.apply_batch(batch)?;
        log::info!("Reindexed UTXO set: {} transactions with unspent outputs", utxo.len());
        Ok(utxo.len())
    }

    /// Collect outputs locked to `pub_key_hash` until `amount` is covered.
    /// The total may fall short; callers decide whether that is an error.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &PubKeyHash,
        amount: u64,
    ) -> Result<(u64, BTreeMap<Hash256, Vec<u32>>)> {
        let mut accumulated = 0u64;
        let mut spendable: BTreeMap<Hash256, Vec<u32>> = BTreeMap::new();

        'scan: for entry in self.iter() {
            let (txid, unspent) = entry?;
            for (index, output) in unspent.outputs {
                if accumulated >= amount {
                    break 'scan;
                }
                if output.is_locked_with_key(pub_key_hash) {
                    accumulated = checked_sum(accumulated, output.value)?;
                    spendable.entry(txid).or_default().push(index);
                }
            }
        }

        Ok((accumulated, spendable))
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &PubKeyHash) -> Result<Vec<TxOutput>> {
        let mut found = Vec::new();
        for entry in self.iter() {
            let (_, unspent) = entry?;
            found.extend(
                unspent
                    .outputs
                    .into_values()
                    .filter(|output| output.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(found)
    }

    pub fn balance(&self, pub_key_hash: &PubKeyHash) -> Result<u64> {
        self.find_utxo(pub_key_hash)?
            .iter()
            .try_fold(0u64, |total, out| checked_sum(total, out.value))
    }

    /// Check whether an outpoint is currently unspent
    pub fn is_unspent(&self, outpoint: &OutPoint) -> Result<bool> {
        Ok(self
            .get(&outpoint.txid)?
            .is_some_and(|unspent| unspent.outputs.contains_key(&outpoint.vout)))
    }

    pub fn get(&self, txid: &Hash256) -> Result<Option<UnspentOutputs>> {
        match self.tree.get(txid.as_bytes())? {
            Some(data) => Ok(Some(UnspentOutputs::from_bytes(&data)?)),
            None => Ok(None),
        }
    }

    /// Every non-coinbase transaction of `block` must pass `check_transaction`,
    /// and no outpoint may be spent twice within the block
    pub fn check_spends(&self, block: &Block) -> Result<()> {
        let mut seen = HashSet::new();

        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            self.check_transaction(tx, &mut seen)?;
        }

        Ok(())
    }

    /// Each input must spend an unspent output not already in `seen`, and
    /// the outputs must carry exactly the value spent (no fees, no burning)
    pub fn check_transaction(&self, tx: &Transaction, seen: &mut HashSet<OutPoint>) -> Result<()> {
        let mut inputs = 0u64;

        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.txid, input.vout);
            let spent = if seen.insert(outpoint) {
                self.get(&input.txid)?
                    .and_then(|mut unspent| unspent.outputs.remove(&input.vout))
            } else {
                None
            };

            let Some(spent) = spent else {
                return Err(ValidationError::DoubleSpend {
                    txid: input.txid,
                    vout: input.vout,
                }
                .into());
            };
            inputs = checked_sum(inputs, spent.value)?;
        }

        let outputs = tx.total_output_value().ok_or(ValidationError::ValueOverflow)?;
        if inputs != outputs {
            return Err(ValidationError::UnbalancedTransaction {
                txid: tx.id,
                inputs,
                outputs,
            }
            .into());
        }

        Ok(())
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.tree.len()
    }

    /// Sum of every unspent output
    pub fn total_value(&self) -> Result<u64> {
        let mut total = 0u64;
        for entry in self.iter() {
            let (_, unspent) = entry?;
            for output in unspent.outputs.values() {
                total = checked_sum(total, output.value)?;
            }
        }
        Ok(total)
    }

    /// Whole index in key order
    pub fn snapshot(&self) -> Result<BTreeMap<Hash256, UnspentOutputs>> {
        self.iter().collect()
    }

    fn iter(&self) -> impl Iterator<Item = Result<(Hash256, UnspentOutputs)>> + '_ {
        self.tree.iter().map(|entry| -> Result<(Hash256, UnspentOutputs)> {
            let (key, value) = entry?;
            let txid = Hash256::from_slice(&key).map_err(NodeError::Serialization)?;
            Ok((txid, UnspentOutputs::from_bytes(&value)?))
        })
    }
}

fn checked_sum(total: u64, value: u64) -> Result<u64> {
    total
        .checked_add(value)
        .ok_or_else(|| ValidationError::ValueOverflow.into())
}

/// Incremental index update for one appended block, run inside the append
/// transaction: drop the outputs it spends, then add the ones it creates
pub(crate) fn update(
    tree: &TransactionalTree,
    block: &Block,
) -> ConflictableTransactionResult<(), NodeError> {
    for tx in &block.transactions {
        if !tx.is_coinbase() {
            for input in &tx.inputs {
                let Some(data) = tree.get(input.txid.as_bytes())? else {
                    continue;
                };
                let mut unspent =
                    UnspentOutputs::from_bytes(&data).map_err(ConflictableTransactionError::Abort)?;
                unspent.outputs.remove(&input.vout);

                if unspent.outputs.is_empty() {
                    tree.remove(input.txid.as_bytes().as_slice())?;
                } else {
                    tree.insert(input.txid.as_bytes().as_slice(), unspent.to_bytes())?;
                }
            }
        }

        let unspent = UnspentOutputs {
            outputs: tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| (index as u32, output.clone()))
                .collect(),
        };
        tree.insert(tx.id.as_bytes().as_slice(), unspent.to_bytes())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::core::crypto::{generate_signing_key, public_key_bytes};
    use crate::core::{hash160, TxInput};
    use crate::storage::Storage;
    use p256::ecdsa::SigningKey;

    fn storage() -> Storage {
        Storage::memory(ChainParams {
            target_bits: 8,
            subsidy: 10,
            max_nonce: u64::MAX,
        })
        .unwrap()
    }

    fn owner(key: &SigningKey) -> PubKeyHash {
        hash160(&public_key_bytes(key))
    }

    /// Spend `amount` of `funding` output `vout` to `to`, returning change to the signer
    fn spend(storage: &Storage, key: &SigningKey, funding: &Transaction, vout: u32, to: PubKeyHash, amount: u64) -> Transaction {
        let available = funding.outputs[vout as usize].value;
        let mut outputs = vec![TxOutput::new(amount, to)];
        if available > amount {
            outputs.push(TxOutput::new(available - amount, owner(key)));
        }

        let mut tx = Transaction::new(vec![TxInput::new(funding.id, vout, public_key_bytes(key))], outputs);
        storage.blockchain.sign_transaction(&mut tx, key).unwrap();
        tx
    }

    #[test]
    fn test_unspent_outputs_keep_original_indices() {
        let mut unspent = UnspentOutputs::default();
        unspent.outputs.insert(1, TxOutput::new(6, [2u8; 20]));
        unspent.outputs.insert(4, TxOutput::new(3, [3u8; 20]));

        let decoded = UnspentOutputs::from_bytes(&unspent.to_bytes()).unwrap();
        assert_eq!(decoded, unspent);
        assert!(decoded.outputs.contains_key(&4));
    }

    #[test]
    fn test_genesis_balance_and_conservation() {
        let storage = storage();
        let miner_key = generate_signing_key();
        storage.create_blockchain(owner(&miner_key)).unwrap();

        assert_eq!(storage.utxo_set.balance(&owner(&miner_key)).unwrap(), 10);
        assert_eq!(storage.utxo_set.total_value().unwrap(), 10);
        assert_eq!(storage.utxo_set.count_transactions(), 1);
    }

    #[test]
    fn test_spend_moves_value() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        let genesis = storage.create_blockchain(owner(&alice)).unwrap();
        let funding = genesis.transactions[0].clone();

        let tx = spend(&storage, &alice, &funding, 0, owner(&bob), 4);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), tx.clone()])
            .unwrap();

        assert_eq!(storage.utxo_set.balance(&owner(&alice)).unwrap(), 16);
        assert_eq!(storage.utxo_set.balance(&owner(&bob)).unwrap(), 4);
        assert_eq!(storage.utxo_set.total_value().unwrap(), 20);
        assert!(!storage.utxo_set.is_unspent(&OutPoint::new(funding.id, 0)).unwrap());
        assert!(storage.utxo_set.is_unspent(&OutPoint::new(tx.id, 1)).unwrap());
    }

    #[test]
    fn test_incremental_update_matches_reindex() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        let genesis = storage.create_blockchain(owner(&alice)).unwrap();

        // Bob spends output 0 of the first payment while output 1 (change) survives
        let pay = spend(&storage, &alice, &genesis.transactions[0], 0, owner(&bob), 7);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&bob), "", 10), pay.clone()])
            .unwrap();
        let onward = spend(&storage, &bob, &pay, 0, owner(&alice), 7);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&bob), "", 10), onward])
            .unwrap();

        let incremental = storage.utxo_set.snapshot().unwrap();
        assert_eq!(incremental[&pay.id].outputs.keys().copied().collect::<Vec<_>>(), vec![1]);

        storage.reindex().unwrap();
        assert_eq!(storage.utxo_set.snapshot().unwrap(), incremental);

        // Reindexing twice changes nothing
        storage.reindex().unwrap();
        assert_eq!(storage.utxo_set.snapshot().unwrap(), incremental);
        assert_eq!(storage.utxo_set.total_value().unwrap(), 30);
    }

    #[test]
    fn test_reindex_drops_fully_spent_transactions() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        storage.create_blockchain(owner(&bob)).unwrap();

        let coinbase = Transaction::coinbase(owner(&alice), "", 10);
        storage.mine_block(vec![coinbase.clone()]).unwrap();
        let tx = spend(&storage, &alice, &coinbase, 0, owner(&bob), 10);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&bob), "", 10), tx])
            .unwrap();

        storage.utxo_set.tree().clear().unwrap();
        assert_eq!(storage.reindex().unwrap(), 3);
        assert_eq!(storage.utxo_set.balance(&owner(&alice)).unwrap(), 0);
        assert_eq!(storage.utxo_set.balance(&owner(&bob)).unwrap(), 30);
        assert_eq!(storage.utxo_set.get(&coinbase.id).unwrap(), None);
    }

    #[test]
    fn test_update_replays_to_reindex() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        let genesis = storage.create_blockchain(owner(&alice)).unwrap();
        let pay = spend(&storage, &alice, &genesis.transactions[0], 0, owner(&bob), 3);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&bob), "", 10), pay.clone()])
            .unwrap();
        let onward = spend(&storage, &bob, &pay, 0, owner(&alice), 1);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), onward])
            .unwrap();

        // Replay the ledger oldest first into an empty index
        let db = sled::Config::new().temporary(true).open().unwrap();
        let replayed = UtxoSet::new(db.open_tree("chainstate").unwrap());
        let mut blocks: Vec<Block> = storage.blockchain.iter().unwrap().collect::<Result<_>>().unwrap();
        blocks.reverse();
        for block in &blocks {
            replayed.tree().transaction(|tree| update(tree, block)).unwrap();
        }

        storage.reindex().unwrap();
        assert_eq!(replayed.snapshot().unwrap(), storage.utxo_set.snapshot().unwrap());
        assert_eq!(replayed.total_value().unwrap(), 30);
    }

    #[test]
    fn test_repeated_coinbase_cannot_revive_spent_output() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        storage.create_blockchain(owner(&bob)).unwrap();

        let reward = Transaction::coinbase(owner(&alice), "fixed note", 10);
        storage.mine_block(vec![reward.clone()]).unwrap();
        let tx = spend(&storage, &alice, &reward, 0, owner(&bob), 10);
        storage
            .mine_block(vec![Transaction::coinbase(owner(&bob), "", 10), tx])
            .unwrap();

        let err = storage.mine_block(vec![reward.clone()]).unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidBlock(ValidationError::DuplicateTransaction(id)) if id == reward.id
        ));

        let incremental = storage.utxo_set.snapshot().unwrap();
        storage.reindex().unwrap();
        assert_eq!(storage.utxo_set.snapshot().unwrap(), incremental);
        assert_eq!(storage.utxo_set.balance(&owner(&alice)).unwrap(), 0);
    }

    #[test]
    fn test_unbalanced_transaction_rejected() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        let genesis = storage.create_blockchain(owner(&alice)).unwrap();
        let funding = &genesis.transactions[0];

        // Inflating: spends 10, creates 1_000_000
        let mut inflated = Transaction::new(
            vec![TxInput::new(funding.id, 0, public_key_bytes(&alice))],
            vec![TxOutput::new(1_000_000, owner(&bob))],
        );
        storage.blockchain.sign_transaction(&mut inflated, &alice).unwrap();
        let err = storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), inflated])
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidBlock(ValidationError::UnbalancedTransaction {
                inputs: 10,
                outputs: 1_000_000,
                ..
            })
        ));

        // Burning: spends 10, creates 4
        let burning = spend(&storage, &alice, funding, 0, owner(&bob), 4);
        let mut burning = Transaction::new(burning.inputs, vec![burning.outputs[0].clone()]);
        storage.blockchain.sign_transaction(&mut burning, &alice).unwrap();
        let err = storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), burning])
            .unwrap_err();
        assert!(matches!(
            err,
            NodeError::InvalidBlock(ValidationError::UnbalancedTransaction { inputs: 10, outputs: 4, .. })
        ));

        assert_eq!(storage.blockchain.best_height().unwrap(), Some(0));
        assert_eq!(storage.utxo_set.total_value().unwrap(), 10);
    }

    #[test]
    fn test_overflowing_sums_are_errors() {
        let storage = storage();
        let key = [5u8; 20];
        let mut unspent = UnspentOutputs::default();
        unspent.outputs.insert(0, TxOutput::new(11, key));
        unspent.outputs.insert(1, TxOutput::new(u64::MAX, key));
        storage
            .utxo_set
            .tree()
            .insert(Hash256::new([1; 32]).as_bytes().as_slice(), unspent.to_bytes())
            .unwrap();

        for err in [
            storage.utxo_set.balance(&key).unwrap_err(),
            storage.utxo_set.total_value().unwrap_err(),
            storage.utxo_set.find_spendable_outputs(&key, u64::MAX).unwrap_err(),
        ] {
            assert!(matches!(err, NodeError::InvalidBlock(ValidationError::ValueOverflow)));
        }
    }

    #[test]
    fn test_find_spendable_outputs() {
        let storage = storage();
        let alice = generate_signing_key();
        storage.create_blockchain(owner(&alice)).unwrap();
        storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10)])
            .unwrap();

        let (total, outputs) = storage.utxo_set.find_spendable_outputs(&owner(&alice), 5).unwrap();
        assert_eq!(total, 10);
        assert_eq!(outputs.values().map(Vec::len).sum::<usize>(), 1);

        let (total, outputs) = storage.utxo_set.find_spendable_outputs(&owner(&alice), 15).unwrap();
        assert_eq!(total, 20);
        assert_eq!(outputs.len(), 2);

        let (total, _) = storage.utxo_set.find_spendable_outputs(&owner(&alice), 100).unwrap();
        assert_eq!(total, 20);

        let (total, outputs) = storage.utxo_set.find_spendable_outputs(&[0u8; 20], 1).unwrap();
        assert_eq!(total, 0);
        assert!(outputs.is_empty());
    }

    #[test]
    fn test_double_spend_rejected() {
        let storage = storage();
        let alice = generate_signing_key();
        let bob = generate_signing_key();
        let genesis = storage.create_blockchain(owner(&alice)).unwrap();
        let funding = genesis.transactions[0].clone();

        let first = spend(&storage, &alice, &funding, 0, owner(&bob), 4);
        let second = spend(&storage, &alice, &funding, 0, owner(&bob), 5);

        let err = storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), first.clone(), second.clone()])
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidBlock(ValidationError::DoubleSpend { .. })));

        storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), first])
            .unwrap();
        let err = storage
            .mine_block(vec![Transaction::coinbase(owner(&alice), "", 10), second])
            .unwrap_err();
        assert!(matches!(err, NodeError::InvalidBlock(ValidationError::DoubleSpend { .. })));
        assert_eq!(storage.blockchain.best_height().unwrap(), Some(1));
    }
}
