// Transaction builder

use crate::core::{Transaction, TxInput, TxOutput};
use crate::error::{NodeError, Result};
use crate::storage::Storage;
use crate::wallet::{Address, KeyPair};

/// Builds signed payments from the UTXO index
pub struct TransactionBuilder<'a> {
    storage: &'a Storage,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Build a transaction paying `amount` from `from` to `to`.
    /// Output 0 pays the recipient; output 1, if present, returns change.
    pub fn build(&self, from: &KeyPair, to: &Address, amount: u64) -> Result<Transaction> {
        if amount == 0 {
            return Err(NodeError::Wallet("Amount must be positive".to_string()));
        }
        let recipient = to.to_pubkey_hash()?;
        let sender = from.pubkey_hash();

        let (available, spendable) = self
            .storage
            .utxo_set
            .find_spendable_outputs(&sender, amount)?;

        if available < amount {
            return Err(NodeError::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        let pub_key = from.pubkey_bytes();
        let inputs: Vec<TxInput> = spendable
            .iter()
            .flat_map(|(txid, indices)| {
                indices
                    .iter()
                    .map(|vout| TxInput::new(*txid, *vout, pub_key.clone()))
            })
            .collect();

        let mut outputs = vec![TxOutput::new(amount, recipient)];
        if available > amount {
            outputs.push(TxOutput::new(available - amount, sender));
        }

        let mut tx = Transaction::new(inputs, outputs);
        self.storage
            .blockchain
            .sign_transaction(&mut tx, &from.signing_key)?;

        log::debug!("Built transaction {} paying {} to {}", tx.id, amount, to);
        Ok(tx)
    }

    /// Sum of the unspent outputs locked to `address`
    pub fn balance(&self, address: &Address) -> Result<u64> {
        self.storage.utxo_set.balance(&address.to_pubkey_hash()?)
    }
}
