// Transaction data structures

use crate::core::crypto;
use crate::core::serialize::{
    ensure_consumed, read_array, read_hash, read_u32_le, read_u64_le, read_var_bytes,
    read_varint, write_var_bytes, write_varint,
};
use crate::core::{hash160, sha256, Hash256, PubKeyHash, Serializable};
use crate::error::{NodeError, Result};
use p256::ecdsa::SigningKey;
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

/// Output index carried by a coinbase input, which spends nothing
pub const COINBASE_VOUT: u32 = u32::MAX;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// ID of the transaction holding the spent output
    pub txid: Hash256,
    /// Index of the output in that transaction
    pub vout: u32,
    /// Fixed-width r || s signature
    pub signature: Vec<u8>,
    /// Spender's uncompressed public key (the free-form note for a coinbase)
    pub pub_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `txid:vout`
    pub fn new(txid: Hash256, vout: u32, pub_key: Vec<u8>) -> Self {
        Self {
            txid,
            vout,
            signature: Vec::new(),
            pub_key,
        }
    }

    /// Create a coinbase input (for mining rewards)
    pub fn coinbase(note: Vec<u8>) -> Self {
        Self {
            txid: Hash256::zero(),
            vout: COINBASE_VOUT,
            signature: Vec::new(),
            pub_key: note,
        }
    }

    /// Check if this is a coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.txid.is_zero() && self.vout == COINBASE_VOUT
    }

    /// Whether this input was made with the key behind `pub_key_hash`
    pub fn uses_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        hash160(&self.pub_key) == *pub_key_hash
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.write_all(self.txid.as_bytes()).unwrap();
        buf.write_all(&self.vout.to_le_bytes()).unwrap();
        write_var_bytes(buf, &self.signature).unwrap();
        write_var_bytes(buf, &self.pub_key).unwrap();
    }

    fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            txid: read_hash(reader)?,
            vout: read_u32_le(reader)?,
            signature: read_var_bytes(reader).map_err(NodeError::serialization)?,
            pub_key: read_var_bytes(reader).map_err(NodeError::serialization)?,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    /// Amount in the smallest currency unit
    pub value: u64,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    pub fn new(value: u64, pub_key_hash: PubKeyHash) -> Self {
        Self {
            value,
            pub_key_hash,
        }
    }

    /// Whether the owner of `pub_key_hash` can spend this output
    pub fn is_locked_with_key(&self, pub_key_hash: &PubKeyHash) -> bool {
        self.pub_key_hash == *pub_key_hash
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.write_all(&self.value.to_le_bytes()).unwrap();
        buf.write_all(&self.pub_key_hash).unwrap();
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        Ok(Self {
            value: read_u64_le(reader)?,
            pub_key_hash: read_array(reader)?,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Hash of the trimmed transaction, unaffected by signing
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and compute its ID
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying `subsidy` to `to`.
    /// An empty note is replaced with random data so reward IDs never collide.
    pub fn coinbase(to: PubKeyHash, note: &str, subsidy: u64) -> Self {
        let note = if note.is_empty() {
            hex::encode(rand::random::<[u8; 20]>())
        } else {
            note.to_string()
        };

        Self::new(
            vec![TxInput::coinbase(note.into_bytes())],
            vec![TxOutput::new(subsidy, to)],
        )
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// SHA256 of the trimmed copy
    pub fn hash(&self) -> Hash256 {
        self.trimmed_copy().digest()
    }

    /// Copy with the ID zeroed and every spending input's signature and key cleared
    pub fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| {
                if input.is_coinbase() {
                    TxInput::coinbase(input.pub_key.clone())
                } else {
                    TxInput::new(input.txid, input.vout, Vec::new())
                }
            })
            .collect();

        Transaction {
            id: Hash256::zero(),
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    fn digest(&self) -> Hash256 {
        sha256(&self.serialize())
    }

    /// Payload signed for input `index`: the trimmed copy with that input's
    /// key slot holding the referenced output's lock
    fn signature_hash(trimmed: &mut Transaction, index: usize, lock: &PubKeyHash) -> Hash256 {
        trimmed.inputs[index].pub_key = lock.to_vec();
        let payload = trimmed.digest();
        trimmed.inputs[index].pub_key.clear();
        payload
    }

    /// Sign every input with `key`. `prev_txs` must hold each referenced transaction.
    pub fn sign(&mut self, key: &SigningKey, prev_txs: &HashMap<Hash256, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let input = &self.inputs[index];
            let prev_tx = prev_txs
                .get(&input.txid)
                .ok_or(NodeError::ChainLookupFailure(input.txid))?;
            let prev_out = prev_tx
                .outputs
                .get(input.vout as usize)
                .ok_or(NodeError::ChainLookupFailure(input.txid))?;

            let payload = Self::signature_hash(&mut trimmed, index, &prev_out.pub_key_hash);
            self.inputs[index].signature = crypto::sign(key, payload.as_bytes());
        }

        Ok(())
    }

    /// Check every input's signature and ownership; fails closed on missing references
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let Some(prev_tx) = prev_txs.get(&input.txid) else {
                return false;
            };
            let Some(prev_out) = prev_tx.outputs.get(input.vout as usize) else {
                return false;
            };
            if !input.uses_key(&prev_out.pub_key_hash) {
                return false;
            }

            let payload = Self::signature_hash(&mut trimmed, index, &prev_out.pub_key_hash);
            if !crypto::verify(&input.pub_key, payload.as_bytes(), &input.signature) {
                return false;
            }
        }

        true
    }

    /// Total output value, None if it does not fit in a u64
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |total, out| total.checked_add(out.value))
    }

    /// Deserialize from a reader
    pub fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let id = read_hash(reader)?;

        let input_count = read_varint(reader).map_err(NodeError::serialization)?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(reader)?);
        }

        let output_count = read_varint(reader).map_err(NodeError::serialization)?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(reader)?);
        }

        Ok(Self { id, inputs, outputs })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.write_all(self.id.as_bytes()).unwrap();

        write_varint(buf, self.inputs.len() as u64).unwrap();
        for input in &self.inputs {
            input.write_to(buf);
        }

        write_varint(buf, self.outputs.len() as u64).unwrap();
        for output in &self.outputs {
            output.write_to(buf);
        }
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        ensure_consumed(&cursor)?;
        Ok(tx)
    }
}
