// Transaction and block validation

use crate::config::ChainParams;
use crate::consensus::pow::Miner;
use crate::core::{unix_now, Block, BlockHeader, Hash256, Transaction};

/// Blocks may run at most this far ahead of the local clock
const MAX_FUTURE_DRIFT_SECS: u64 = 2 * 60 * 60;

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Block hash doesn't meet PoW target
    InvalidProofOfWork,
    /// Block was mined at a difficulty this network does not use
    UnexpectedDifficulty { expected: u32, actual: u32 },
    /// Merkle root doesn't match calculated value
    InvalidMerkleRoot,
    /// Block has no transactions
    NoTransactions,
    /// First transaction is not coinbase
    MissingCoinbase,
    /// Coinbase transaction in non-first position
    CoinbaseNotFirst,
    /// Coinbase pays more than the subsidy
    ExcessiveReward { allowed: u64, claimed: u64 },
    /// Transaction has no inputs or outputs
    EmptyTransaction,
    /// Output carrying no value
    ZeroValueOutput,
    /// Stored ID does not match the transaction contents
    InvalidTransactionId,
    /// Transaction signature or ownership check failed
    InvalidSignature,
    /// Input spends an output that is already spent or never existed
    DoubleSpend { txid: Hash256, vout: u32 },
    /// Outputs do not carry exactly the value the inputs spend
    UnbalancedTransaction { txid: Hash256, inputs: u64, outputs: u64 },
    /// A value sum does not fit in a u64
    ValueOverflow,
    /// Transaction ID already present in the ledger
    DuplicateTransaction(Hash256),
    /// Block does not extend the current tip
    NotExtendingTip,
    /// Block timestamp is too far in the future
    InvalidTimestamp,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ValidationError::InvalidProofOfWork => write!(f, "Invalid proof of work"),
            ValidationError::UnexpectedDifficulty { expected, actual } => {
                write!(f, "Unexpected difficulty: expected {} bits, got {}", expected, actual)
            }
            ValidationError::InvalidMerkleRoot => write!(f, "Invalid merkle root"),
            ValidationError::NoTransactions => write!(f, "Block has no transactions"),
            ValidationError::MissingCoinbase => write!(f, "Missing coinbase transaction"),
            ValidationError::CoinbaseNotFirst => write!(f, "Coinbase not in first position"),
            ValidationError::ExcessiveReward { allowed, claimed } => {
                write!(f, "Coinbase claims {} but only {} is allowed", claimed, allowed)
            }
            ValidationError::EmptyTransaction => write!(f, "Empty transaction"),
            ValidationError::ZeroValueOutput => write!(f, "Output with zero value"),
            ValidationError::InvalidTransactionId => write!(f, "Transaction ID mismatch"),
            ValidationError::InvalidSignature => write!(f, "Invalid signature"),
            ValidationError::DoubleSpend { txid, vout } => {
                write!(f, "Output {}:{} is not spendable", txid, vout)
            }
            ValidationError::UnbalancedTransaction { txid, inputs, outputs } => {
                write!(f, "Transaction {} spends {} but creates {}", txid, inputs, outputs)
            }
            ValidationError::ValueOverflow => write!(f, "Value overflow"),
            ValidationError::DuplicateTransaction(txid) => {
                write!(f, "Transaction {} is already in the ledger", txid)
            }
            ValidationError::NotExtendingTip => write!(f, "Block does not extend the current tip"),
            ValidationError::InvalidTimestamp => write!(f, "Invalid timestamp"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Context-free block checks; signature checks need the ledger and live there
#[derive(Debug, Clone, Copy)]
pub struct BlockValidator {
    /// PoW miner for verification
    miner: Miner,
    subsidy: u64,
}

impl BlockValidator {
    pub fn new(params: &ChainParams) -> Self {
        Self {
            miner: Miner::from_params(params),
            subsidy: params.subsidy,
        }
    }

    /// Validate a block header
    pub fn validate_header(&self, header: &BlockHeader) -> Result<(), ValidationError> {
        let expected = self.miner.target.bits;
        if header.bits != expected {
            return Err(ValidationError::UnexpectedDifficulty {
                expected,
                actual: header.bits,
            });
        }

        if !self.miner.verify(header) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        if header.timestamp > unix_now() + MAX_FUTURE_DRIFT_SECS {
            return Err(ValidationError::InvalidTimestamp);
        }

        Ok(())
    }

    /// Validate a complete block
    pub fn validate_block(&self, block: &Block) -> Result<(), ValidationError> {
        self.validate_header(&block.header)?;

        if block.transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        if !block.transactions[0].is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }

        for tx in &block.transactions[1..] {
            if tx.is_coinbase() {
                return Err(ValidationError::CoinbaseNotFirst);
            }
        }

        for tx in &block.transactions {
            self.validate_transaction(tx)?;
        }

        let calculated_merkle = Block::hash_transactions(&block.transactions);
        if calculated_merkle != block.header.merkle_root {
            return Err(ValidationError::InvalidMerkleRoot);
        }

        let claimed = block.transactions[0]
            .total_output_value()
            .ok_or(ValidationError::ValueOverflow)?;
        if claimed > self.subsidy {
            return Err(ValidationError::ExcessiveReward {
                allowed: self.subsidy,
                claimed,
            });
        }

        Ok(())
    }

    /// Validate a transaction's structure
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ValidationError> {
        check_structure(tx)
    }
}

fn check_structure(tx: &Transaction) -> Result<(), ValidationError> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(ValidationError::EmptyTransaction);
    }

    if tx.outputs.iter().any(|out| out.value == 0) {
        return Err(ValidationError::ZeroValueOutput);
    }

    if tx.total_output_value().is_none() {
        return Err(ValidationError::ValueOverflow);
    }

    if tx.id != tx.hash() {
        return Err(ValidationError::InvalidTransactionId);
    }

    Ok(())
}

/// Transaction validator (for mempool validation)
pub struct TransactionValidator;

impl TransactionValidator {
    /// Validate a transaction for mempool acceptance
    pub fn validate_for_mempool(tx: &Transaction) -> Result<(), ValidationError> {
        if tx.is_coinbase() {
            return Err(ValidationError::CoinbaseNotFirst);
        }

        check_structure(tx)
    }
}
