// Node and chain configuration

use crate::wallet::Address;
use std::path::PathBuf;
use std::time::Duration;

/// Difficulty used by the network unless overridden
pub const DEFAULT_TARGET_BITS: u32 = 24;
/// Coinbase reward in the smallest currency unit
pub const DEFAULT_SUBSIDY: u64 = 10;
/// Nonce search stops here instead of wrapping
pub const DEFAULT_MAX_NONCE: u64 = i64::MAX as u64;

pub const DEFAULT_SEED_ADDR: &str = "localhost:3000";
/// Pooled transactions required before a miner builds a block
pub const DEFAULT_MINING_THRESHOLD: usize = 2;
/// Upper bound on blocks mined per incoming transaction
pub const DEFAULT_MAX_BATCHES: usize = 16;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Consensus parameters every node of one network must agree on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub target_bits: u32,
    pub subsidy: u64,
    pub max_nonce: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            target_bits: DEFAULT_TARGET_BITS,
            subsidy: DEFAULT_SUBSIDY,
            max_nonce: DEFAULT_MAX_NONCE,
        }
    }
}

/// Runtime configuration of a single node process
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    /// Address peers use to reach this node, also sent as `addr_from`
    pub listen_addr: String,
    /// First known peer; a node listening here acts as the relay seed
    pub seed_addr: String,
    /// Reward address; mining is disabled when unset
    pub mining_address: Option<Address>,
    pub data_dir: PathBuf,
    pub mining_threshold: usize,
    pub max_batches: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub chain: ChainParams,
}

impl NodeConfig {
    /// Defaults for a node identified by `node_id` (used as its port)
    pub fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            listen_addr: format!("localhost:{}", node_id),
            seed_addr: DEFAULT_SEED_ADDR.to_string(),
            mining_address: None,
            data_dir: PathBuf::from("./data").join(node_id),
            mining_threshold: DEFAULT_MINING_THRESHOLD,
            max_batches: DEFAULT_MAX_BATCHES,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            chain: ChainParams::default(),
        }
    }

    pub fn with_seed(mut self, seed_addr: impl Into<String>) -> Self {
        self.seed_addr = seed_addr.into();
        self
    }

    pub fn with_mining_address(mut self, address: Option<Address>) -> Self {
        self.mining_address = address;
        self
    }

    pub fn with_chain(mut self, chain: ChainParams) -> Self {
        self.chain = chain;
        self
    }

    /// Whether this node is the seed that relays transactions instead of mining them
    pub fn is_seed(&self) -> bool {
        self.listen_addr == self.seed_addr
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.json")
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir.join("chain")
    }
}
