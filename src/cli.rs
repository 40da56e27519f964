// CLI commands

use crate::config::{NodeConfig, DEFAULT_SEED_ADDR};
use crate::core::{Block, Transaction};
use crate::error::Result;
use crate::network::{send_message, Message, Node};
use crate::storage::Storage;
use crate::wallet::{Address, Keystore, TransactionBuilder};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hashchain")]
#[command(about = "Proof-of-work ledger node with UTXO wallet and P2P sync", long_about = None)]
pub struct Cli {
    /// Node identifier; selects the data directory, wallet file and listen port
    #[arg(long, env = "NODE_ID")]
    pub node_id: String,

    /// Seed node every other node introduces itself to
    #[arg(long, env = "SEED_ADDR", default_value = DEFAULT_SEED_ADDR)]
    pub seed: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new key pair and print its address
    Createwallet,

    /// List all addresses in the wallet file
    Listaddresses,

    /// Create a blockchain and send the genesis reward to ADDRESS
    Createblockchain {
        #[arg(long)]
        address: String,
    },

    /// Get balance of ADDRESS
    Getbalance {
        #[arg(long)]
        address: String,
    },

    /// Send AMOUNT of coins from FROM address to TO
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine on this node instead of handing the transaction to the seed
        #[arg(long)]
        mine: bool,
    },

    /// Print all the blocks of the blockchain
    Printchain,

    /// Rebuild the UTXO set
    Reindexutxo,

    /// Start a node; with --miner, mined rewards go to that address
    Startnode {
        #[arg(long)]
        miner: Option<String>,
    },
}

/// CLI handler
pub struct CliHandler {
    config: NodeConfig,
}

impl CliHandler {
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Configuration for the node named on the command line
    pub fn from_cli(cli: &Cli) -> Self {
        Self::new(NodeConfig::new(&cli.node_id).with_seed(cli.seed.clone()))
    }

    fn open_storage(&self) -> Result<Storage> {
        Storage::new(self.config.chain_path(), self.config.chain)
    }

    fn open_keystore(&self) -> Result<Keystore> {
        Keystore::open(self.config.wallet_path())
    }

    /// Handle CLI command
    pub async fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Createwallet => self.create_wallet(),
            Commands::Listaddresses => self.list_addresses(),
            Commands::Createblockchain { address } => self.create_blockchain(&address),
            Commands::Getbalance { address } => self.get_balance(&address),
            Commands::Send {
                from,
                to,
                amount,
                mine,
            } => self.send(&from, &to, amount, mine).await,
            Commands::Printchain => self.print_chain(),
            Commands::Reindexutxo => self.reindex_utxo(),
            Commands::Startnode { miner } => self.start_node(miner).await,
        }
    }

    fn create_wallet(&self) -> Result<()> {
        let mut keystore = self.open_keystore()?;
        let address = keystore.new_address();
        keystore.save(self.config.wallet_path())?;

        println!("Your new address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        for address in self.open_keystore()?.list_addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    fn create_blockchain(&self, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        let storage = self.open_storage()?;
        let genesis = storage.create_blockchain(address.to_pubkey_hash()?)?;
        storage.flush()?;

        println!("Done! Genesis block: {}", genesis.hash());
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        let storage = self.open_storage()?;
        let balance = TransactionBuilder::new(&storage).balance(&address)?;

        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    async fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> Result<()> {
        let from = Address::parse(from)?;
        let to = Address::parse(to)?;

        let keystore = self.open_keystore()?;
        let keypair = keystore.require_keypair(&from)?;

        let storage = self.open_storage()?;
        let tx = TransactionBuilder::new(&storage).build(keypair, &to, amount)?;

        if mine {
            let coinbase = Transaction::coinbase(keypair.pubkey_hash(), "", storage.blockchain.subsidy());
            let block = storage.mine_block(vec![coinbase, tx])?;
            storage.flush()?;
            println!("Mined block {}", block.hash());
        } else {
            let message = Message::Tx {
                addr_from: self.config.listen_addr.clone(),
                tx,
            };
            send_message(&self.config.seed_addr, &message, self.config.connect_timeout).await?;
        }

        println!("Success!");
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let storage = self.open_storage()?;
        let miner = *storage.blockchain.miner();

        for block in storage.blockchain.iter()? {
            let block = block?;
            print_block(&block, miner.verify(&block.header));
        }
        Ok(())
    }

    fn reindex_utxo(&self) -> Result<()> {
        let storage = self.open_storage()?;
        let count = storage.reindex()?;
        storage.flush()?;

        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }

    async fn start_node(&self, miner: Option<String>) -> Result<()> {
        let mining_address = miner.as_deref().map(Address::parse).transpose()?;
        let storage = self.open_storage()?;

        let config = self.config.clone().with_mining_address(mining_address);
        println!("Starting node {}", config.node_id);
        Node::new(config, storage).run().await
    }
}

fn print_block(block: &Block, pow_valid: bool) {
    println!("============ Block {} ============", block.hash());
    println!("Prev. block: {}", block.header.prev_block_hash);
    println!("Timestamp: {}", block.header.timestamp);
    println!("Bits: {}  Nonce: {}", block.header.bits, block.header.nonce);
    println!("PoW: {}", pow_valid);

    for tx in &block.transactions {
        println!("--- Transaction {}:", tx.id);
        for (i, input) in tx.inputs.iter().enumerate() {
            if input.is_coinbase() {
                println!("     Input {}: coinbase ({})", i, String::from_utf8_lossy(&input.pub_key));
            } else {
                println!("     Input {}:", i);
                println!("       TXID:      {}", input.txid);
                println!("       Out:       {}", input.vout);
                println!("       Signature: {}", hex::encode(&input.signature));
                println!("       PubKey:    {}", hex::encode(&input.pub_key));
            }
        }
        for (i, output) in tx.outputs.iter().enumerate() {
            println!("     Output {}:", i);
            println!("       Value:  {}", output.value);
            println!("       Address: {}", Address::from_pubkey_hash(&output.pub_key_hash));
        }
    }
    println!();
}
