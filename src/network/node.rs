// Network node - gossip handlers, block download and mining

use crate::config::NodeConfig;
use crate::consensus::TransactionValidator;
use crate::core::{Block, Hash256, Transaction};
use crate::error::{NodeError, Result};
use crate::network::NODE_VERSION;
use crate::network::{read_message, send_message};
use crate::network::{InvType, Message, NodeState};
use crate::storage::{OutPoint, Storage};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

/// Network node
#[derive(Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    storage: Arc<RwLock<Storage>>,
    state: Arc<NodeState>,
}

impl Node {
    pub fn new(config: NodeConfig, storage: Storage) -> Self {
        let state = NodeState::new(&config.seed_addr);
        Self {
            config: Arc::new(config),
            storage: Arc::new(RwLock::new(storage)),
            state: Arc::new(state),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<RwLock<Storage>> {
        &self.storage
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    /// Bind the configured listen address and run until the listener fails
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.start(listener).await
    }

    /// Introduce ourselves to the seed, then serve connections
    pub async fn start(&self, listener: TcpListener) -> Result<()> {
        log::info!(
            "Node {} listening on {}{}",
            self.config.node_id,
            self.config.listen_addr,
            if self.config.is_seed() { " (seed)" } else { "" }
        );
        if let Some(address) = &self.config.mining_address {
            log::info!("Mining is on, rewards go to {}", address);
        }

        if !self.config.is_seed() {
            self.send_version(&self.config.seed_addr).await?;
        }

        self.serve(listener).await
    }

    /// Accept loop: one task per connection, one message per connection
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New connection from {}", addr);

            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream).await {
                    log::error!("Connection from {} failed: {}", addr, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        let message = read_message(&mut stream, self.config.read_timeout).await?;
        self.handle_message(message).await
    }

    /// Dispatch one received message
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        log::debug!(
            "Received {} from {}",
            message.message_type().as_str(),
            message.sender().unwrap_or("unknown")
        );

        match message {
            Message::Version {
                addr_from,
                best_height,
                ..
            } => self.handle_version(&addr_from, best_height).await,
            Message::GetBlocks { addr_from } => self.handle_get_blocks(&addr_from).await,
            Message::Inv {
                addr_from,
                kind: InvType::Block,
                items,
            } => self.handle_block_inv(&addr_from, items).await,
            Message::Inv {
                addr_from,
                kind: InvType::Tx,
                items,
            } => self.handle_tx_inv(&addr_from, items).await,
            Message::GetData { addr_from, kind, id } => self.handle_get_data(&addr_from, kind, id).await,
            Message::Block { addr_from, block } => self.handle_block(&addr_from, block).await,
            Message::Tx { addr_from, tx } => self.handle_tx(&addr_from, tx).await,
            Message::Addr { addresses } => self.handle_addr(addresses).await,
        }
    }

    async fn best_height(&self) -> Result<Option<u64>> {
        self.storage.read().await.blockchain.best_height()
    }

    async fn send_version(&self, addr: &str) -> Result<()> {
        let message = Message::Version {
            addr_from: self.config.listen_addr.clone(),
            version: NODE_VERSION,
            best_height: self.best_height().await?,
        };
        self.send(addr, &message).await;
        Ok(())
    }

    /// Send to a peer; a peer that cannot be dialed is forgotten
    async fn send(&self, addr: &str, message: &Message) -> bool {
        match send_message(addr, message, self.config.connect_timeout).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}; removing it from known nodes", e);
                self.state.remove_node(addr).await;
                false
            }
        }
    }

    /// Send to every known peer except this node and `except`
    async fn broadcast(&self, message: &Message, except: Option<&str>) {
        for node in self.state.known_nodes().await {
            if node == self.config.listen_addr || Some(node.as_str()) == except {
                continue;
            }
            self.send(&node, message).await;
        }
    }

    async fn handle_version(&self, addr_from: &str, their_height: Option<u64>) -> Result<()> {
        if self.state.add_node(addr_from).await {
            log::info!("New peer {}", addr_from);
        }

        let our_height = self.best_height().await?;

        // None (empty ledger) orders below every height
        if our_height < their_height {
            let message = Message::GetBlocks {
                addr_from: self.config.listen_addr.clone(),
            };
            self.send(addr_from, &message).await;
        } else if our_height > their_height {
            self.send_version(addr_from).await?;
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, addr_from: &str) -> Result<()> {
        let items = self.storage.read().await.blockchain.block_hashes()?;
        let message = Message::Inv {
            addr_from: self.config.listen_addr.clone(),
            kind: InvType::Block,
            items,
        };
        self.send(addr_from, &message).await;
        Ok(())
    }

    async fn handle_block_inv(&self, addr_from: &str, items: Vec<Hash256>) -> Result<()> {
        log::debug!("Peer {} advertised {} blocks", addr_from, items.len());

        let mut missing = VecDeque::new();
        {
            let storage = self.storage.read().await;
            // Inventories list the newest block first; download oldest first
            for hash in items.into_iter().rev() {
                if !storage.blockchain.has_block(&hash)? {
                    missing.push_back(hash);
                }
            }
        }

        let Some(first) = missing.pop_front() else {
            return Ok(());
        };
        self.state.set_in_transit(missing).await;
        self.request(addr_from, InvType::Block, first).await;
        Ok(())
    }

    async fn handle_tx_inv(&self, addr_from: &str, items: Vec<Hash256>) -> Result<()> {
        for id in items {
            if !self.state.has_transaction(&id).await {
                self.request(addr_from, InvType::Tx, id).await;
            }
        }
        Ok(())
    }

    async fn request(&self, addr: &str, kind: InvType, id: Hash256) {
        let message = Message::GetData {
            addr_from: self.config.listen_addr.clone(),
            kind,
            id,
        };
        self.send(addr, &message).await;
    }

    async fn handle_get_data(&self, addr_from: &str, kind: InvType, id: Hash256) -> Result<()> {
        let addr = self.config.listen_addr.clone();
        let message = match kind {
            InvType::Block => match self.storage.read().await.blockchain.get_block(&id)? {
                Some(block) => Message::Block { addr_from: addr, block },
                None => return Ok(()),
            },
            InvType::Tx => match self.state.get_transaction(&id).await {
                Some(tx) => Message::Tx { addr_from: addr, tx },
                None => return Ok(()),
            },
        };

        self.send(addr_from, &message).await;
        Ok(())
    }

    async fn handle_block(&self, addr_from: &str, block: Block) -> Result<()> {
        let hash = block.hash();
        let result = self.storage.write().await.add_block(&block);

        match result {
            Ok(added) => {
                if added {
                    log::info!("Received block {} from {}", hash, addr_from);
                }
                let ids: Vec<Hash256> = block.transactions.iter().map(|tx| tx.id).collect();
                self.state.remove_transactions(&ids).await;
            }
            Err(e) => {
                log::warn!("Rejected block {} from {}: {}", hash, addr_from, e);
                self.state.clear_in_transit().await;
                return Ok(());
            }
        }

        match self.state.next_in_transit().await {
            Some(next) => self.request(addr_from, InvType::Block, next).await,
            None => {
                self.storage.write().await.reindex()?;
            }
        }
        Ok(())
    }

    async fn handle_tx(&self, addr_from: &str, tx: Transaction) -> Result<()> {
        if let Err(e) = TransactionValidator::validate_for_mempool(&tx) {
            log::warn!("Rejected transaction {} from {}: {}", tx.id, addr_from, e);
            return Ok(());
        }

        let id = tx.id;
        if !self.state.add_transaction(tx).await {
            return Ok(());
        }
        log::debug!("Pooled transaction {}", id);

        if self.config.is_seed() {
            let message = Message::Inv {
                addr_from: self.config.listen_addr.clone(),
                kind: InvType::Tx,
                items: vec![id],
            };
            self.broadcast(&message, Some(addr_from)).await;
        } else if self.config.mining_address.is_some()
            && self.state.mempool_len().await >= self.config.mining_threshold
        {
            self.mine_pending().await?;
        }
        Ok(())
    }

    async fn handle_addr(&self, addresses: Vec<String>) -> Result<()> {
        for addr in &addresses {
            if *addr != self.config.listen_addr {
                self.state.add_node(addr).await;
            }
        }
        log::info!("Now know {} peers", self.state.known_nodes().await.len());

        let message = Message::GetBlocks {
            addr_from: self.config.listen_addr.clone(),
        };
        self.broadcast(&message, None).await;
        Ok(())
    }

    /// Drain the mempool into blocks while enough transactions are pooled
    pub async fn mine_pending(&self) -> Result<()> {
        let Some(address) = &self.config.mining_address else {
            return Ok(());
        };
        let reward_to = address.to_pubkey_hash()?;
        let _mining = self.state.lock_mining().await;

        for _ in 0..self.config.max_batches {
            let pending = self.state.mempool_snapshot().await;
            if pending.len() < self.config.mining_threshold {
                break;
            }

            let (selected, evicted) = {
                let storage = self.storage.read().await;
                select_transactions(&storage, pending)?
            };
            if !evicted.is_empty() {
                log::warn!("Evicting {} invalid transactions from the mempool", evicted.len());
                self.state.remove_transactions(&evicted).await;
            }
            if selected.is_empty() {
                continue;
            }

            let (tip, miner, subsidy) = {
                let storage = self.storage.read().await;
                let tip = storage.blockchain.tip()?.ok_or(NodeError::EmptyChain)?;
                (tip, *storage.blockchain.miner(), storage.blockchain.subsidy())
            };

            let mut transactions = vec![Transaction::coinbase(reward_to, "", subsidy)];
            transactions.extend(selected);

            let block = tokio::task::spawn_blocking(move || miner.mine_block(tip, transactions))
                .await
                .map_err(|e| NodeError::Io(std::io::Error::other(e)))??;

            if let Err(e) = self.storage.write().await.add_block(&block) {
                log::warn!("Mined block {} was not appended: {}", block.hash(), e);
                continue;
            }

            let ids: Vec<Hash256> = block.transactions.iter().map(|tx| tx.id).collect();
            self.state.remove_transactions(&ids).await;
            log::info!("New block {} is mined with {} transactions", block.hash(), ids.len());

            let message = Message::Inv {
                addr_from: self.config.listen_addr.clone(),
                kind: InvType::Block,
                items: vec![block.hash()],
            };
            self.broadcast(&message, None).await;

            tokio::task::yield_now().await;
        }

        Ok(())
    }
}

/// Split pooled transactions into the ones a block may include and the ones
/// that can never be included. Transactions spending an outpoint already
/// claimed earlier in the batch are left in the pool.
fn select_transactions(storage: &Storage, pending: Vec<Transaction>) -> Result<(Vec<Transaction>, Vec<Hash256>)> {
    let mut selected = Vec::new();
    let mut evicted = Vec::new();
    let mut claimed = HashSet::new();

    for tx in pending {
        let signed = match storage.blockchain.verify_transaction(&tx) {
            Ok(valid) => valid,
            Err(NodeError::ChainLookupFailure(_)) => false,
            Err(e) => return Err(e),
        };

        // Unspent, spent at most once, and value-balanced
        let spendable = signed
            && match storage.utxo_set.check_transaction(&tx, &mut HashSet::new()) {
                Ok(()) => true,
                Err(NodeError::InvalidBlock(_)) => false,
                Err(e) => return Err(e),
            };

        if !spendable {
            evicted.push(tx.id);
            continue;
        }

        let outpoints: Vec<OutPoint> = tx
            .inputs
            .iter()
            .map(|input| OutPoint::new(input.txid, input.vout))
            .collect();
        if outpoints.iter().all(|outpoint| !claimed.contains(outpoint)) {
            claimed.extend(outpoints);
            selected.push(tx);
        }
    }

    Ok((selected, evicted))
}
