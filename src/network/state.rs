// Shared in-memory node state

use crate::core::{Hash256, Transaction};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::{Mutex, MutexGuard};

/// Peer list, mempool and download queue, each behind its own lock
#[derive(Debug)]
pub struct NodeState {
    /// Known peer addresses; the seed is first
    known_nodes: Mutex<Vec<String>>,
    mempool: Mutex<BTreeMap<Hash256, Transaction>>,
    /// Block hashes still to request, oldest first
    blocks_in_transit: Mutex<VecDeque<Hash256>>,
    /// Held for the whole of a drain-and-mine pass
    mining: Mutex<()>,
}

impl NodeState {
    pub fn new(seed_addr: &str) -> Self {
        Self {
            known_nodes: Mutex::new(vec![seed_addr.to_string()]),
            mempool: Mutex::new(BTreeMap::new()),
            blocks_in_transit: Mutex::new(VecDeque::new()),
            mining: Mutex::new(()),
        }
    }

    pub async fn known_nodes(&self) -> Vec<String> {
        self.known_nodes.lock().await.clone()
    }

    /// Remember a peer; returns false if it was already known
    pub async fn add_node(&self, addr: &str) -> bool {
        let mut nodes = self.known_nodes.lock().await;
        if nodes.iter().any(|node| node == addr) {
            return false;
        }
        nodes.push(addr.to_string());
        true
    }

    pub async fn remove_node(&self, addr: &str) {
        self.known_nodes.lock().await.retain(|node| node != addr);
    }

    pub async fn has_transaction(&self, id: &Hash256) -> bool {
        self.mempool.lock().await.contains_key(id)
    }

    pub async fn get_transaction(&self, id: &Hash256) -> Option<Transaction> {
        self.mempool.lock().await.get(id).cloned()
    }

    /// Pool a transaction; returns false if it was already pooled
    pub async fn add_transaction(&self, tx: Transaction) -> bool {
        let mut mempool = self.mempool.lock().await;
        if mempool.contains_key(&tx.id) {
            return false;
        }
        mempool.insert(tx.id, tx);
        true
    }

    pub async fn remove_transactions<'a>(&self, ids: impl IntoIterator<Item = &'a Hash256>) {
        let mut mempool = self.mempool.lock().await;
        for id in ids {
            mempool.remove(id);
        }
    }

    pub async fn mempool_snapshot(&self) -> Vec<Transaction> {
        self.mempool.lock().await.values().cloned().collect()
    }

    pub async fn mempool_len(&self) -> usize {
        self.mempool.lock().await.len()
    }

    pub async fn set_in_transit(&self, hashes: VecDeque<Hash256>) {
        *self.blocks_in_transit.lock().await = hashes;
    }

    pub async fn next_in_transit(&self) -> Option<Hash256> {
        self.blocks_in_transit.lock().await.pop_front()
    }

    pub async fn clear_in_transit(&self) {
        self.blocks_in_transit.lock().await.clear();
    }

    pub async fn in_transit_len(&self) -> usize {
        self.blocks_in_transit.lock().await.len()
    }

    pub async fn lock_mining(&self) -> MutexGuard<'_, ()> {
        self.mining.lock().await
    }
}
