//! Transaction pool for pending transactions
//!
//! Buffers unconfirmed transactions in arrival order and turns the head of the
//! queue into a mining attempt on every tick. Each queued transaction gets at
//! most one attempt: it is dequeued whether or not the block is mined.

use crate::core::{
    validate_block_transactions, Block, Blockchain, BlockchainError, Transaction,
    TransactionError, UtxoSet,
};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

/// Pool errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Input {tx_out_id}:{tx_out_index} is already spent by a pending transaction")]
    InputCollision { tx_out_id: String, tx_out_index: u64 },
    #[error("Candidate block rejected: {0}")]
    Rejected(#[from] TransactionError),
    #[error("Mining failed: {0}")]
    Mining(#[from] BlockchainError),
}

/// FIFO queue of pending transactions plus the mining trigger
#[derive(Debug)]
pub struct TransactionPool {
    queue: VecDeque<Transaction>,
    /// Receives the coinbase reward of blocks mined from this pool
    miner_address: String,
    mining: bool,
}

impl TransactionPool {
    pub fn new(miner_address: &str) -> Self {
        Self {
            queue: VecDeque::new(),
            miner_address: miner_address.to_string(),
            mining: false,
        }
    }

    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    /// Enqueue `tx` unless one of its inputs is already claimed by a pending transaction
    pub fn try_receive(&mut self, tx: Transaction) -> Result<(), PoolError> {
        let pending: HashSet<(String, u64)> =
            self.queue.iter().flat_map(Transaction::outpoints).collect();

        if let Some((tx_out_id, tx_out_index)) = tx.outpoints().find(|o| pending.contains(o)) {
            return Err(PoolError::InputCollision {
                tx_out_id,
                tx_out_index,
            });
        }

        log::debug!("Pooled transaction {}", tx.id);
        self.queue.push_back(tx);
        Ok(())
    }

    /// Advisory form of [`TransactionPool::try_receive`]
    pub fn receive(&mut self, tx: Transaction) -> bool {
        let id = tx.id.clone();
        match self.try_receive(tx) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Transaction {} not pooled: {}", id, e);
                false
            }
        }
    }

    /// Drop every pending transaction with an input that no longer resolves
    pub fn refresh(&mut self, utxo_set: &UtxoSet) {
        let before = self.queue.len();
        self.queue
            .retain(|tx| tx.inputs.iter().all(|input| utxo_set.resolves(input)));

        let dropped = before - self.queue.len();
        if dropped > 0 {
            log::info!("Dropped {} stale transaction(s) from pool", dropped);
        }
    }

    /// Dequeue the head and bundle it with a coinbase for block `next_index`
    ///
    /// Returns `Ok(None)` when there is nothing to do (empty pool, or a
    /// mining attempt already running). The head is consumed even when the
    /// bundle fails validation.
    pub fn take_candidate(
        &mut self,
        next_index: u64,
        utxo_set: &UtxoSet,
    ) -> Result<Option<Vec<Transaction>>, PoolError> {
        self.refresh(utxo_set);
        if self.mining {
            return Ok(None);
        }
        let Some(tx) = self.queue.pop_front() else {
            return Ok(None);
        };

        let txs = vec![Transaction::coinbase(&self.miner_address, next_index), tx];
        if let Err(e) = validate_block_transactions(&txs, utxo_set, next_index) {
            log::warn!("Discarding pooled transaction {}: {}", txs[1].id, e);
            return Err(e.into());
        }
        Ok(Some(txs))
    }

    /// One synchronous mining round against `ledger`
    ///
    /// On success the new block is already appended and has been handed to
    /// `broadcast`.
    pub fn tick(
        &mut self,
        ledger: &mut Blockchain,
        mut broadcast: impl FnMut(&Block),
    ) -> Result<Option<Block>, PoolError> {
        let utxo_set = ledger.utxo_set();
        let Some(txs) = self.take_candidate(ledger.height() + 1, &utxo_set)? else {
            return Ok(None);
        };

        self.begin_mining();
        let mined = ledger.mine_next(txs);
        self.finish_mining();

        let block = mined?;
        broadcast(&block);
        Ok(Some(block))
    }

    /// Mark a detached mining attempt as running
    pub fn begin_mining(&mut self) {
        self.mining = true;
    }

    pub fn finish_mining(&mut self) {
        self.mining = false;
    }

    pub fn is_mining(&self) -> bool {
        self.mining
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Snapshot of the queue in FIFO order
    pub fn pending(&self) -> Vec<Transaction> {
        self.queue.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{create_outputs, create_unsigned_input, UnspentOutput, COINBASE_AMOUNT};
    use crate::crypto::KeyPair;

    fn spend(key: &KeyPair, utxo: &UnspentOutput, receiver: &str, amount: u64) -> Transaction {
        let outputs = create_outputs(receiver, &key.address(), amount, utxo.amount - amount);
        let mut tx = Transaction::new(vec![create_unsigned_input(utxo)], outputs);
        tx.inputs[0].signature = key.sign(tx.id.as_bytes()).unwrap();
        tx
    }

    fn funded_chain() -> (KeyPair, Blockchain, UnspentOutput) {
        let key = KeyPair::generate();
        let chain = Blockchain::new(&key.address());
        let utxo = chain.utxo_set().owned_by(&key.address()).remove(0);
        (key, chain, utxo)
    }

    #[test]
    fn test_receive_rejects_input_collision() {
        let (key, _, utxo) = funded_chain();
        let mut pool = TransactionPool::new("miner");

        assert!(pool.receive(spend(&key, &utxo, "bob", 10)));
        assert!(!pool.receive(spend(&key, &utxo, "carol", 20)));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_refresh_drops_stale() {
        let (key, chain, utxo) = funded_chain();
        let mut pool = TransactionPool::new("miner");
        pool.receive(spend(&key, &utxo, "bob", 10));

        pool.refresh(&chain.utxo_set());
        assert_eq!(pool.len(), 1);

        pool.refresh(&UtxoSet::new());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_tick_mines_and_broadcasts() {
        let (key, mut chain, utxo) = funded_chain();
        let mut pool = TransactionPool::new("miner");
        pool.receive(spend(&key, &utxo, "bob", 30));

        let mut broadcasted = Vec::new();
        let block = pool
            .tick(&mut chain, |block| broadcasted.push(block.clone()))
            .unwrap()
            .unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(broadcasted, vec![block]);
        assert!(pool.is_empty());
        assert!(!pool.is_mining());

        let utxo_set = chain.utxo_set();
        assert_eq!(utxo_set.balance("bob"), 30);
        assert_eq!(utxo_set.balance("miner"), COINBASE_AMOUNT);
    }

    #[test]
    fn test_tick_on_empty_pool_is_noop() {
        let (_, mut chain, _) = funded_chain();
        let mut pool = TransactionPool::new("miner");

        let mut calls = 0;
        assert_eq!(pool.tick(&mut chain, |_| calls += 1), Ok(None));
        assert_eq!(calls, 0);
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_invalid_head_is_discarded_without_retry() {
        let (key, mut chain, utxo) = funded_chain();
        let mut pool = TransactionPool::new("miner");

        let mut bad = spend(&key, &utxo, "bob", 30);
        bad.inputs[0].signature = KeyPair::generate().sign(bad.id.as_bytes()).unwrap();
        pool.receive(bad);

        let result = pool.tick(&mut chain, |_| {});
        assert!(matches!(
            result,
            Err(PoolError::Rejected(TransactionError::InvalidSignature { .. }))
        ));
        assert!(pool.is_empty());
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_no_candidate_while_mining() {
        let (key, chain, utxo) = funded_chain();
        let mut pool = TransactionPool::new("miner");
        pool.receive(spend(&key, &utxo, "bob", 30));

        pool.begin_mining();
        assert_eq!(pool.take_candidate(1, &chain.utxo_set()), Ok(None));
        assert_eq!(pool.len(), 1);

        pool.finish_mining();
        let txs = pool.take_candidate(1, &chain.utxo_set()).unwrap().unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].inputs[0].tx_out_index, 1);
    }
}
