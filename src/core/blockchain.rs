//! Blockchain implementation
//!
//! The ledger owns the ordered list of blocks. It mines and appends new
//! blocks, retargets difficulty, and swaps in a competing chain when that
//! chain carries strictly more cumulative work.

use crate::core::block::{Block, BlockTemplate};
use crate::core::transaction::Transaction;
use crate::core::utxo::UtxoSet;
use chrono::Utc;
use thiserror::Error;

/// Target spacing between blocks in milliseconds
pub const BLOCK_INTERVAL_MS: u64 = 10_000;

/// Number of blocks between difficulty adjustments
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;

/// Allowed clock skew for block timestamps in milliseconds
pub const TIMESTAMP_TOLERANCE_MS: u64 = 60_000;

/// Blockchain-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    #[error("Invalid block structure: {0}")]
    InvalidBlockStructure(String),
    #[error("Invalid block linkage: {0}")]
    InvalidBlockLinkage(String),
    #[error("Invalid proof of work for block {0}")]
    InvalidProofOfWork(u64),
    #[error("Invalid timestamp {timestamp} for block {index}")]
    InvalidTimestamp { index: u64, timestamp: u64 },
    #[error("Invalid chain: {0}")]
    InvalidChain(String),
    #[error("Nonce search for block {0} ended without a result")]
    MiningAborted(u64),
}

/// Current wall-clock time in milliseconds since epoch
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Which timestamp window a block is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampRule {
    /// Fresh block: within the tolerance of now on both sides
    Live,
    /// Historical block from a chain: only bounded above by now
    Historical,
}

/// The main blockchain structure
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// Never empty; `blocks[0] == genesis`
    blocks: Vec<Block>,
    genesis: Block,
}

impl Blockchain {
    /// Create a genesis-only chain minting the starting balance to `genesis_address`
    pub fn new(genesis_address: &str) -> Self {
        let genesis = Block::genesis(genesis_address);
        Self {
            blocks: vec![genesis.clone()],
            genesis,
        }
    }

    /// Restore a chain from previously persisted blocks
    ///
    /// An empty list yields the genesis-only chain. A non-empty list must be a
    /// fully valid chain rooted at the expected genesis block.
    pub fn from_blocks(genesis_address: &str, blocks: Vec<Block>) -> Result<Self, BlockchainError> {
        let mut chain = Self::new(genesis_address);
        if blocks.is_empty() {
            return Ok(chain);
        }
        chain.validate_chain(&blocks, now_ms())?;
        chain.blocks = blocks;
        Ok(chain)
    }

    /// Get the latest block
    pub fn latest(&self) -> &Block {
        self.blocks.last().unwrap_or(&self.genesis)
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Get blockchain height
    pub fn height(&self) -> u64 {
        self.latest().index
    }

    /// Derive the UTXO set of the current chain
    pub fn utxo_set(&self) -> UtxoSet {
        UtxoSet::build(&self.blocks)
    }

    /// Difficulty the next block should be mined at
    pub fn retarget(&self) -> u32 {
        next_difficulty(&self.blocks)
    }

    /// Parameters for mining the successor of the current tip
    pub fn next_template(&self, data: Vec<Transaction>) -> BlockTemplate {
        let latest = self.latest();
        BlockTemplate {
            index: latest.index + 1,
            previous_hash: latest.hash.clone(),
            timestamp: now_ms(),
            data,
            difficulty: self.retarget(),
        }
    }

    /// Mine the next block on the calling thread and append it
    pub fn mine_next(&mut self, data: Vec<Transaction>) -> Result<Block, BlockchainError> {
        let template = self.next_template(data);
        let index = template.index;
        let block = template
            .mine(None)
            .ok_or(BlockchainError::MiningAborted(index))?;

        self.append(block.clone())?;
        Ok(block)
    }

    /// Validate `candidate` as the direct successor of the tip and append it
    pub fn append(&mut self, candidate: Block) -> Result<(), BlockchainError> {
        self.append_at(candidate, now_ms())
    }

    /// [`Blockchain::append`] against an explicit receive time
    pub fn append_at(&mut self, candidate: Block, now: u64) -> Result<(), BlockchainError> {
        validate_successor(self.latest(), &candidate, now, TimestampRule::Live)?;

        log::info!(
            "Appended block {} ({}), difficulty {}, {} tx",
            candidate.index,
            &candidate.hash[..16],
            candidate.difficulty,
            candidate.data.len()
        );
        self.blocks.push(candidate);
        Ok(())
    }

    /// Replace the whole chain if `candidate` is valid and carries more work
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> Result<(), BlockchainError> {
        self.replace_chain_at(candidate, now_ms())
    }

    /// [`Blockchain::replace_chain`] against an explicit receive time
    pub fn replace_chain_at(&mut self, candidate: Vec<Block>, now: u64) -> Result<(), BlockchainError> {
        self.validate_chain(&candidate, now)?;

        let current_work = cumulative_work(&self.blocks);
        let candidate_work = cumulative_work(&candidate);
        if candidate_work <= current_work {
            return Err(BlockchainError::InvalidChain(format!(
                "insufficient cumulative work: {} <= {}",
                candidate_work, current_work
            )));
        }

        log::info!(
            "Replacing chain: height {} -> {}, work {} -> {}",
            self.height(),
            candidate.len().saturating_sub(1),
            current_work,
            candidate_work
        );
        self.blocks = candidate;
        Ok(())
    }

    /// Check that `blocks` is a complete chain rooted at our genesis block
    pub fn validate_chain(&self, blocks: &[Block], now: u64) -> Result<(), BlockchainError> {
        let first = blocks
            .first()
            .ok_or_else(|| BlockchainError::InvalidChain("empty chain".to_string()))?;
        if *first != self.genesis {
            return Err(BlockchainError::InvalidChain(
                "genesis block mismatch".to_string(),
            ));
        }

        for pair in blocks.windows(2) {
            validate_successor(&pair[0], &pair[1], now, TimestampRule::Historical)?;
        }
        Ok(())
    }
}

/// Check every linkage, integrity and timing rule for `candidate` following `previous`
fn validate_successor(
    previous: &Block,
    candidate: &Block,
    now: u64,
    rule: TimestampRule,
) -> Result<(), BlockchainError> {
    if !candidate.has_valid_structure() {
        return Err(BlockchainError::InvalidBlockStructure(format!(
            "block {} has malformed digests",
            candidate.index
        )));
    }

    if candidate.index != previous.index + 1 {
        return Err(BlockchainError::InvalidBlockLinkage(format!(
            "expected index {}, got {}",
            previous.index + 1,
            candidate.index
        )));
    }

    if candidate.previous_hash != previous.hash {
        return Err(BlockchainError::InvalidBlockLinkage(format!(
            "block {} does not extend {}",
            candidate.index, previous.hash
        )));
    }

    if !candidate.verify_hash() || !candidate.is_valid_pow() {
        return Err(BlockchainError::InvalidProofOfWork(candidate.index));
    }

    if !timestamp_plausible(previous.timestamp, candidate.timestamp, now, rule) {
        return Err(BlockchainError::InvalidTimestamp {
            index: candidate.index,
            timestamp: candidate.timestamp,
        });
    }

    Ok(())
}

fn timestamp_plausible(previous: u64, timestamp: u64, now: u64, rule: TimestampRule) -> bool {
    let after_previous = timestamp.saturating_add(TIMESTAMP_TOLERANCE_MS) >= previous;
    let not_future = timestamp <= now.saturating_add(TIMESTAMP_TOLERANCE_MS);
    match rule {
        TimestampRule::Live => {
            after_previous && not_future && timestamp.saturating_add(TIMESTAMP_TOLERANCE_MS) >= now
        }
        TimestampRule::Historical => after_previous && not_future,
    }
}

/// Difficulty for the successor of the last block in `blocks`
///
/// On every adjustment boundary the time spent on the last interval is
/// compared with the expected time: much faster raises difficulty by one,
/// much slower lowers it by one (never below zero).
pub fn next_difficulty(blocks: &[Block]) -> u32 {
    let Some(latest) = blocks.last() else {
        return 0;
    };

    if latest.index == 0 || latest.index % DIFFICULTY_ADJUSTMENT_INTERVAL != 0 {
        return latest.difficulty;
    }

    let interval = DIFFICULTY_ADJUSTMENT_INTERVAL as usize;
    let Some(reference) = blocks
        .len()
        .checked_sub(interval + 1)
        .and_then(|position| blocks.get(position))
    else {
        return latest.difficulty;
    };

    let expected = BLOCK_INTERVAL_MS * DIFFICULTY_ADJUSTMENT_INTERVAL;
    let actual = latest.timestamp.saturating_sub(reference.timestamp);

    let adjusted = if actual < expected / 2 {
        latest.difficulty.saturating_add(1)
    } else if actual > expected * 2 {
        latest.difficulty.saturating_sub(1)
    } else {
        latest.difficulty
    };

    if adjusted != latest.difficulty {
        log::info!(
            "Difficulty adjusted from {} to {} (interval took {}ms, expected {}ms)",
            latest.difficulty,
            adjusted,
            actual,
            expected
        );
    }
    adjusted
}

/// Total work of a chain: the sum of `2^difficulty` over its blocks
pub fn cumulative_work(blocks: &[Block]) -> u128 {
    blocks.iter().fold(0u128, |total, block| {
        let work = 1u128.checked_shl(block.difficulty).unwrap_or(u128::MAX);
        total.saturating_add(work)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOUNDER: &str = "founder";

    /// Mine a block on top of `chain` at the given difficulty and timestamp
    fn mine_on(chain: &Blockchain, difficulty: u32, timestamp: u64) -> Block {
        let latest = chain.latest();
        let index = latest.index + 1;
        Block::mine(
            index,
            &latest.hash,
            timestamp,
            vec![Transaction::coinbase("miner", index)],
            difficulty,
            None,
        )
        .unwrap()
    }

    /// Unmined block carrying only what the retarget rule reads
    fn stub(index: u64, timestamp: u64, difficulty: u32) -> Block {
        Block {
            index,
            previous_hash: String::new(),
            timestamp,
            data: vec![],
            difficulty,
            nonce: 0,
            hash: String::new(),
        }
    }

    #[test]
    fn test_new_blockchain() {
        let chain = Blockchain::new(FOUNDER);
        assert_eq!(chain.blocks().len(), 1);
        assert_eq!(chain.latest(), chain.genesis());
        assert_eq!(chain.utxo_set().balance(FOUNDER), 100);
    }

    #[test]
    fn test_mine_next_from_genesis() {
        let mut chain = Blockchain::new(FOUNDER);
        let genesis_hash = chain.latest().hash.clone();

        let block = chain.mine_next(vec![Transaction::coinbase("miner", 1)]).unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.previous_hash, genesis_hash);
        assert_eq!(block.hash, block.compute_hash());
        assert!(block.is_valid_pow());
        assert_eq!(chain.latest(), &block);
    }

    #[test]
    fn test_append_rejects_bad_linkage() {
        let mut chain = Blockchain::new(FOUNDER);
        let now = now_ms();
        let good = mine_on(&chain, 1, now);

        let mut wrong_index = good.clone();
        wrong_index.index = 2;
        wrong_index.hash = wrong_index.compute_hash();
        assert!(matches!(
            chain.append_at(wrong_index, now),
            Err(BlockchainError::InvalidBlockLinkage(_))
        ));

        let mut wrong_parent = good.clone();
        wrong_parent.previous_hash = "ab".repeat(32);
        assert!(matches!(
            chain.append_at(wrong_parent, now),
            Err(BlockchainError::InvalidBlockLinkage(_))
        ));

        assert_eq!(chain.blocks().len(), 1);
        assert!(chain.append_at(good, now).is_ok());
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_append_rejects_tampered_block() {
        let mut chain = Blockchain::new(FOUNDER);
        let now = now_ms();
        let mut block = mine_on(&chain, 1, now);
        block.data[0].outputs[0].amount = 1_000;

        assert_eq!(
            chain.append_at(block, now),
            Err(BlockchainError::InvalidProofOfWork(1))
        );
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_append_rejects_insufficient_work() {
        let mut chain = Blockchain::new(FOUNDER);
        let now = now_ms();
        // Search for a hash that misses the declared difficulty
        let block = (0..u64::MAX)
            .map(|nonce| {
                let latest = chain.latest();
                let data = vec![Transaction::coinbase("miner", 1)];
                let hash = Block::calculate_hash(1, &latest.hash, now, &data, 4, nonce);
                Block {
                    index: 1,
                    previous_hash: latest.hash.clone(),
                    timestamp: now,
                    data,
                    difficulty: 4,
                    nonce,
                    hash,
                }
            })
            .find(|block| !block.is_valid_pow())
            .unwrap();

        assert_eq!(
            chain.append_at(block, now),
            Err(BlockchainError::InvalidProofOfWork(1))
        );
    }

    #[test]
    fn test_timestamp_tolerance_boundaries() {
        let now = now_ms();
        let cases = [
            (now - TIMESTAMP_TOLERANCE_MS, true),
            (now - TIMESTAMP_TOLERANCE_MS - 1, false),
            (now + TIMESTAMP_TOLERANCE_MS, true),
            (now + TIMESTAMP_TOLERANCE_MS + 1, false),
        ];

        for (timestamp, accepted) in cases {
            let mut chain = Blockchain::new(FOUNDER);
            let block = mine_on(&chain, 1, timestamp);
            let result = chain.append_at(block, now);
            assert_eq!(result.is_ok(), accepted, "timestamp offset {}", timestamp as i64 - now as i64);
            if !accepted {
                assert!(matches!(result, Err(BlockchainError::InvalidTimestamp { .. })));
            }
        }
    }

    #[test]
    fn test_retarget_outside_boundary_carries_over() {
        let blocks: Vec<Block> = (0..=5).map(|i| stub(i, i * 1_000, 3)).collect();
        assert_eq!(next_difficulty(&blocks), 3);
        assert_eq!(next_difficulty(&blocks[..1]), 3);
    }

    #[test]
    fn test_retarget_fast_interval_raises_difficulty() {
        let blocks: Vec<Block> = (0..=10).map(|i| stub(i, i * 1_000, 3)).collect();
        assert_eq!(next_difficulty(&blocks), 4);
    }

    #[test]
    fn test_retarget_slow_interval_lowers_difficulty() {
        let blocks: Vec<Block> = (0..=10).map(|i| stub(i, i * 30_000, 3)).collect();
        assert_eq!(next_difficulty(&blocks), 2);

        let floor: Vec<Block> = (0..=10).map(|i| stub(i, i * 30_000, 0)).collect();
        assert_eq!(next_difficulty(&floor), 0);
    }

    #[test]
    fn test_retarget_on_target_is_unchanged() {
        let blocks: Vec<Block> = (0..=10)
            .map(|i| stub(i, i * BLOCK_INTERVAL_MS, 3))
            .collect();
        assert_eq!(next_difficulty(&blocks), 3);
    }

    #[test]
    fn test_cumulative_work() {
        let blocks = vec![stub(0, 0, 1), stub(1, 0, 3), stub(2, 0, 0)];
        assert_eq!(cumulative_work(&blocks), 2 + 8 + 1);
        assert_eq!(cumulative_work(&[stub(0, 0, 200)]), u128::MAX);
    }

    #[test]
    fn test_heavier_chain_replaces_lighter() {
        let now = now_ms();
        let mut a = Blockchain::new(FOUNDER);
        for offset in 0..3 {
            let block = mine_on(&a, 1, now + offset);
            a.append_at(block, now).unwrap();
        }

        let mut b = Blockchain::new(FOUNDER);
        for offset in 0..2 {
            let block = mine_on(&b, 3, now + offset);
            b.append_at(block, now).unwrap();
        }

        let work_a = cumulative_work(a.blocks());
        let work_b = cumulative_work(b.blocks());
        assert!(work_b > work_a);

        a.replace_chain_at(b.blocks().to_vec(), now).unwrap();
        assert_eq!(a.blocks(), b.blocks());

        // swapping back would need strictly more work
        let lighter = Blockchain::new(FOUNDER);
        assert!(matches!(
            a.replace_chain_at(lighter.blocks().to_vec(), now),
            Err(BlockchainError::InvalidChain(_))
        ));
    }

    #[test]
    fn test_equal_work_does_not_replace() {
        let now = now_ms();
        let mut a = Blockchain::new(FOUNDER);
        let mut b = Blockchain::new(FOUNDER);
        let block_a = mine_on(&a, 1, now);
        let block_b = mine_on(&b, 1, now + 1);
        a.append_at(block_a, now).unwrap();
        b.append_at(block_b, now).unwrap();

        let before = a.blocks().to_vec();
        assert!(a.replace_chain_at(b.blocks().to_vec(), now).is_err());
        assert_eq!(a.blocks(), before.as_slice());
        assert!(b.replace_chain_at(before, now).is_err());
    }

    #[test]
    fn test_foreign_genesis_rejected() {
        let now = now_ms();
        let mut ours = Blockchain::new(FOUNDER);
        let mut theirs = Blockchain::new("someone else");
        for offset in 0..3 {
            let block = mine_on(&theirs, 2, now + offset);
            theirs.append_at(block, now).unwrap();
        }

        assert_eq!(
            ours.replace_chain_at(theirs.blocks().to_vec(), now),
            Err(BlockchainError::InvalidChain("genesis block mismatch".to_string()))
        );
    }

    #[test]
    fn test_heavier_chain_with_broken_interior_rejected() {
        let now = now_ms();
        let mut ours = Blockchain::new(FOUNDER);
        ours.append_at(mine_on(&ours, 1, now), now).unwrap();
        let before = ours.blocks().to_vec();

        let mut theirs = Blockchain::new(FOUNDER);
        for offset in 0..3 {
            let block = mine_on(&theirs, 2, now + offset);
            theirs.append_at(block, now).unwrap();
        }
        assert!(cumulative_work(theirs.blocks()) > cumulative_work(&before));

        let mut relinked = theirs.blocks().to_vec();
        relinked[2].previous_hash = "cd".repeat(32);
        relinked[2].hash = relinked[2].compute_hash();
        assert!(matches!(
            ours.replace_chain_at(relinked, now),
            Err(BlockchainError::InvalidBlockLinkage(_))
        ));
        assert_eq!(ours.blocks(), before.as_slice());

        let mut tampered = theirs.blocks().to_vec();
        tampered[2].data[0].outputs[0].amount = 1_000;
        assert_eq!(
            ours.replace_chain_at(tampered, now),
            Err(BlockchainError::InvalidProofOfWork(2))
        );
        assert_eq!(ours.blocks(), before.as_slice());

        ours.replace_chain_at(theirs.blocks().to_vec(), now).unwrap();
        assert_eq!(ours.blocks(), theirs.blocks());
    }

    #[test]
    fn test_historical_blocks_pass_chain_validation() {
        // genesis is years old; its successor is too
        let chain = Blockchain::new(FOUNDER);
        let old = chain.genesis().timestamp + 1_000;
        let block = mine_on(&chain, 1, old);
        let blocks = vec![chain.genesis().clone(), block.clone()];

        assert!(chain.validate_chain(&blocks, now_ms()).is_ok());
        let mut live = chain.clone();
        assert!(matches!(
            live.append_at(block, now_ms()),
            Err(BlockchainError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_from_blocks() {
        let mut chain = Blockchain::new(FOUNDER);
        chain.mine_next(vec![Transaction::coinbase("miner", 1)]).unwrap();

        let restored = Blockchain::from_blocks(FOUNDER, chain.blocks().to_vec()).unwrap();
        assert_eq!(restored.blocks(), chain.blocks());

        let empty = Blockchain::from_blocks(FOUNDER, vec![]).unwrap();
        assert_eq!(empty.height(), 0);

        assert!(Blockchain::from_blocks("other", chain.blocks().to_vec()).is_err());
    }
}
