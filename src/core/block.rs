//! Block implementation for the ledger
//!
//! A block commits to its position, its predecessor, a millisecond timestamp,
//! the ordered transaction list, the difficulty it was mined at and the nonce
//! that satisfied it.

use crate::core::transaction::Transaction;
use crate::crypto::{hex_meets_difficulty, is_digest_hex, sha256_hex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Fixed timestamp of the genesis block (ms since epoch)
pub const GENESIS_TIMESTAMP: u64 = 1_731_602_440_343;

/// Difficulty recorded in the genesis block
pub const GENESIS_DIFFICULTY: u32 = 1;

/// Demo genesis owner: the compressed secp256k1 generator point, whose private key is 1
pub const DEFAULT_GENESIS_ADDRESS: &str =
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

/// Nonce attempts between checks of the cancel flag
const CANCEL_CHECK_INTERVAL: u64 = 4096;

/// A block in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Block height
    pub index: u64,
    /// Hash of the predecessor; empty for genesis
    pub previous_hash: String,
    /// Creation time in milliseconds since epoch
    pub timestamp: u64,
    /// Ordered transactions, coinbase first
    pub data: Vec<Transaction>,
    /// Required number of leading zero bits
    pub difficulty: u32,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Hash over every other field of a block
    pub fn calculate_hash(
        index: u64,
        previous_hash: &str,
        timestamp: u64,
        data: &[Transaction],
        difficulty: u32,
        nonce: u64,
    ) -> String {
        let prefix = preimage_prefix(index, previous_hash, timestamp, data);
        sha256_hex(format!("{}{}{}", prefix, difficulty, nonce).as_bytes())
    }

    /// The genesis block minting the starting balance to `address`
    pub fn genesis(address: &str) -> Self {
        let data = vec![Transaction::genesis(address)];
        let hash = Self::calculate_hash(0, "", GENESIS_TIMESTAMP, &data, GENESIS_DIFFICULTY, 0);
        Self {
            index: 0,
            previous_hash: String::new(),
            timestamp: GENESIS_TIMESTAMP,
            data,
            difficulty: GENESIS_DIFFICULTY,
            nonce: 0,
            hash,
        }
    }

    /// Brute-force a nonce from 0 upwards until the hash meets `difficulty`
    ///
    /// Returns `None` if `cancel` is raised (polled every few thousand
    /// attempts) or the nonce space is exhausted.
    pub fn mine(
        index: u64,
        previous_hash: &str,
        timestamp: u64,
        data: Vec<Transaction>,
        difficulty: u32,
        cancel: Option<&AtomicBool>,
    ) -> Option<Self> {
        let prefix = preimage_prefix(index, previous_hash, timestamp, &data);
        let mut nonce = 0u64;

        loop {
            if nonce % CANCEL_CHECK_INTERVAL == 0
                && cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
            {
                log::debug!("Nonce search for block {} cancelled at {}", index, nonce);
                return None;
            }

            let hash = sha256_hex(format!("{}{}{}", prefix, difficulty, nonce).as_bytes());
            if hex_meets_difficulty(&hash, difficulty) {
                return Some(Self {
                    index,
                    previous_hash: previous_hash.to_string(),
                    timestamp,
                    data,
                    difficulty,
                    nonce,
                    hash,
                });
            }

            nonce = nonce.checked_add(1)?;
        }
    }

    /// Recompute this block's hash from its fields
    pub fn compute_hash(&self) -> String {
        Self::calculate_hash(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.data,
            self.difficulty,
            self.nonce,
        )
    }

    /// Check that the stored hash matches the contents
    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Check if the proof of work is valid
    pub fn is_valid_pow(&self) -> bool {
        hex_meets_difficulty(&self.hash, self.difficulty)
    }

    /// Well-formedness of the digest fields
    pub fn has_valid_structure(&self) -> bool {
        is_digest_hex(&self.hash)
            && (self.index == 0 || is_digest_hex(&self.previous_hash))
            && self.data.iter().all(|tx| is_digest_hex(&tx.id))
    }
}

/// Everything needed to search for the next block, detached from the ledger
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: u64,
    pub data: Vec<Transaction>,
    pub difficulty: u32,
}

impl BlockTemplate {
    pub fn mine(self, cancel: Option<&AtomicBool>) -> Option<Block> {
        Block::mine(
            self.index,
            &self.previous_hash,
            self.timestamp,
            self.data,
            self.difficulty,
            cancel,
        )
    }
}

fn preimage_prefix(index: u64, previous_hash: &str, timestamp: u64, data: &[Transaction]) -> String {
    let data_json = serde_json::to_string(data).unwrap_or_default();
    format!("{}{}{}{}", index, previous_hash, timestamp, data_json)
}
