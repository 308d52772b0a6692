//! Mining engine for the ledger
//!
//! The nonce search is CPU-bound, so it runs on tokio's blocking pool while
//! the node keeps serving peers. Only the finished block comes back; the
//! caller appends it through the normal validation path.

use crate::core::{Block, BlockTemplate};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// A block found by a detached search
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub block: Block,
    pub stats: MiningStats,
}

/// Search for `template` on the current thread
///
/// This method takes snapshot data from the ledger, so it never holds the
/// ledger itself; `cancel` aborts the search.
pub fn mine_detached(template: BlockTemplate, cancel: &AtomicBool) -> Option<MinedBlock> {
    let start = Instant::now();
    let index = template.index;

    info!(
        "Mining block {} with difficulty {}...",
        index, template.difficulty
    );

    let block = template.mine(Some(cancel))?;

    let attempts = block.nonce.saturating_add(1);
    let elapsed = start.elapsed().as_millis();
    let hash_rate = if elapsed > 0 {
        (attempts as f64) / (elapsed as f64 / 1000.0)
    } else {
        attempts as f64
    };

    info!(
        "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
        block.index, elapsed, attempts, hash_rate
    );

    Some(MinedBlock {
        block,
        stats: MiningStats {
            hash_attempts: attempts,
            time_ms: elapsed,
            hash_rate,
        },
    })
}

/// Handle to a nonce search running on the blocking pool
#[derive(Debug)]
pub struct MiningJob {
    index: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Option<MinedBlock>>,
}

impl MiningJob {
    /// Start searching for `template` in the background
    pub fn spawn(template: BlockTemplate) -> Self {
        let index = template.index;
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = tokio::task::spawn_blocking(move || mine_detached(template, &flag));

        Self {
            index,
            cancel,
            handle,
        }
    }

    /// Height of the block being searched for
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Shared flag that stops the search once raised
    pub fn canceller(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Wait for the search to end; `None` if it was cancelled
    pub async fn finish(self) -> Option<MinedBlock> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("Mining worker for block {} failed: {}", self.index, e);
                None
            }
        }
    }
}
