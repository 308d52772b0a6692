//! Mining module for block creation and transaction pooling

pub mod miner;
pub mod pool;

pub use miner::{mine_detached, MinedBlock, MiningJob, MiningStats};
pub use pool::{PoolError, TransactionPool};
