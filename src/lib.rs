//! Gossip Ledger: a peer-to-peer proof-of-work ledger in Rust
//!
//! This crate provides:
//! - Proof of Work consensus with fork choice by cumulative work
//! - ECDSA digital signatures (secp256k1)
//! - UTXO-based transaction model
//! - FIFO transaction pool feeding a detached miner
//! - Flooding gossip over framed TCP, driven by a single-writer node actor
//! - Password-sealed wallet keys (PBKDF2 + AES-256-GCM)
//! - JSON persistence
//!
//! # Example
//!
//! ```rust
//! use gossip_ledger::core::{Blockchain, Transaction};
//!
//! // Create a genesis-only chain
//! let mut chain = Blockchain::new("founder");
//!
//! // Mine a block carrying only its reward
//! let block = chain.mine_next(vec![Transaction::coinbase("miner", 1)]).unwrap();
//! println!("Mined block {} ({})", block.index, block.hash);
//!
//! // Check balance
//! assert_eq!(chain.utxo_set().balance("miner"), 10);
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{Block, Blockchain, Transaction, UtxoSet, COINBASE_AMOUNT, GENESIS_AMOUNT};
pub use crypto::KeyPair;
pub use mining::{MiningJob, TransactionPool};
pub use network::{NodeConfig, NodeHandle};
pub use storage::{BlockStore, KeyStore, StorageConfig};
pub use wallet::Wallet;
