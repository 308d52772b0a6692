//! Core ledger components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model, public-key ownership)
//! - UTXO accounting and transaction validation
//! - Blocks (with proof of work)
//! - Blockchain (difficulty retarget, fork choice by cumulative work)

pub mod block;
pub mod blockchain;
pub mod transaction;
pub mod utxo;

pub use block::{
    Block, BlockTemplate, DEFAULT_GENESIS_ADDRESS, GENESIS_DIFFICULTY, GENESIS_TIMESTAMP,
};
pub use blockchain::{
    cumulative_work, next_difficulty, now_ms, Blockchain, BlockchainError, BLOCK_INTERVAL_MS,
    DIFFICULTY_ADJUSTMENT_INTERVAL, TIMESTAMP_TOLERANCE_MS,
};
pub use transaction::{
    create_outputs, create_unsigned_input, Transaction, TransactionError, TransactionInput,
    TransactionOutput, UnspentOutput, COINBASE_AMOUNT, GENESIS_AMOUNT,
};
pub use utxo::{
    select_inputs_for_amount, validate_block_transactions, validate_chain_transactions,
    validate_coinbase, validate_transaction, UtxoSet,
};
