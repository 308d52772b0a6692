//! Transaction handling for the ledger
//!
//! Implements a UTXO-based transaction model. An output is owned by a public
//! key (the address); spending it requires an ECDSA signature by that key over
//! the spending transaction's id. There are no fees: inputs and outputs of an
//! ordinary transaction balance exactly.

use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mining reward carried by every coinbase transaction
pub const COINBASE_AMOUNT: u64 = 10;

/// Starting balance minted by the genesis transaction
pub const GENESIS_AMOUNT: u64 = 100;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),
    #[error("Invalid signature on input {input} of transaction {tx_id}")]
    InvalidSignature { tx_id: String, input: usize },
    #[error("Input references unknown UTXO {tx_out_id}:{tx_out_index}")]
    UnknownUtxoReference { tx_out_id: String, tx_out_index: u64 },
    #[error("Amount mismatch in transaction {tx_id}: inputs {inputs}, outputs {outputs}")]
    AmountMismatch {
        tx_id: String,
        inputs: u64,
        outputs: u64,
    },
    #[error("Duplicate input {tx_out_id}:{tx_out_index}")]
    DuplicateInput { tx_out_id: String, tx_out_index: u64 },
    #[error("Invalid coinbase transaction: {0}")]
    InvalidCoinbase(String),
    #[error("Transaction {0} has no inputs")]
    MissingInputs(String),
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },
}

// =============================================================================
// Inputs & Outputs
// =============================================================================

/// Transaction input (reference to previous output)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    /// Id of the transaction whose output is being spent; empty for coinbase
    pub tx_out_id: String,
    /// Position in that transaction's outputs; block height for coinbase
    pub tx_out_index: u64,
    /// Hex signature over the spending transaction's id
    pub signature: String,
}

impl TransactionInput {
    /// The `(tx_out_id, tx_out_index)` pair this input consumes
    pub fn outpoint(&self) -> (String, u64) {
        (self.tx_out_id.clone(), self.tx_out_index)
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionOutput {
    /// Owner's public key
    pub address: String,
    /// Amount of coins
    pub amount: u64,
}

impl TransactionOutput {
    pub fn new(address: &str, amount: u64) -> Self {
        Self {
            address: address.to_string(),
            amount,
        }
    }
}

// =============================================================================
// UTXO
// =============================================================================

/// Unspent transaction output, derived from the ledger and never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnspentOutput {
    pub tx_out_id: String,
    pub tx_out_index: u64,
    pub address: String,
    pub amount: u64,
}

impl UnspentOutput {
    pub fn outpoint(&self) -> (String, u64) {
        (self.tx_out_id.clone(), self.tx_out_index)
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    /// Digest over inputs and outputs (signatures excluded)
    pub id: String,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
}

impl Transaction {
    /// Create a new transaction (unsigned) with its id computed
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        let mut tx = Self {
            id: String::new(),
            inputs,
            outputs,
        };
        tx.id = tx.calculate_id();
        tx
    }

    /// Create a coinbase (mining reward) transaction bound to `block_index`
    pub fn coinbase(address: &str, block_index: u64) -> Self {
        Self::minting(address, block_index, COINBASE_AMOUNT)
    }

    /// The transaction carried by the genesis block
    pub fn genesis(address: &str) -> Self {
        Self::minting(address, 0, GENESIS_AMOUNT)
    }

    fn minting(address: &str, tx_out_index: u64, amount: u64) -> Self {
        let input = TransactionInput {
            tx_out_id: String::new(),
            tx_out_index,
            signature: String::new(),
        };
        Self::new(vec![input], vec![TransactionOutput::new(address, amount)])
    }

    /// Recompute the id from the current inputs and outputs
    pub fn calculate_id(&self) -> String {
        let input_content: String = self
            .inputs
            .iter()
            .map(|input| format!("{}{}", input.tx_out_id, input.tx_out_index))
            .collect();
        let output_content: String = self
            .outputs
            .iter()
            .map(|output| format!("{}{}", output.address, output.amount))
            .collect();

        sha256_hex(format!("{}{}", input_content, output_content).as_bytes())
    }

    /// Whether the stored id matches the contents
    pub fn has_valid_id(&self) -> bool {
        self.calculate_id() == self.id
    }

    /// Sum of output amounts; `None` on overflow
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.amount))
    }

    /// Every `(tx_out_id, tx_out_index)` pair this transaction consumes
    pub fn outpoints(&self) -> impl Iterator<Item = (String, u64)> + '_ {
        self.inputs.iter().map(TransactionInput::outpoint)
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Unsigned input spending `utxo`
pub fn create_unsigned_input(utxo: &UnspentOutput) -> TransactionInput {
    TransactionInput {
        tx_out_id: utxo.tx_out_id.clone(),
        tx_out_index: utxo.tx_out_index,
        signature: String::new(),
    }
}

/// Payment output plus an optional change output back to the sender
pub fn create_outputs(
    receiver: &str,
    sender: &str,
    amount: u64,
    change_amount: u64,
) -> Vec<TransactionOutput> {
    let mut outputs = vec![TransactionOutput::new(receiver, amount)];
    if change_amount > 0 {
        outputs.push(TransactionOutput::new(sender, change_amount));
    }
    outputs
}

// =============================================================================
// Tests
// =============================================================================
