//! Unspent-output accounting and transaction validation
//!
//! The UTXO set is a pure projection of the ledger: it is rebuilt by replaying
//! every block in order and is never patched in place by callers. Every
//! consumer either rebuilds it or receives a freshly derived snapshot.

use crate::core::block::Block;
use crate::core::transaction::{
    Transaction, TransactionError, TransactionInput, UnspentOutput, COINBASE_AMOUNT,
};
use crate::crypto::verify_signature;
use std::collections::{BTreeMap, HashSet};

type OutPoint = (String, u64);

/// Set of spendable outputs keyed by `(tx_out_id, tx_out_index)`
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    entries: BTreeMap<OutPoint, UnspentOutput>,
    /// Inputs that referenced nothing while replaying (coinbase inputs excluded)
    missed_spends: usize,
}

impl PartialEq for UtxoSet {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for UtxoSet {}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the set by replaying `blocks` block-by-block, transaction-by-transaction
    pub fn build(blocks: &[Block]) -> Self {
        let mut set = Self::new();
        for block in blocks {
            for tx in &block.data {
                set.apply(tx);
            }
        }
        if set.missed_spends > 0 {
            log::warn!(
                "UTXO replay skipped {} input(s) referencing unknown outputs",
                set.missed_spends
            );
        }
        set
    }

    /// Add the outputs of `tx`, then drop whatever its inputs reference
    fn apply(&mut self, tx: &Transaction) {
        for (index, output) in tx.outputs.iter().enumerate() {
            let utxo = UnspentOutput {
                tx_out_id: tx.id.clone(),
                tx_out_index: index as u64,
                address: output.address.clone(),
                amount: output.amount,
            };
            self.entries.insert(utxo.outpoint(), utxo);
        }

        for input in &tx.inputs {
            // Removing a missing entry is tolerated, only counted
            if self.entries.remove(&input.outpoint()).is_none() && !input.tx_out_id.is_empty() {
                self.missed_spends += 1;
                log::warn!(
                    "Input {}:{} of {} spends no known output",
                    input.tx_out_id,
                    input.tx_out_index,
                    tx.id
                );
            }
        }
    }

    /// A new set with `new_txs` applied: consumed inputs removed, new outputs added
    pub fn updated(&self, new_txs: &[Transaction]) -> Self {
        let consumed: HashSet<OutPoint> = new_txs.iter().flat_map(Transaction::outpoints).collect();

        let mut entries: BTreeMap<OutPoint, UnspentOutput> = self
            .entries
            .iter()
            .filter(|(key, _)| !consumed.contains(*key))
            .map(|(key, utxo)| (key.clone(), utxo.clone()))
            .collect();

        for tx in new_txs {
            for (index, output) in tx.outputs.iter().enumerate() {
                let utxo = UnspentOutput {
                    tx_out_id: tx.id.clone(),
                    tx_out_index: index as u64,
                    address: output.address.clone(),
                    amount: output.amount,
                };
                entries.insert(utxo.outpoint(), utxo);
            }
        }

        Self {
            entries,
            missed_spends: self.missed_spends,
        }
    }

    pub fn get(&self, tx_out_id: &str, tx_out_index: u64) -> Option<&UnspentOutput> {
        self.entries.get(&(tx_out_id.to_string(), tx_out_index))
    }

    /// Whether `input` resolves to a spendable output
    pub fn resolves(&self, input: &TransactionInput) -> bool {
        self.entries.contains_key(&input.outpoint())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of lenient no-op removals seen while replaying
    pub fn missed_spends(&self) -> usize {
        self.missed_spends
    }

    /// Outputs owned by `address`, in key order
    pub fn owned_by(&self, address: &str) -> Vec<UnspentOutput> {
        self.entries
            .values()
            .filter(|utxo| utxo.address == address)
            .cloned()
            .collect()
    }

    /// Spendable balance of `address`
    pub fn balance(&self, address: &str) -> u64 {
        self.entries
            .values()
            .filter(|utxo| utxo.address == address)
            .map(|utxo| utxo.amount)
            .sum()
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate an ordinary transaction against a UTXO snapshot
///
/// Checks id integrity, that every input resolves and carries a valid
/// signature by the owner of the referenced output, and that input and
/// output sums are exactly equal.
pub fn validate_transaction(tx: &Transaction, utxo_set: &UtxoSet) -> Result<(), TransactionError> {
    if !tx.has_valid_id() {
        return Err(TransactionError::InvalidTransactionId(tx.id.clone()));
    }
    if tx.inputs.is_empty() {
        return Err(TransactionError::MissingInputs(tx.id.clone()));
    }

    let mut total_in = 0u64;
    for (index, input) in tx.inputs.iter().enumerate() {
        let referenced = utxo_set
            .get(&input.tx_out_id, input.tx_out_index)
            .ok_or_else(|| TransactionError::UnknownUtxoReference {
                tx_out_id: input.tx_out_id.clone(),
                tx_out_index: input.tx_out_index,
            })?;

        let signed = verify_signature(tx.id.as_bytes(), &input.signature, &referenced.address)
            .unwrap_or(false);
        if !signed {
            return Err(TransactionError::InvalidSignature {
                tx_id: tx.id.clone(),
                input: index,
            });
        }

        total_in = total_in.saturating_add(referenced.amount);
    }

    let total_out = tx.total_output().unwrap_or(u64::MAX);
    if total_in != total_out || tx.outputs.iter().any(|output| output.amount == 0) {
        return Err(TransactionError::AmountMismatch {
            tx_id: tx.id.clone(),
            inputs: total_in,
            outputs: total_out,
        });
    }

    Ok(())
}

/// Validate the reward transaction of the block at height `block_index`
pub fn validate_coinbase(tx: &Transaction, block_index: u64) -> Result<(), TransactionError> {
    if !tx.has_valid_id() {
        return Err(TransactionError::InvalidTransactionId(tx.id.clone()));
    }
    if tx.inputs.len() != 1 {
        return Err(TransactionError::InvalidCoinbase(format!(
            "expected exactly one input, got {}",
            tx.inputs.len()
        )));
    }
    let input = &tx.inputs[0];
    if !input.tx_out_id.is_empty() {
        return Err(TransactionError::InvalidCoinbase(
            "input must not reference an output".to_string(),
        ));
    }
    if input.tx_out_index != block_index {
        return Err(TransactionError::InvalidCoinbase(format!(
            "input index {} does not match block height {}",
            input.tx_out_index, block_index
        )));
    }
    if tx.outputs.len() != 1 {
        return Err(TransactionError::InvalidCoinbase(format!(
            "expected exactly one output, got {}",
            tx.outputs.len()
        )));
    }
    if tx.outputs[0].amount != COINBASE_AMOUNT {
        return Err(TransactionError::InvalidCoinbase(format!(
            "reward must be {}, got {}",
            COINBASE_AMOUNT, tx.outputs[0].amount
        )));
    }
    Ok(())
}

/// Validate the full transaction list of a block
///
/// The first transaction must be the coinbase; no `(tx_out_id, tx_out_index)`
/// pair may appear twice anywhere in the block; the rest must be valid
/// against `utxo_set`.
pub fn validate_block_transactions(
    txs: &[Transaction],
    utxo_set: &UtxoSet,
    block_index: u64,
) -> Result<(), TransactionError> {
    let coinbase = txs
        .first()
        .ok_or_else(|| TransactionError::InvalidCoinbase("block has no transactions".into()))?;
    validate_coinbase(coinbase, block_index)?;

    let mut seen = HashSet::new();
    for (tx_out_id, tx_out_index) in txs.iter().flat_map(Transaction::outpoints) {
        if !seen.insert((tx_out_id.clone(), tx_out_index)) {
            return Err(TransactionError::DuplicateInput {
                tx_out_id,
                tx_out_index,
            });
        }
    }

    for tx in &txs[1..] {
        validate_transaction(tx, utxo_set)?;
    }
    Ok(())
}

/// Replay `blocks`, validating every non-genesis block's transactions
/// against the set derived from its predecessors
pub fn validate_chain_transactions(blocks: &[Block]) -> Result<UtxoSet, TransactionError> {
    let mut set = UtxoSet::new();
    for (position, block) in blocks.iter().enumerate() {
        if position > 0 {
            validate_block_transactions(&block.data, &set, block.index)?;
        }
        for tx in &block.data {
            set.apply(tx);
        }
    }
    Ok(set)
}

// =============================================================================
// Input selection
// =============================================================================

/// Greedily accumulate `owned` until `amount` is covered
///
/// Returns the selected outputs and the leftover (change) amount.
pub fn select_inputs_for_amount(
    amount: u64,
    owned: &[UnspentOutput],
) -> Result<(Vec<UnspentOutput>, u64), TransactionError> {
    let mut selected = Vec::new();
    let mut current = 0u64;

    for utxo in owned {
        selected.push(utxo.clone());
        current = current.saturating_add(utxo.amount);
        if current >= amount {
            return Ok((selected, current - amount));
        }
    }

    Err(TransactionError::InsufficientFunds {
        have: current,
        need: amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::Block;
    use crate::core::transaction::{create_outputs, create_unsigned_input, GENESIS_AMOUNT};
    use crate::crypto::KeyPair;

    fn genesis_for(key: &KeyPair) -> Block {
        Block::genesis(&key.address())
    }

    /// Spend `utxos` owned by `key`, paying `amount` to `receiver`
    fn spend(key: &KeyPair, utxos: &[UnspentOutput], receiver: &str, amount: u64) -> Transaction {
        let total: u64 = utxos.iter().map(|u| u.amount).sum();
        let inputs = utxos.iter().map(create_unsigned_input).collect();
        let outputs = create_outputs(receiver, &key.address(), amount, total - amount);
        let mut tx = Transaction::new(inputs, outputs);
        let signature = key.sign(tx.id.as_bytes()).unwrap();
        for input in &mut tx.inputs {
            input.signature = signature.clone();
        }
        tx
    }

    #[test]
    fn test_build_from_genesis() {
        let key = KeyPair::generate();
        let set = UtxoSet::build(&[genesis_for(&key)]);

        assert_eq!(set.len(), 1);
        assert_eq!(set.balance(&key.address()), GENESIS_AMOUNT);
        assert_eq!(set.missed_spends(), 0);
    }

    #[test]
    fn test_valid_spend() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let set = UtxoSet::build(&[genesis_for(&alice)]);

        let tx = spend(&alice, &set.owned_by(&alice.address()), &bob.address(), 30);
        assert!(validate_transaction(&tx, &set).is_ok());
    }

    #[test]
    fn test_amount_mismatch_by_one_unit() {
        let alice = KeyPair::generate();
        let set = UtxoSet::build(&[genesis_for(&alice)]);
        let owned = set.owned_by(&alice.address());

        let mut tx = spend(&alice, &owned, "bob", 30);
        tx.outputs[1].amount += 1;
        tx.id = tx.calculate_id();
        let signature = alice.sign(tx.id.as_bytes()).unwrap();
        tx.inputs[0].signature = signature;

        assert!(matches!(
            validate_transaction(&tx, &set),
            Err(TransactionError::AmountMismatch { inputs: 100, outputs: 101, .. })
        ));
    }

    #[test]
    fn test_forged_signature_rejected() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let set = UtxoSet::build(&[genesis_for(&alice)]);

        // Mallory signs a spend of Alice's output
        let tx = spend(&mallory, &set.owned_by(&alice.address()), "mallory", 100);
        assert!(matches!(
            validate_transaction(&tx, &set),
            Err(TransactionError::InvalidSignature { input: 0, .. })
        ));
    }

    #[test]
    fn test_tampered_id_rejected() {
        let alice = KeyPair::generate();
        let set = UtxoSet::build(&[genesis_for(&alice)]);
        let mut tx = spend(&alice, &set.owned_by(&alice.address()), "bob", 100);
        tx.outputs[0].address = "mallory".to_string();

        assert!(matches!(
            validate_transaction(&tx, &set),
            Err(TransactionError::InvalidTransactionId(_))
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let alice = KeyPair::generate();
        let phantom = UnspentOutput {
            tx_out_id: "ff".repeat(32),
            tx_out_index: 0,
            address: alice.address(),
            amount: 5,
        };
        let tx = spend(&alice, &[phantom], "bob", 5);

        assert!(matches!(
            validate_transaction(&tx, &UtxoSet::new()),
            Err(TransactionError::UnknownUtxoReference { .. })
        ));
    }

    #[test]
    fn test_coinbase_rules() {
        assert!(validate_coinbase(&Transaction::coinbase("m", 4), 4).is_ok());
        // replayed from another height
        assert!(validate_coinbase(&Transaction::coinbase("m", 3), 4).is_err());

        let mut rich = Transaction::coinbase("m", 4);
        rich.outputs[0].amount = COINBASE_AMOUNT + 1;
        rich.id = rich.calculate_id();
        assert!(matches!(
            validate_coinbase(&rich, 4),
            Err(TransactionError::InvalidCoinbase(_))
        ));
    }

    #[test]
    fn test_double_spend_within_block_rejected() {
        let alice = KeyPair::generate();
        let set = UtxoSet::build(&[genesis_for(&alice)]);
        let owned = set.owned_by(&alice.address());

        let first = spend(&alice, &owned, "bob", 40);
        let second = spend(&alice, &owned, "carol", 60);
        assert!(validate_transaction(&first, &set).is_ok());
        assert!(validate_transaction(&second, &set).is_ok());

        let txs = vec![Transaction::coinbase("miner", 1), first, second];
        assert!(matches!(
            validate_block_transactions(&txs, &set, 1),
            Err(TransactionError::DuplicateInput { .. })
        ));
    }

    #[test]
    fn test_block_needs_coinbase_first() {
        let set = UtxoSet::new();
        assert!(validate_block_transactions(&[], &set, 1).is_err());
        assert!(validate_block_transactions(&[Transaction::coinbase("m", 1)], &set, 1).is_ok());
    }

    #[test]
    fn test_updated_matches_rebuild() {
        let alice = KeyPair::generate();
        let genesis = genesis_for(&alice);
        let set = UtxoSet::build(std::slice::from_ref(&genesis));

        let tx = spend(&alice, &set.owned_by(&alice.address()), "bob", 30);
        let txs = vec![Transaction::coinbase("miner", 1), tx];
        let next = Block::mine(1, &genesis.hash, genesis.timestamp + 1, txs.clone(), 1, None)
            .unwrap();

        let incremental = set.updated(&txs);
        let rebuilt = UtxoSet::build(&[genesis, next]);
        assert_eq!(incremental, rebuilt);
        assert_eq!(rebuilt.balance("bob"), 30);
        assert_eq!(rebuilt.balance(&alice.address()), 70);
        assert_eq!(rebuilt.balance("miner"), COINBASE_AMOUNT);
        // the input set is untouched
        assert_eq!(set.balance(&alice.address()), GENESIS_AMOUNT);
    }

    #[test]
    fn test_missing_spend_is_counted_not_fatal() {
        let genesis = Block::genesis("someone");
        let orphan_spend = Transaction::new(
            vec![TransactionInput {
                tx_out_id: "ab".repeat(32),
                tx_out_index: 9,
                signature: String::new(),
            }],
            vec![],
        );
        let block = Block::mine(
            1,
            &genesis.hash,
            genesis.timestamp + 1,
            vec![Transaction::coinbase("m", 1), orphan_spend],
            1,
            None,
        )
        .unwrap();

        let set = UtxoSet::build(&[genesis, block]);
        assert_eq!(set.missed_spends(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_select_inputs_for_amount() {
        let utxo = |id: &str, amount| UnspentOutput {
            tx_out_id: id.to_string(),
            tx_out_index: 0,
            address: "me".to_string(),
            amount,
        };
        let owned = vec![utxo("a", 10), utxo("b", 25), utxo("c", 40)];

        let (selected, change) = select_inputs_for_amount(30, &owned).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(change, 5);

        let (selected, change) = select_inputs_for_amount(10, &owned).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(change, 0);

        assert!(matches!(
            select_inputs_for_amount(100, &owned),
            Err(TransactionError::InsufficientFunds { have: 75, need: 100 })
        ));
    }

    #[test]
    fn test_chain_replay_rejects_bad_block() {
        let alice = KeyPair::generate();
        let genesis = genesis_for(&alice);
        let mut forged = Transaction::coinbase("m", 1);
        forged.outputs[0].amount = 1_000;
        forged.id = forged.calculate_id();
        let block = Block::mine(1, &genesis.hash, genesis.timestamp + 1, vec![forged], 1, None)
            .unwrap();

        assert!(validate_chain_transactions(&[genesis.clone()]).is_ok());
        assert!(validate_chain_transactions(&[genesis, block]).is_err());
    }
}
