//! Wallet implementation for the ledger
//!
//! Private keys never touch disk in the clear: each key pair is stored with
//! its private key sealed under a password-derived AES key. Building a
//! transaction decrypts the key only for the duration of the call.

use crate::core::{
    create_outputs, create_unsigned_input, select_inputs_for_amount, Transaction,
    TransactionError, UtxoSet,
};
use crate::crypto::cipher::{decode_hex, SALT_LEN};
use crate::crypto::{decrypt, derive_secret, encrypt, CipherError, KeyError, KeyPair};
use crate::storage::{KeyStore, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Cipher error: {0}")]
    CipherError(#[from] CipherError),
    #[error("Key error: {0}")]
    KeyError(#[from] KeyError),
    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
    #[error("Decrypted private key does not match public key {0}")]
    KeyMismatch(String),
    #[error("Wallet has no key pair")]
    NoKeyPair,
    #[error("Amount must be positive")]
    InvalidAmount,
}

impl WalletError {
    /// Whether the error means "wrong password" rather than bad data
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            WalletError::CipherError(CipherError::DecryptionAuthFailure)
        )
    }
}

/// A key pair whose private key is sealed under a password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedKeyPair {
    /// Hex compressed public key; also the address
    pub public_key: String,
    pub encrypted_private_key: String,
    pub initialization_vector: String,
    pub salt: String,
    pub auth_tag: String,
}

impl EncryptedKeyPair {
    /// Generate a fresh secp256k1 key pair and seal it under `password`
    pub fn generate(password: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::generate();
        Self::seal(&key_pair, password)
    }

    /// Seal an existing key pair under `password` with a fresh salt and IV
    pub fn seal(key_pair: &KeyPair, password: &str) -> Result<Self, WalletError> {
        let (secret, salt) = derive_secret(password, None);
        let sealed = encrypt(&key_pair.private_key_bytes(), &secret)?;

        Ok(Self {
            public_key: key_pair.public_key_hex(),
            encrypted_private_key: hex::encode(&sealed.ciphertext),
            initialization_vector: hex::encode(sealed.iv),
            salt: hex::encode(salt),
            auth_tag: hex::encode(sealed.tag),
        })
    }

    pub fn address(&self) -> &str {
        &self.public_key
    }

    /// Recover the signing key
    ///
    /// A wrong password surfaces as `CipherError::DecryptionAuthFailure`.
    pub fn decrypt_private_key(&self, password: &str) -> Result<KeyPair, WalletError> {
        let salt = decode_hex("salt", &self.salt)?;
        if salt.len() != SALT_LEN {
            return Err(CipherError::InvalidLength {
                field: "salt",
                len: salt.len(),
            }
            .into());
        }
        let ciphertext = decode_hex("encryptedPrivateKey", &self.encrypted_private_key)?;
        let iv = decode_hex("initializationVector", &self.initialization_vector)?;
        let tag = decode_hex("authTag", &self.auth_tag)?;

        let (secret, _) = derive_secret(password, Some(&salt));
        let private_key = decrypt(&ciphertext, &secret, &iv, &tag)?;

        let key_pair = KeyPair::from_private_key_bytes(&private_key)?;
        if key_pair.public_key_hex() != self.public_key {
            return Err(WalletError::KeyMismatch(self.public_key.clone()));
        }
        Ok(key_pair)
    }
}

/// A blockchain wallet for managing keys and creating transactions
pub struct Wallet {
    store: KeyStore,
    key_pairs: Vec<EncryptedKeyPair>,
}

impl Wallet {
    /// Open the wallet backed by `store`, creating its first key pair if it has none
    pub fn open(store: KeyStore, password: &str) -> Result<Self, WalletError> {
        let key_pairs = store.load()?;
        let mut wallet = Self { store, key_pairs };

        if wallet.key_pairs.is_empty() {
            wallet.generate_key_pair(password)?;
            log::info!("Created first key pair {}", wallet.address()?);
        }
        Ok(wallet)
    }

    /// Generate, append and persist a new key pair
    pub fn generate_key_pair(&mut self, password: &str) -> Result<&EncryptedKeyPair, WalletError> {
        let key_pair = EncryptedKeyPair::generate(password)?;
        self.key_pairs.push(key_pair);
        self.store.save(&self.key_pairs)?;

        self.key_pairs.last().ok_or(WalletError::NoKeyPair)
    }

    pub fn key_pairs(&self) -> &[EncryptedKeyPair] {
        &self.key_pairs
    }

    /// The key pair used for spending and receiving
    pub fn first_key_pair(&self) -> Option<&EncryptedKeyPair> {
        self.key_pairs.first()
    }

    /// Get the wallet's address
    pub fn address(&self) -> Result<String, WalletError> {
        self.first_key_pair()
            .map(|kp| kp.public_key.clone())
            .ok_or(WalletError::NoKeyPair)
    }

    /// Spendable balance of the first key pair
    pub fn balance(&self, utxo_set: &UtxoSet) -> u64 {
        self.first_key_pair()
            .map(|kp| utxo_set.balance(kp.address()))
            .unwrap_or(0)
    }

    /// Build and sign a payment of `amount` to `receiver`
    ///
    /// Inputs are picked greedily from the outputs the first key pair owns;
    /// any remainder comes back as a change output.
    pub fn create_transaction(
        &self,
        password: &str,
        receiver: &str,
        amount: u64,
        utxo_set: &UtxoSet,
    ) -> Result<Transaction, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount);
        }
        let sealed = self.first_key_pair().ok_or(WalletError::NoKeyPair)?;
        let key_pair = sealed.decrypt_private_key(password)?;
        let sender = key_pair.address();

        let owned = utxo_set.owned_by(&sender);
        let (selected, change) = select_inputs_for_amount(amount, &owned)?;

        let inputs = selected.iter().map(create_unsigned_input).collect();
        let outputs = create_outputs(receiver, &sender, amount, change);
        let mut tx = Transaction::new(inputs, outputs);

        sign_transaction(&mut tx, &key_pair, utxo_set)?;
        log::info!("Created transaction {} paying {} to {}", tx.id, amount, receiver);
        Ok(tx)
    }
}

/// Sign every input of `tx` with `key_pair`
///
/// Each referenced output must exist and be owned by the key.
pub fn sign_transaction(
    tx: &mut Transaction,
    key_pair: &KeyPair,
    utxo_set: &UtxoSet,
) -> Result<(), WalletError> {
    let address = key_pair.address();
    let signature = key_pair.sign(tx.id.as_bytes())?;

    for input in &mut tx.inputs {
        let referenced = utxo_set
            .get(&input.tx_out_id, input.tx_out_index)
            .ok_or_else(|| TransactionError::UnknownUtxoReference {
                tx_out_id: input.tx_out_id.clone(),
                tx_out_index: input.tx_out_index,
            })?;
        if referenced.address != address {
            return Err(WalletError::KeyMismatch(referenced.address.clone()));
        }
        input.signature = signature.clone();
    }
    Ok(())
}
