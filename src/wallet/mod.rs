//! Wallet module for key and transaction management

pub mod wallet;

pub use wallet::{sign_transaction, EncryptedKeyPair, Wallet, WalletError};
