//! Storage module for ledger and key persistence

pub mod persistence;

pub use persistence::{BlockStore, KeyStore, StorageConfig, StorageError};
