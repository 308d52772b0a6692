//! Ledger and key persistence layer
//!
//! Both stores are single JSON files. Writes go to a temporary file that is
//! then renamed over the target, so a crash never leaves a torn file behind.
//! A file that does not exist yet loads as an empty list.

use crate::core::Block;
use crate::wallet::EncryptedKeyPair;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub blocks_file: String,
    pub keys_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".ledger_data"),
            blocks_file: "blocks.json".to_string(),
            keys_file: "keys.json".to_string(),
        }
    }
}

impl StorageConfig {
    /// Default file names under `data_dir`
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Create the data directory and open both stores
    pub fn open(&self) -> Result<(BlockStore, KeyStore), StorageError> {
        fs::create_dir_all(&self.data_dir)?;
        Ok((
            BlockStore::new(self.data_dir.join(&self.blocks_file)),
            KeyStore::new(self.data_dir.join(&self.keys_file)),
        ))
    }
}

/// Persisted ledger
#[derive(Debug, Clone)]
pub struct BlockStore {
    path: PathBuf,
}

impl BlockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored blocks, checking each one's structure
    pub fn load(&self) -> Result<Vec<Block>, StorageError> {
        let blocks: Vec<Block> = load_list(&self.path)?;

        if let Some(bad) = blocks.iter().find(|block| !block.has_valid_structure()) {
            return Err(StorageError::InvalidData(format!(
                "block {} in {} is malformed",
                bad.index,
                self.path.display()
            )));
        }

        log::debug!("Loaded {} block(s) from {}", blocks.len(), self.path.display());
        Ok(blocks)
    }

    pub fn save(&self, blocks: &[Block]) -> Result<(), StorageError> {
        save_list(&self.path, blocks)
    }
}

/// Persisted encrypted key pairs
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<EncryptedKeyPair>, StorageError> {
        load_list(&self.path)
    }

    pub fn save(&self, keys: &[EncryptedKeyPair]) -> Result<(), StorageError> {
        save_list(&self.path, keys)
    }
}

fn load_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

fn save_list<T: Serialize>(path: &Path, items: &[T]) -> Result<(), StorageError> {
    // Write to temporary file first
    let temp_path = path.with_extension("tmp");
    let file = fs::File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);

    serde_json::to_writer_pretty(&mut writer, items)?;
    writer.flush()?;

    // Atomic rename
    fs::rename(&temp_path, path)?;
    Ok(())
}
