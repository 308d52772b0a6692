//! Cryptographic utilities for the ledger
//!
//! This module provides:
//! - SHA-256 hashing and proof-of-work difficulty checks
//! - ECDSA key management (secp256k1)
//! - Password-derived AES-256-GCM sealing of private keys

pub mod cipher;
pub mod hash;
pub mod keys;

pub use cipher::{decrypt, derive_secret, encrypt, CipherError, Sealed, PBKDF2_ROUNDS};
pub use hash::{
    hex_meets_difficulty, is_digest_hex, leading_zero_bits, meets_difficulty, sha256, sha256_hex,
};
pub use keys::{public_key_from_hex, sign_message, verify_signature, KeyError, KeyPair};
