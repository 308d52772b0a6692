//! Password-based protection of private keys
//!
//! A password is stretched with PBKDF2-HMAC-SHA512 into a 256-bit secret,
//! which then seals the key material with AES-256-GCM.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha512;
use thiserror::Error;

/// PBKDF2 iteration count
pub const PBKDF2_ROUNDS: u32 = 10_000;

/// Derived secret length in bytes (AES-256 key)
pub const SECRET_LEN: usize = 32;

/// Random salt length in bytes
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Symmetric encryption errors
#[derive(Error, Debug)]
pub enum CipherError {
    /// The tag did not authenticate: wrong password or tampered ciphertext
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionAuthFailure,
    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("Invalid {field} length: {len} bytes")]
    InvalidLength { field: &'static str, len: usize },
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Encryption failed")]
    EncryptionFailed,
}

/// Output of [`encrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Stretch `password` into an AES key
///
/// A fresh random salt is generated when none is supplied; the salt that was
/// used is always returned alongside the secret.
pub fn derive_secret(password: &str, salt: Option<&[u8]>) -> ([u8; SECRET_LEN], Vec<u8>) {
    let salt = match salt {
        Some(salt) => salt.to_vec(),
        None => {
            let mut fresh = vec![0u8; SALT_LEN];
            OsRng.fill_bytes(&mut fresh);
            fresh
        }
    };

    let mut secret = [0u8; SECRET_LEN];
    pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), &salt, PBKDF2_ROUNDS, &mut secret);
    (secret, salt)
}

/// Encrypt under a random 12-byte IV
pub fn encrypt(plaintext: &[u8], secret: &[u8]) -> Result<Sealed, CipherError> {
    let cipher = Aes256Gcm::new_from_slice(secret)
        .map_err(|_| CipherError::InvalidKeyLength(secret.len()))?;

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;

    // aes-gcm appends the tag to the ciphertext
    let split = ciphertext.len() - TAG_LEN;
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&ciphertext[split..]);
    ciphertext.truncate(split);

    Ok(Sealed {
        ciphertext,
        iv,
        tag,
    })
}

/// Decrypt and authenticate
pub fn decrypt(
    ciphertext: &[u8],
    secret: &[u8],
    iv: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, CipherError> {
    if iv.len() != IV_LEN {
        return Err(CipherError::InvalidLength {
            field: "iv",
            len: iv.len(),
        });
    }
    if tag.len() != TAG_LEN {
        return Err(CipherError::InvalidLength {
            field: "tag",
            len: tag.len(),
        });
    }

    let cipher = Aes256Gcm::new_from_slice(secret)
        .map_err(|_| CipherError::InvalidKeyLength(secret.len()))?;

    let mut payload = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    payload.extend_from_slice(ciphertext);
    payload.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(iv), payload.as_slice())
        .map_err(|_| CipherError::DecryptionAuthFailure)
}

/// Decode a hex field, reporting which field was malformed
pub fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, CipherError> {
    hex::decode(value).map_err(|e| CipherError::Encoding(format!("{}: {}", field, e)))
}
