//! ECDSA key management for the ledger
//!
//! Provides key pair generation, signing, and verification using
//! the secp256k1 elliptic curve. A public key doubles as the account
//! address: it is carried around as the hex of its compressed encoding.

use rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use super::hash::sha256;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature encoding")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from raw private key bytes
    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        Self::from_private_key_bytes(&bytes)
    }

    /// Raw private key bytes
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// The account address owned by this key pair
    pub fn address(&self) -> String {
        self.public_key_hex()
    }

    /// Sign a message; returns the hex-encoded compact signature
    pub fn sign(&self, message: &[u8]) -> Result<String, KeyError> {
        sign_message(&self.secret_key, message)
    }
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// Sign `SHA-256(message)` with a secret key
pub fn sign_message(secret_key: &SecretKey, message: &[u8]) -> Result<String, KeyError> {
    let secp = Secp256k1::new();
    let digest = Message::from_digest_slice(&sha256(message))?;
    let signature = secp.sign_ecdsa(&digest, secret_key);
    Ok(hex::encode(signature.serialize_compact()))
}

/// Verify a hex signature over `SHA-256(message)` against a hex public key
///
/// Malformed keys or signatures are errors; a well-formed signature that
/// does not match yields `Ok(false)`.
pub fn verify_signature(
    message: &[u8],
    signature_hex: &str,
    public_key_hex: &str,
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let public_key = public_key_from_hex(public_key_hex)?;
    let bytes = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
    let signature = Signature::from_compact(&bytes).map_err(|_| KeyError::InvalidSignature)?;
    let digest = Message::from_digest_slice(&sha256(message))?;

    match secp.verify_ecdsa(&digest, &signature, &public_key) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert_eq!(kp.private_key_hex().len(), 64);
        // compressed point: 33 bytes
        assert_eq!(kp.public_key_hex().len(), 66);
        assert_eq!(kp.address(), kp.public_key_hex());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let message = b"Hello, ledger!";

        let signature = kp.sign(message).unwrap();
        assert!(verify_signature(message, &signature, &kp.address()).unwrap());
        assert!(!verify_signature(b"tampered", &signature, &kp.address()).unwrap());
    }

    #[test]
    fn test_verify_with_foreign_key_fails() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let signature = signer.sign(b"payload").unwrap();
        assert!(!verify_signature(b"payload", &signature, &other.address()).unwrap());
    }

    #[test]
    fn test_malformed_inputs_are_errors() {
        let kp = KeyPair::generate();
        assert!(verify_signature(b"m", "zz", &kp.address()).is_err());
        let signature = kp.sign(b"m").unwrap();
        assert!(verify_signature(b"m", &signature, "02abcd").is_err());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert!(KeyPair::from_private_key_hex("00").is_err());
    }
}
