//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors produced by envelope handling and the crypto primitives.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("could not parse versioned cipher: {0}")]
    Parse(String),

    #[error("could not decode {0} as base64")]
    Decode(&'static str),

    /// Authentication failure or malformed ciphertext. Deliberately carries
    /// no detail about which part failed.
    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("unknown {purpose} algorithm version {version}")]
    UnknownAlgorithm { purpose: &'static str, version: u32 },

    #[error("values did not match")]
    Mismatch,

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("cannot operate on empty {0}")]
    EmptyInput(&'static str),

    #[error("password must be at least {min} characters long")]
    WeakPassword { min: usize },

    #[error("RSA operation failed: {0}")]
    Rsa(String),

    #[error("invalid JSON web key: {0}")]
    Jwk(String),
}

impl From<rsa::Error> for CryptoError {
    fn from(e: rsa::Error) -> Self {
        CryptoError::Rsa(e.to_string())
    }
}
