//! Crypto layer for keygraph.
//!
//! Provides the primitives the account key graph is built from:
//! - [`CipherEnvelope`], the self-describing text form every ciphertext,
//!   salt and hash is persisted in
//! - Argon2id key derivation with versioned cost profiles
//! - AES-256-GCM for wrapping keys and data
//! - RSA-OAEP account keypairs exchanged as JSON Web Keys
//! - Memory-hard and fast salted hashing
//!
//! # Versioning
//!
//! Each envelope carries an algorithm tag. Tags are resolved through the
//! closed [`Algorithm`] enum for a given [`Purpose`], so an unknown tag is
//! always a typed error and never a silent fallback. New values are always
//! written with the current algorithm; older tags stay readable.

mod algorithm;
mod asymmetric;
pub mod envelope;
mod error;
mod key;
mod password;
mod symmetric;

pub use algorithm::{Algorithm, KdfProfile, LANES_OVERRIDE_ENV, Purpose};
pub use asymmetric::{
    decrypt_asymmetric_with, encrypt_asymmetric_with, generate_rsa_keypair,
    private_key_pem_to_jwk, RsaJwk, RsaKeyPair, DEFAULT_RSA_KEY_BITS,
};
pub use envelope::CipherEnvelope;
pub use error::{CryptoError, CryptoResult};
pub use key::{
    derive_key, generate_random_bytes, generate_random_value, new_salt, MasterKey, SymmetricKey,
    KEY_SIZE, SALT_SIZE,
};
pub use password::{
    compare_string, constant_time_eq, hash_fast, hash_string, new_fast_salt, validate_password,
    HASH_SIZE, MIN_PASSWORD_LENGTH,
};
pub use symmetric::{decrypt_with, encrypt_with, NONCE_SIZE};
