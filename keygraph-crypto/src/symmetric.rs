//! AES-256-GCM authenticated encryption into envelopes.

use crate::algorithm::{Algorithm, Purpose};
use crate::envelope::CipherEnvelope;
use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

/// Size of the AES-GCM nonce (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt_with(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<CipherEnvelope> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(CipherEnvelope::new(Algorithm::SYMMETRIC.version(), ciphertext).with_nonce(nonce.to_vec()))
}

/// Decrypts an envelope produced by [`encrypt_with`].
///
/// A wrong key, a tampered ciphertext and a malformed nonce all surface as the
/// same [`CryptoError::Decryption`]. An unknown algorithm tag is reported as
/// [`CryptoError::UnknownAlgorithm`].
pub fn decrypt_with(key: &SymmetricKey, envelope: &CipherEnvelope) -> CryptoResult<Vec<u8>> {
    match Algorithm::decode(Purpose::Symmetric, envelope.algo_version)? {
        Algorithm::AesGcm => {
            let nonce = match envelope.nonce.as_deref() {
                Some(n) if n.len() == NONCE_SIZE => Nonce::from_slice(n),
                _ => return Err(CryptoError::Decryption),
            };
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
            cipher
                .decrypt(nonce, envelope.ciphertext.as_ref())
                .map_err(|_| CryptoError::Decryption)
        }
        other => Err(CryptoError::UnknownAlgorithm {
            purpose: "symmetric",
            version: other.version(),
        }),
    }
}
