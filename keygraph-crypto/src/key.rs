//! Key material: random symmetric keys, Argon2id key derivation and the
//! versioned master key.

use crate::algorithm::{Algorithm, KdfProfile, Purpose};
use crate::envelope::CipherEnvelope;
use crate::error::{CryptoError, CryptoResult};
use crate::symmetric::{decrypt_with, encrypt_with};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of symmetric keys (AES-256).
pub const KEY_SIZE: usize = 32;
/// Size of KDF salts.
pub const SALT_SIZE: usize = 16;

/// 256-bit symmetric key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generates a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a key from unwrapped key material, checking its length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let mut bytes = STANDARD
            .decode(encoded)
            .map_err(|_| CryptoError::Decode("key"))?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        crate::constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SymmetricKey {}

/// Returns `size` bytes from the operating system's CSPRNG.
pub fn generate_random_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; size];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Returns `size` random bytes, base64 encoded.
pub fn generate_random_value(size: usize) -> String {
    STANDARD.encode(generate_random_bytes(size))
}

/// Issues a new KDF salt tagged with the current password profile.
pub fn new_salt() -> CipherEnvelope {
    CipherEnvelope::new(Algorithm::PASSWORD.version(), generate_random_bytes(SALT_SIZE))
}

/// Derives a symmetric key from `secret` using the Argon2id profile named by
/// the salt's algorithm tag.
pub fn derive_key(secret: &str, salt: &CipherEnvelope) -> CryptoResult<SymmetricKey> {
    let algo = Algorithm::decode(Purpose::Password, salt.algo_version)?;
    let profile = algo.kdf_profile().ok_or_else(|| {
        CryptoError::KeyDerivation(format!("{algo:?} salts cannot be used to derive keys"))
    })?;

    let mut out = [0u8; KEY_SIZE];
    argon2_into(secret.as_bytes(), &salt.ciphertext, profile, &mut out)?;
    Ok(SymmetricKey(out))
}

pub(crate) fn argon2_into(
    secret: &[u8],
    salt: &[u8],
    profile: KdfProfile,
    out: &mut [u8],
) -> CryptoResult<()> {
    let params = argon2::Params::new(
        profile.memory_kib,
        profile.time_cost,
        profile.lanes,
        Some(out.len()),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
        .hash_password_into(secret, salt, out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// The one shared secret a key-management process holds.
///
/// Serialized as `{1,<key version>} <base64 key>`. Ciphertexts produced by
/// the master key carry its version so a rotated key rejects them cleanly.
pub struct MasterKey {
    key: SymmetricKey,
    version: u32,
}

impl MasterKey {
    pub fn new(key: SymmetricKey, version: u32) -> Self {
        Self { key, version }
    }

    pub fn generate(version: u32) -> Self {
        Self::new(SymmetricKey::generate(), version)
    }

    /// Parses master key material in its serialized form.
    pub fn parse(encoded: &str) -> CryptoResult<Self> {
        let env = CipherEnvelope::parse(encoded.trim())?;
        match Algorithm::decode(Purpose::Symmetric, env.algo_version)? {
            Algorithm::AesGcm => {}
            other => {
                return Err(CryptoError::Parse(format!(
                    "{other:?} is not a master key algorithm"
                )));
            }
        }
        let version = env
            .key_version
            .ok_or_else(|| CryptoError::Parse("master key is missing its key version".into()))?;
        Ok(Self::new(SymmetricKey::from_slice(&env.ciphertext)?, version))
    }

    /// Serialized form accepted by [`MasterKey::parse`].
    pub fn encode(&self) -> String {
        CipherEnvelope::new(Algorithm::SYMMETRIC.version(), self.key.as_bytes().to_vec())
            .with_key_version(self.version)
            .marshal()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<CipherEnvelope> {
        Ok(encrypt_with(&self.key, plaintext)?.with_key_version(self.version))
    }

    /// Decrypts a ciphertext produced by this key. Envelopes tagged with a
    /// different key version fail like any other foreign ciphertext.
    pub fn decrypt(&self, envelope: &CipherEnvelope) -> CryptoResult<Vec<u8>> {
        if matches!(envelope.key_version, Some(v) if v != self.version) {
            return Err(CryptoError::Decryption);
        }
        decrypt_with(&self.key, envelope)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("version", &self.version)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
