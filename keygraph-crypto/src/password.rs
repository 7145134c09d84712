//! Password and identifier hashing.
//!
//! `hash_string` is memory-hard and used for passwords and email addresses.
//! `hash_fast` is a plain salted SHA-256, used where a value has to be hashed
//! against many salts at once (pseudonymous end-user identifiers).

use crate::algorithm::{Algorithm, Purpose};
use crate::envelope::CipherEnvelope;
use crate::error::{CryptoError, CryptoResult};
use crate::key::{SALT_SIZE, argon2_into, generate_random_bytes};
use sha2::{Digest, Sha256};

/// Size of memory-hard hashes.
pub const HASH_SIZE: usize = 32;

/// Shortest password accepted for new credentials.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Checks a new password against the length policy. Length is counted in
/// characters, not bytes.
pub fn validate_password(password: &str) -> CryptoResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(CryptoError::WeakPassword {
            min: MIN_PASSWORD_LENGTH,
        });
    }
    Ok(())
}

/// Hashes `secret` under the current password profile with a random salt.
/// The salt is stored as the envelope's nonce.
pub fn hash_string(secret: &str) -> CryptoResult<CipherEnvelope> {
    if secret.is_empty() {
        return Err(CryptoError::EmptyInput("secret"));
    }
    let algo = Algorithm::PASSWORD;
    let profile = algo
        .kdf_profile()
        .ok_or_else(|| CryptoError::KeyDerivation(format!("{algo:?} has no cost profile")))?;

    let salt = generate_random_bytes(SALT_SIZE);
    let mut hash = vec![0u8; HASH_SIZE];
    argon2_into(secret.as_bytes(), &salt, profile, &mut hash)?;
    Ok(CipherEnvelope::new(algo.version(), hash).with_nonce(salt))
}

/// Checks `secret` against a hash produced by [`hash_string`] or a legacy
/// bcrypt hash. Returns [`CryptoError::Mismatch`] on any difference.
pub fn compare_string(secret: &str, hashed: &CipherEnvelope) -> CryptoResult<()> {
    let algo = Algorithm::decode(Purpose::Password, hashed.algo_version)?;
    match algo {
        Algorithm::Argon2HighMemory | Algorithm::Argon2CpuBound | Algorithm::Argon2Default => {
            let (Some(profile), Some(salt)) = (algo.kdf_profile(), hashed.nonce.as_deref()) else {
                return Err(CryptoError::Mismatch);
            };
            if hashed.ciphertext.is_empty() {
                return Err(CryptoError::Mismatch);
            }
            let mut candidate = vec![0u8; hashed.ciphertext.len()];
            argon2_into(secret.as_bytes(), salt, profile, &mut candidate)?;
            if constant_time_eq(&candidate, &hashed.ciphertext) {
                Ok(())
            } else {
                Err(CryptoError::Mismatch)
            }
        }
        Algorithm::LegacyBcrypt => {
            let stored = std::str::from_utf8(&hashed.ciphertext).map_err(|_| CryptoError::Mismatch)?;
            match bcrypt::verify(secret, stored) {
                Ok(true) => Ok(()),
                Ok(false) | Err(_) => Err(CryptoError::Mismatch),
            }
        }
        Algorithm::AesGcm | Algorithm::RsaOaep | Algorithm::Sha256 => {
            Err(CryptoError::UnknownAlgorithm {
                purpose: "password",
                version: hashed.algo_version,
            })
        }
    }
}

/// Issues a salt for [`hash_fast`].
pub fn new_fast_salt() -> CipherEnvelope {
    CipherEnvelope::new(Algorithm::FAST_HASH.version(), generate_random_bytes(SALT_SIZE))
}

/// Salted SHA-256 of `value`, hex encoded. Deterministic per salt.
pub fn hash_fast(value: &str, salt: &CipherEnvelope) -> CryptoResult<String> {
    match Algorithm::decode(Purpose::FastHash, salt.algo_version)? {
        Algorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(value.as_bytes());
            hasher.update(&salt.ciphertext);
            Ok(hex::encode(hasher.finalize()))
        }
        _ => Err(CryptoError::UnknownAlgorithm {
            purpose: "fast hash",
            version: salt.algo_version,
        }),
    }
}

/// Constant-time byte comparison. Length is not treated as secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_policy() {
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("ünïcödé").is_err());
        assert!(matches!(
            validate_password("short"),
            Err(CryptoError::WeakPassword { min: 8 })
        ));
    }

    #[test]
    fn hash_and_compare() {
        let hashed = hash_string("correct-password").unwrap();
        assert_eq!(hashed.algo_version, Algorithm::PASSWORD.version());
        assert_eq!(hashed.ciphertext.len(), HASH_SIZE);
        assert!(compare_string("correct-password", &hashed).is_ok());
        assert!(matches!(
            compare_string("wrong", &hashed),
            Err(CryptoError::Mismatch)
        ));
    }

    fn pinned_argon2(secret: &str, salt: &[u8], lanes: u32, len: usize) -> Vec<u8> {
        let params = argon2::Params::new(16 * 1024, 4, lanes, Some(len)).unwrap();
        let mut out = vec![0u8; len];
        argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
            .hash_password_into(secret.as_bytes(), salt, &mut out)
            .unwrap();
        out
    }

    #[test]
    fn default_hashes_verify_on_any_host() {
        let salt = generate_random_bytes(SALT_SIZE);
        let hash = pinned_argon2("correct-password", &salt, 4, HASH_SIZE);
        let env = CipherEnvelope::new(3, hash).with_nonce(salt);
        assert!(compare_string("correct-password", &env).is_ok());
        assert!(matches!(
            compare_string("wrong-password", &env),
            Err(CryptoError::Mismatch)
        ));
    }

    #[test]
    fn cpu_bound_hashes_still_verify() {
        let lanes = crate::algorithm::KdfProfile::cpu_bound().lanes;
        let salt = generate_random_bytes(SALT_SIZE);
        let hash = pinned_argon2("correct-password", &salt, lanes, HASH_SIZE);
        let env = CipherEnvelope::new(2, hash).with_nonce(salt);
        assert!(compare_string("correct-password", &env).is_ok());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_string("same").unwrap();
        let b = hash_string("same").unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(hash_string(""), Err(CryptoError::EmptyInput(_))));
    }

    #[test]
    fn unknown_version_is_configuration_error() {
        let mut hashed = hash_string("pw").unwrap();
        hashed.algo_version = 17;
        assert!(matches!(
            compare_string("pw", &hashed),
            Err(CryptoError::UnknownAlgorithm { .. })
        ));
    }

    #[test]
    fn legacy_bcrypt_hashes_verify() {
        let legacy = bcrypt::hash("old-password", 4).unwrap();
        let env = CipherEnvelope::new(0, legacy.into_bytes());
        assert!(compare_string("old-password", &env).is_ok());
        assert!(matches!(
            compare_string("new-password", &env),
            Err(CryptoError::Mismatch)
        ));
    }

    #[test]
    fn fast_hash_is_deterministic_per_salt() {
        let salt = new_fast_salt();
        let a = hash_fast("user-1", &salt).unwrap();
        assert_eq!(a, hash_fast("user-1", &salt).unwrap());
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_fast("user-1", &new_fast_salt()).unwrap());
        assert_ne!(a, hash_fast("user-2", &salt).unwrap());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
