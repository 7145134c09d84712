//! Closed set of algorithms an envelope's version tag can name.
//!
//! Version numbers are only unique per purpose: `1` means AES-GCM for a
//! symmetric ciphertext but Argon2id high-memory for a salt. Every consumer
//! decodes the tag through [`Algorithm::decode`] and matches exhaustively.

use crate::error::{CryptoError, CryptoResult};

/// What an envelope is used for, which determines how its tag is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Purpose {
    Symmetric,
    Asymmetric,
    Password,
    FastHash,
}

impl Purpose {
    fn name(self) -> &'static str {
        match self {
            Purpose::Symmetric => "symmetric",
            Purpose::Asymmetric => "asymmetric",
            Purpose::Password => "password",
            Purpose::FastHash => "fast hash",
        }
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfProfile {
    pub time_cost: u32,
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub lanes: u32,
}

impl KdfProfile {
    /// t=1, 64 MiB, 4 lanes.
    pub const HIGH_MEMORY: KdfProfile = KdfProfile {
        time_cost: 1,
        memory_kib: 64 * 1024,
        lanes: 4,
    };

    /// t=4, 16 MiB, 4 lanes. Issued for every new salt and hash.
    pub const DEFAULT: KdfProfile = KdfProfile {
        time_cost: 4,
        memory_kib: 16 * 1024,
        lanes: 4,
    };

    /// The default cost with one lane per CPU of the verifying host. Values
    /// issued under it only verify on a host with the same lane count, which
    /// can be pinned through [`LANES_OVERRIDE_ENV`].
    pub fn cpu_bound() -> KdfProfile {
        let lanes = cpu_bound_lanes(std::env::var(LANES_OVERRIDE_ENV).ok().as_deref());
        KdfProfile {
            lanes,
            ..KdfProfile::DEFAULT
        }
    }
}

/// Lane count used for tag 2 values when set, in place of the CPU count.
pub const LANES_OVERRIDE_ENV: &str = "KEYGRAPH_ARGON_LANES_OVERRIDE";

fn cpu_bound_lanes(override_value: Option<&str>) -> u32 {
    if let Some(lanes) = override_value
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
    {
        return lanes;
    }
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Algorithm {
    AesGcm,
    RsaOaep,
    /// Verification only; never produced for new values.
    LegacyBcrypt,
    Argon2HighMemory,
    /// Verification only; lanes depend on the host.
    Argon2CpuBound,
    Argon2Default,
    Sha256,
}

impl Algorithm {
    /// Tag written for new symmetric ciphertexts.
    pub const SYMMETRIC: Algorithm = Algorithm::AesGcm;
    /// Tag written for new asymmetric ciphertexts.
    pub const ASYMMETRIC: Algorithm = Algorithm::RsaOaep;
    /// Tag written for new salts and password hashes.
    pub const PASSWORD: Algorithm = Algorithm::Argon2Default;
    /// Tag written for new fast-hash salts.
    pub const FAST_HASH: Algorithm = Algorithm::Sha256;

    /// Resolves an envelope tag for the given purpose.
    pub fn decode(purpose: Purpose, version: u32) -> CryptoResult<Algorithm> {
        match (purpose, version) {
            (Purpose::Symmetric, 1) => Ok(Algorithm::AesGcm),
            (Purpose::Asymmetric, 1) => Ok(Algorithm::RsaOaep),
            (Purpose::Password, 0) => Ok(Algorithm::LegacyBcrypt),
            (Purpose::Password, 1) => Ok(Algorithm::Argon2HighMemory),
            (Purpose::Password, 2) => Ok(Algorithm::Argon2CpuBound),
            (Purpose::Password, 3) => Ok(Algorithm::Argon2Default),
            (Purpose::FastHash, 1) => Ok(Algorithm::Sha256),
            _ => Err(CryptoError::UnknownAlgorithm {
                purpose: purpose.name(),
                version,
            }),
        }
    }

    /// The tag this algorithm is stored under.
    pub fn version(self) -> u32 {
        match self {
            Algorithm::AesGcm => 1,
            Algorithm::RsaOaep => 1,
            Algorithm::LegacyBcrypt => 0,
            Algorithm::Argon2HighMemory => 1,
            Algorithm::Argon2CpuBound => 2,
            Algorithm::Argon2Default => 3,
            Algorithm::Sha256 => 1,
        }
    }

    /// Argon2 cost parameters, for the KDF variants.
    pub fn kdf_profile(self) -> Option<KdfProfile> {
        match self {
            Algorithm::Argon2HighMemory => Some(KdfProfile::HIGH_MEMORY),
            Algorithm::Argon2CpuBound => Some(KdfProfile::cpu_bound()),
            Algorithm::Argon2Default => Some(KdfProfile::DEFAULT),
            Algorithm::AesGcm
            | Algorithm::RsaOaep
            | Algorithm::LegacyBcrypt
            | Algorithm::Sha256 => None,
        }
    }
}
