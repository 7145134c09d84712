//! Key graph configuration.

use keygraph_crypto::DEFAULT_RSA_KEY_BITS;
use serde::{Deserialize, Serialize};

/// Configuration for [`crate::KeyGraph`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyGraphConfig {
    /// Modulus size for newly created account keypairs.
    pub rsa_key_bits: usize,

    /// Upper bound on concurrently running hash comparisons during
    /// scatter/gather scans.
    pub max_concurrency: usize,

    /// Lifetime of password reset tokens in seconds.
    pub reset_token_ttl_secs: i64,
}

impl Default for KeyGraphConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: DEFAULT_RSA_KEY_BITS,
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            reset_token_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl KeyGraphConfig {
    /// Smaller keys for tests, where 4096-bit generation dominates runtime.
    pub fn fast_keys() -> Self {
        Self {
            rsa_key_bits: 2048,
            ..Self::default()
        }
    }
}
