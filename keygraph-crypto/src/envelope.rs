//! Self-describing ciphertext container.
//!
//! Every ciphertext, salt and hash persisted by keygraph is stored as a
//! [`CipherEnvelope`] in its canonical text form:
//!
//! ```text
//! {<algo version>,<key version or empty>} <base64 ciphertext>[ <base64 nonce>]
//! ```
//!
//! The algorithm version travels with the data so readers can pick the right
//! primitive without any out-of-band configuration. Parsing preserves unknown
//! algorithm versions; it is the consuming primitive that rejects them.

use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static ENVELOPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{(\d+),(\d*)\}\s(.+)$").expect("envelope pattern is a valid regex")
});

/// Ciphertext plus the metadata needed to decrypt or verify it.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherEnvelope {
    /// Algorithm tag, interpreted per purpose by [`crate::Algorithm::decode`].
    pub algo_version: u32,
    /// Version of the key that produced the ciphertext, if the producer tracks one.
    pub key_version: Option<u32>,
    /// Nonce for AEAD ciphertexts, or the salt for password hashes.
    pub nonce: Option<Vec<u8>>,
    pub ciphertext: Vec<u8>,
}

impl CipherEnvelope {
    pub fn new(algo_version: u32, ciphertext: Vec<u8>) -> Self {
        Self {
            algo_version,
            key_version: None,
            nonce: None,
            ciphertext,
        }
    }

    pub fn with_nonce(mut self, nonce: Vec<u8>) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn with_key_version(mut self, key_version: u32) -> Self {
        self.key_version = Some(key_version);
        self
    }

    /// Parses the canonical text form.
    ///
    /// Fails with [`CryptoError::Parse`] when the text does not follow the
    /// grammar and with [`CryptoError::Decode`] when either token is not
    /// valid base64.
    pub fn parse(s: &str) -> CryptoResult<Self> {
        let caps = ENVELOPE_PATTERN
            .captures(s)
            .ok_or_else(|| CryptoError::Parse("input does not match envelope format".into()))?;

        let algo_version = caps[1]
            .parse::<u32>()
            .map_err(|e| CryptoError::Parse(format!("algorithm version: {e}")))?;

        let key_version = match &caps[2] {
            "" => None,
            raw => Some(
                raw.parse::<u32>()
                    .map_err(|e| CryptoError::Parse(format!("key version: {e}")))?,
            ),
        };

        let mut tokens = caps[3].split(' ');
        let ciphertext = match tokens.next() {
            Some(token) if !token.is_empty() => STANDARD
                .decode(token)
                .map_err(|_| CryptoError::Decode("ciphertext"))?,
            _ => return Err(CryptoError::Parse("missing ciphertext".into())),
        };

        let nonce = match tokens.next() {
            None => None,
            // A present but empty nonce marshals as a trailing space.
            Some("") => Some(Vec::new()),
            Some(token) => Some(
                STANDARD
                    .decode(token)
                    .map_err(|_| CryptoError::Decode("nonce"))?,
            ),
        };

        if tokens.next().is_some() {
            return Err(CryptoError::Parse("unexpected trailing token".into()));
        }

        Ok(Self {
            algo_version,
            key_version,
            nonce,
            ciphertext,
        })
    }

    /// Returns the canonical text form. Inverse of [`CipherEnvelope::parse`].
    pub fn marshal(&self) -> String {
        let key_version = self.key_version.map(|v| v.to_string()).unwrap_or_default();
        let mut out = format!(
            "{{{},{}}} {}",
            self.algo_version,
            key_version,
            STANDARD.encode(&self.ciphertext)
        );
        if let Some(nonce) = &self.nonce {
            out.push(' ');
            out.push_str(&STANDARD.encode(nonce));
        }
        out
    }
}

impl fmt::Display for CipherEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.marshal())
    }
}

// Ciphertexts routinely end up in log lines via `{:?}`; only the metadata is shown.
impl fmt::Debug for CipherEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherEnvelope")
            .field("algo_version", &self.algo_version)
            .field("key_version", &self.key_version)
            .field("nonce_len", &self.nonce.as_ref().map(Vec::len))
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl FromStr for CipherEnvelope {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CipherEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.marshal())
    }
}

impl<'de> Deserialize<'de> for CipherEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_without_key_version_or_nonce() {
        let env = CipherEnvelope::new(1, b"abc".to_vec());
        assert_eq!(env.marshal(), "{1,} YWJj");
    }

    #[test]
    fn marshal_with_key_version_and_nonce() {
        let env = CipherEnvelope::new(1, b"abc".to_vec())
            .with_key_version(7)
            .with_nonce(b"xyz".to_vec());
        assert_eq!(env.to_string(), "{1,7} YWJj eHl6");
    }

    #[test]
    fn parse_known_value() {
        let env: CipherEnvelope = "{2,12} YWJj eHl6".parse().unwrap();
        assert_eq!(env.algo_version, 2);
        assert_eq!(env.key_version, Some(12));
        assert_eq!(env.ciphertext, b"abc");
        assert_eq!(env.nonce.as_deref(), Some(&b"xyz"[..]));
    }

    #[test]
    fn parse_preserves_unknown_algo_version() {
        let env = CipherEnvelope::parse("{99,} YWJj").unwrap();
        assert_eq!(env.algo_version, 99);
        assert_eq!(env.marshal(), "{99,} YWJj");
    }

    #[test]
    fn parse_rejects_pattern_mismatch() {
        for input in ["", "YWJj", "{a,} YWJj", "{1} YWJj", "{1,}YWJj", "{1,} "] {
            assert!(
                matches!(CipherEnvelope::parse(input), Err(CryptoError::Parse(_))),
                "{input:?} should not parse"
            );
        }
    }

    #[test]
    fn parse_rejects_bad_base64() {
        assert!(matches!(
            CipherEnvelope::parse("{1,} !!!"),
            Err(CryptoError::Decode("ciphertext"))
        ));
        assert!(matches!(
            CipherEnvelope::parse("{1,} YWJj !!!"),
            Err(CryptoError::Decode("nonce"))
        ));
    }

    #[test]
    fn parse_rejects_third_token() {
        assert!(matches!(
            CipherEnvelope::parse("{1,} YWJj eHl6 eHl6"),
            Err(CryptoError::Parse(_))
        ));
    }

    #[test]
    fn empty_nonce_survives_a_round_trip() {
        let env = CipherEnvelope::new(1, b"abc".to_vec()).with_nonce(Vec::new());
        assert_eq!(env.marshal(), "{1,} YWJj ");
        let back = CipherEnvelope::parse(&env.marshal()).unwrap();
        assert_eq!(back.nonce, Some(Vec::new()));
        assert_eq!(back, env);
    }

    #[test]
    fn serde_uses_text_form() {
        let env = CipherEnvelope::new(1, b"abc".to_vec()).with_nonce(b"xyz".to_vec());
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, "\"{1,} YWJj eHl6\"");
        let back: CipherEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn debug_does_not_leak_ciphertext() {
        let env = CipherEnvelope::new(1, b"secret-bytes".to_vec());
        let dbg = format!("{env:?}");
        assert!(!dbg.contains("c2VjcmV0"));
        assert!(dbg.contains("ciphertext_len: 12"));
    }
}
