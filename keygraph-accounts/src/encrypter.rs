//! Capability for sealing values under the operator's master key.
//!
//! The key graph never sees master key material directly. It either holds a
//! [`LocalEncrypter`] or a client for the key-management service; both
//! produce the same wire form, `base64(<envelope text>)`.

use crate::error::{KeyGraphError, KeyGraphResult};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use keygraph_crypto::{CipherEnvelope, MasterKey};

#[async_trait]
pub trait Encrypter: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> KeyGraphResult<String>;
    async fn decrypt(&self, ciphertext: &str) -> KeyGraphResult<String>;
}

/// [`Encrypter`] backed by an in-process master key.
#[derive(Debug)]
pub struct LocalEncrypter {
    master: MasterKey,
}

impl LocalEncrypter {
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }
}

/// Seals `plaintext` under `master` into the shared wire form.
pub fn seal(master: &MasterKey, plaintext: &str) -> KeyGraphResult<String> {
    let envelope = master
        .encrypt(plaintext.as_bytes())
        .map_err(|e| KeyGraphError::Configuration(format!("seal: {e}")))?;
    Ok(STANDARD.encode(envelope.marshal()))
}

/// Opens a value produced by [`seal`].
pub fn open(master: &MasterKey, sealed: &str) -> KeyGraphResult<String> {
    let opened = STANDARD
        .decode(sealed.trim())
        .ok()
        .and_then(|raw| String::from_utf8(raw).ok())
        .ok_or_else(|| KeyGraphError::Decryption("open: value is not base64 envelope text".into()))?;
    let envelope = CipherEnvelope::parse(&opened)
        .map_err(|e| KeyGraphError::Decryption(format!("open: {e}")))?;
    let plaintext = master
        .decrypt(&envelope)
        .map_err(|e| KeyGraphError::Decryption(format!("open: {e}")))?;
    String::from_utf8(plaintext)
        .map_err(|_| KeyGraphError::Decryption("open: plaintext is not UTF-8".into()))
}

#[async_trait]
impl Encrypter for LocalEncrypter {
    async fn encrypt(&self, plaintext: &str) -> KeyGraphResult<String> {
        seal(&self.master, plaintext)
    }

    async fn decrypt(&self, ciphertext: &str) -> KeyGraphResult<String> {
        open(&self.master, ciphertext)
    }
}
