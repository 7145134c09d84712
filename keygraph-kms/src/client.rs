//! HTTP client for a remote KMS.
//!
//! [`RemoteEncrypter`] lets a key graph run without holding the master key:
//! every seal and open is a round trip to `/encrypt` or `/decrypt`.

use crate::auth::RPC_HEADER;
use crate::error::{ErrorBody, KmsError, KmsResult};
use async_trait::async_trait;
use keygraph_accounts::{Encrypter, KeyGraphError, KeyGraphResult};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// [`Encrypter`] that delegates to a KMS over HTTP.
pub struct RemoteEncrypter {
    client: Client,
    base_url: String,
    rpc_token: Option<String>,
}

#[derive(Deserialize)]
struct EncryptResponse {
    encrypted: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    decrypted_private_key: String,
}

impl RemoteEncrypter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> KmsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KmsError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rpc_token: None,
        })
    }

    /// Sends `token` in the RPC authentication header on every request.
    pub fn with_rpc_token(mut self, token: impl Into<String>) -> Self {
        self.rpc_token = Some(token.into());
        self
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> KeyGraphResult<Response> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "kms request");
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.rpc_token {
            request = request.header(RPC_HEADER, token);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| KeyGraphError::Remote(format!("{path}: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = match resp.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        Err(KeyGraphError::Remote(format!("{path} returned {status}: {message}")))
    }
}

#[async_trait]
impl Encrypter for RemoteEncrypter {
    async fn encrypt(&self, plaintext: &str) -> KeyGraphResult<String> {
        let resp: EncryptResponse = self
            .post("/encrypt", json!({ "decrypted": plaintext }))
            .await?
            .json()
            .await
            .map_err(|e| KeyGraphError::Remote(format!("/encrypt: {e}")))?;
        Ok(resp.encrypted)
    }

    async fn decrypt(&self, ciphertext: &str) -> KeyGraphResult<String> {
        let resp: DecryptResponse = self
            .post("/decrypt", json!({ "encrypted_private_key": ciphertext }))
            .await?
            .json()
            .await
            .map_err(|e| KeyGraphError::Remote(format!("/decrypt: {e}")))?;
        Ok(resp.decrypted_private_key)
    }
}
