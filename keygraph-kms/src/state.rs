//! Shared router state.

use crate::config::KmsConfig;
use crate::error::{KmsError, KmsResult};
use crate::jwks::JwksCache;
use keygraph_crypto::MasterKey;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

struct Inner {
    master_key: MasterKey,
    config: KmsConfig,
    jwks: Option<JwksCache>,
}

/// State handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct KmsState {
    inner: Arc<Inner>,
}

impl KmsState {
    pub fn new(master_key: MasterKey, config: KmsConfig) -> KmsResult<Self> {
        let jwks = match config.jwks_url.clone() {
            Some(url) => {
                let client = Client::builder()
                    .timeout(Duration::from_secs(config.request_timeout_secs))
                    .build()
                    .map_err(|e| KmsError::Config(format!("failed to build HTTP client: {e}")))?;
                Some(JwksCache::new(
                    client,
                    url,
                    Duration::from_secs(config.jwks_ttl_secs),
                    Duration::from_secs(config.jwks_min_refresh_secs),
                ))
            }
            None => {
                warn!("no JWKs URL configured, encrypt and decrypt are unauthenticated");
                None
            }
        };
        Ok(Self {
            inner: Arc::new(Inner {
                master_key,
                config,
                jwks,
            }),
        })
    }

    /// The only way handlers reach the master key.
    pub(crate) fn master_key(&self) -> &MasterKey {
        &self.inner.master_key
    }

    pub fn config(&self) -> &KmsConfig {
        &self.inner.config
    }

    pub(crate) fn jwks(&self) -> Option<&JwksCache> {
        self.inner.jwks.as_ref()
    }
}
