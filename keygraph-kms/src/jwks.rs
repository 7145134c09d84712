//! Verification key cache for application tokens.
//!
//! Keys are fetched from one URL and kept in a single TTL-guarded slot.
//! Concurrent refreshes on expiry may both fetch; the last write wins and
//! readers always see a complete key set. Refreshes forced by unknown key
//! ids are limited to one per `min_refresh` interval.

use crate::error::{KmsError, KmsResult};
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// One key tokens may be signed with.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: Option<String>,
    pub key: DecodingKey,
}

struct CachedKeys {
    keys: Arc<Vec<VerificationKey>>,
    fetched_at: Instant,
}

/// Either a JWK set or a single PEM encoded public key.
#[derive(Deserialize)]
struct KeysResponse {
    #[serde(default)]
    keys: Vec<JwkEntry>,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct JwkEntry {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

pub struct JwksCache {
    client: Client,
    url: String,
    ttl: Duration,
    min_refresh: Duration,
    slot: Arc<RwLock<Option<CachedKeys>>>,
    last_forced: Arc<Mutex<Option<Instant>>>,
}

impl JwksCache {
    pub fn new(client: Client, url: String, ttl: Duration, min_refresh: Duration) -> Self {
        Self {
            client,
            url,
            ttl,
            min_refresh,
            slot: Arc::new(RwLock::new(None)),
            last_forced: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns cached keys, fetching them if the slot is empty or stale.
    pub async fn keys(&self) -> KmsResult<Arc<Vec<VerificationKey>>> {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(Arc::clone(&cached.keys));
                }
                debug!("verification keys older than {:?}, refreshing", self.ttl);
            }
        }
        self.refresh().await
    }

    /// Fetches keys unconditionally and replaces the cached set.
    pub async fn refresh(&self) -> KmsResult<Arc<Vec<VerificationKey>>> {
        let keys = Arc::new(self.fetch().await.inspect_err(|e| {
            warn!("verification key refresh failed: {e}");
        })?);
        debug!(count = keys.len(), "refreshed verification keys");

        let mut slot = self.slot.write().await;
        *slot = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    /// Refreshes because a token named a key id the cache does not hold.
    /// Inside `min_refresh` of the previous forced refresh the cached keys
    /// are returned as they are.
    pub async fn refresh_for_unknown_kid(&self) -> KmsResult<Arc<Vec<VerificationKey>>> {
        // Held across the fetch so concurrent unknown kids share one refresh.
        let mut last_forced = self.last_forced.lock().await;
        if let Some(at) = *last_forced
            && at.elapsed() < self.min_refresh
        {
            debug!("forced key refresh within {:?}, using cached keys", self.min_refresh);
            return self.keys().await;
        }
        *last_forced = Some(Instant::now());
        self.refresh().await
    }

    async fn fetch(&self) -> KmsResult<Vec<VerificationKey>> {
        let response: KeysResponse = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| KmsError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| KmsError::KeyFetch(format!("unexpected response: {e}")))?;
        parse_keys(response)
    }
}

fn parse_keys(response: KeysResponse) -> KmsResult<Vec<VerificationKey>> {
    let mut keys = Vec::new();
    for entry in response.keys {
        let (Some(n), Some(e)) = (entry.n.as_deref(), entry.e.as_deref()) else {
            continue;
        };
        if entry.kty != "RSA" {
            continue;
        }
        let key = DecodingKey::from_rsa_components(n, e)
            .map_err(|err| KmsError::KeyFetch(format!("invalid RSA key: {err}")))?;
        keys.push(VerificationKey {
            kid: entry.kid,
            key,
        });
    }
    if let Some(pem) = response.key {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|err| KmsError::KeyFetch(format!("invalid PEM key: {err}")))?;
        keys.push(VerificationKey { kid: None, key });
    }
    if keys.is_empty() {
        return Err(KmsError::KeyFetch("response contained no RSA keys".into()));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODULUS: &str = "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw";

    async fn serving_keys(expected_fetches: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "keys": [{ "kty": "RSA", "kid": "r1", "n": MODULUS, "e": "AQAB" }]
            })))
            .expect(expected_fetches)
            .mount(&server)
            .await;
        server
    }

    fn cache(server: &MockServer, min_refresh: Duration) -> JwksCache {
        JwksCache::new(
            Client::new(),
            format!("{}/jwks", server.uri()),
            Duration::from_secs(300),
            min_refresh,
        )
    }

    #[tokio::test]
    async fn forced_refreshes_are_rate_limited() {
        let server = serving_keys(2).await;
        let jwks = cache(&server, Duration::from_secs(60));
        jwks.keys().await.unwrap();
        for _ in 0..20 {
            let keys = jwks.refresh_for_unknown_kid().await.unwrap();
            assert_eq!(keys.len(), 1);
        }
    }

    #[tokio::test]
    async fn forced_refresh_allowed_again_after_interval() {
        let server = serving_keys(2).await;
        let jwks = cache(&server, Duration::from_millis(500));
        jwks.refresh_for_unknown_kid().await.unwrap();
        jwks.refresh_for_unknown_kid().await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        jwks.refresh_for_unknown_kid().await.unwrap();
        jwks.refresh_for_unknown_kid().await.unwrap();
        // Cached keys within the TTL never trigger a fetch.
        jwks.keys().await.unwrap();
    }

    fn response(json: &str) -> KeysResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn skips_non_rsa_entries() {
        let keys = parse_keys(response(
            r#"{"keys":[{"kty":"EC","kid":"ec"},{"kty":"RSA","kid":"r1","n":"sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw","e":"AQAB"}]}"#,
        ))
        .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].kid.as_deref(), Some("r1"));
    }

    #[test]
    fn empty_set_is_an_error() {
        assert!(matches!(
            parse_keys(response(r#"{"keys":[]}"#)),
            Err(KmsError::KeyFetch(_))
        ));
        assert!(matches!(
            parse_keys(response(r#"{"key":"not a pem"}"#)),
            Err(KmsError::KeyFetch(_))
        ));
    }
}
