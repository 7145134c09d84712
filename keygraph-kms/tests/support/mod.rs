#![allow(dead_code)]

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use keygraph_crypto::{MasterKey, RsaJwk};
use keygraph_kms::{KmsConfig, KmsState, router};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use serde_json::{Value, json};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

pub const KID: &str = "signing-1";

/// An RSA keypair tokens are signed with.
pub struct Signer {
    pub private_pem: String,
    pub public_pem: String,
    pub public_jwk: RsaJwk,
}

fn make_signer() -> Signer {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    Signer {
        private_pem: key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string(),
        public_pem: key.to_public_key().to_public_key_pem(LineEnding::LF).unwrap(),
        public_jwk: RsaJwk::from_public_key(&key.to_public_key()),
    }
}

pub fn signer() -> &'static Signer {
    static SIGNER: OnceLock<Signer> = OnceLock::new();
    SIGNER.get_or_init(make_signer)
}

/// A second keypair the KMS does not trust.
pub fn stranger() -> &'static Signer {
    static STRANGER: OnceLock<Signer> = OnceLock::new();
    STRANGER.get_or_init(make_signer)
}

impl Signer {
    /// JWK set advertising this key under `kid`.
    pub fn jwks(&self, kid: &str) -> Value {
        let mut jwk = serde_json::to_value(&self.public_jwk).unwrap();
        jwk["kid"] = json!(kid);
        jwk["alg"] = json!("RS256");
        json!({ "keys": [jwk] })
    }

    pub fn token(&self, kid: Option<&str>, private: Value, expires_in: i64) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        let claims = json!({ "exp": now() + expires_in, "priv": private });
        jsonwebtoken::encode(
            &header,
            &claims,
            &EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    pub fn rpc_token(&self) -> String {
        self.token(Some(KID), json!({ "rpc": "1" }), 60)
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

pub fn master_key() -> MasterKey {
    MasterKey::generate(1)
}

/// A copy of `master` for checking what the service produced.
pub fn copy_key(master: &MasterKey) -> MasterKey {
    MasterKey::parse(&master.encode()).unwrap()
}

pub fn app(master: MasterKey, config: KmsConfig) -> Router {
    router(KmsState::new(master, config).unwrap())
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}
