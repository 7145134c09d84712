//! HTTP routes.

use crate::auth::{AuthScope, require_admin, require_token};
use crate::error::{KmsError, KmsResult};
use crate::state::KmsState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use keygraph_accounts::{KeyGraphError, open, seal};
use keygraph_crypto::{MasterKey, private_key_pem_to_jwk};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

/// Builds the KMS router.
pub fn router(state: KmsState) -> Router {
    let keys = Router::new()
        .route("/encrypt", post(encrypt))
        .route("/decrypt", post(decrypt))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let admin = Router::new()
        .route("/admin/bootstrap", post(bootstrap))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/status", get(status))
        .merge(keys)
        .merge(admin)
        .with_state(state)
}

async fn status(State(state): State<KmsState>) -> Json<Value> {
    Json(json!({ "ok": true, "key_version": state.master_key().version() }))
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> KmsResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| KmsError::BadRequest(format!("error decoding request body: {e}")))
}

async fn encrypt(
    State(state): State<KmsState>,
    Extension(scope): Extension<AuthScope>,
    body: Bytes,
) -> KmsResult<Json<Value>> {
    if !scope.allows_encrypt() {
        return Err(KmsError::Forbidden("token does not allow encryption".into()));
    }
    let request: Value = parse_body(&body)?;
    let plaintext = request
        .get("decrypted")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| KmsError::BadRequest("expected 'decrypted' to be a non-empty string".into()))?;

    let encrypted = seal(state.master_key(), plaintext)
        .map_err(|e| KmsError::Internal(e.to_string()))?;
    debug!("encrypted value");
    Ok(Json(json!({ "encrypted": encrypted })))
}

#[derive(Deserialize)]
struct DecryptRequest {
    #[serde(alias = "encrypted")]
    encrypted_private_key: String,
    #[serde(default)]
    account_id: Option<String>,
}

#[derive(Deserialize)]
struct DecryptParams {
    #[serde(default)]
    jwk: Option<String>,
}

async fn decrypt(
    State(state): State<KmsState>,
    Extension(scope): Extension<AuthScope>,
    Query(params): Query<DecryptParams>,
    body: Bytes,
) -> KmsResult<Json<Value>> {
    let request: DecryptRequest = parse_body(&body)?;
    if request.encrypted_private_key.is_empty() {
        return Err(KmsError::BadRequest("expected a non-empty encrypted value".into()));
    }
    if !scope.allows_account(request.account_id.as_deref()) {
        return Err(KmsError::Forbidden("token does not grant access to this account".into()));
    }

    let decrypted = open(state.master_key(), &request.encrypted_private_key).map_err(|e| match e {
        KeyGraphError::Decryption(_) => KmsError::Decryption,
        other => KmsError::Internal(other.to_string()),
    })?;

    let as_jwk = params.jwk.is_some_and(|v| !v.is_empty());
    let value = if as_jwk {
        let jwk = private_key_pem_to_jwk(&decrypted)
            .map_err(|e| KmsError::BadRequest(format!("decrypted value is not a PEM key: {e}")))?;
        serde_json::to_value(&jwk).map_err(|e| KmsError::Internal(e.to_string()))?
    } else {
        Value::String(decrypted)
    };
    Ok(Json(json!({ "decrypted_private_key": value })))
}

/// Generates master key material for provisioning a new deployment. The
/// running key is neither returned nor replaced.
async fn bootstrap(State(state): State<KmsState>) -> KmsResult<Json<Value>> {
    let key_version = state
        .master_key()
        .version()
        .checked_add(1)
        .ok_or_else(|| KmsError::Internal("master key version cannot be incremented".into()))?;
    let key = MasterKey::generate(key_version);
    info!(key_version, "generated master key material");
    Ok(Json(json!({ "key": key.encode(), "key_version": key_version })))
}
