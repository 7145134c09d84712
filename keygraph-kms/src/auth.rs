//! Request authentication.
//!
//! Admin routes use HTTP Basic against one configured user with a bcrypt
//! hashed password. Key routes take an RS256 token, either from
//! `X-RPC-Authentication` (server calls, `priv.rpc` must be `"1"`) or as a
//! bearer token (client calls, scoped to the accounts in `priv.accounts`).

use crate::error::{KmsError, KmsResult};
use crate::jwks::VerificationKey;
use crate::state::KmsState;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use base64::{Engine, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use keygraph_crypto::constant_time_eq;
use serde::Deserialize;
use tracing::debug;

pub const RPC_HEADER: &str = "x-rpc-authentication";

/// What an authenticated request may do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthScope {
    /// No verification keys are configured.
    Unrestricted,
    /// Server-to-server call.
    Rpc,
    /// Client call limited to these accounts.
    Accounts(Vec<String>),
}

impl AuthScope {
    pub fn allows_encrypt(&self) -> bool {
        matches!(self, AuthScope::Unrestricted | AuthScope::Rpc)
    }

    pub fn allows_account(&self, account_id: Option<&str>) -> bool {
        match self {
            AuthScope::Unrestricted | AuthScope::Rpc => true,
            AuthScope::Accounts(accounts) => {
                account_id.is_some_and(|id| accounts.iter().any(|a| a == id))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "priv", default)]
    private: PrivateClaims,
}

#[derive(Debug, Default, Deserialize)]
struct PrivateClaims {
    #[serde(default)]
    rpc: Option<String>,
    #[serde(default)]
    accounts: Vec<String>,
}

/// Middleware for `/encrypt` and `/decrypt`. Attaches an [`AuthScope`] to
/// the request.
pub async fn require_token(
    State(state): State<KmsState>,
    mut request: Request,
    next: Next,
) -> KmsResult<Response> {
    let scope = match state.jwks() {
        None => AuthScope::Unrestricted,
        Some(jwks) => {
            let (token, is_rpc) = token_from_headers(request.headers())
                .ok_or_else(|| KmsError::Forbidden("could not infer token from headers".into()))?;
            let header = decode_header(&token)
                .map_err(|e| KmsError::Forbidden(format!("error parsing token: {e}")))?;

            let mut keys = jwks.keys().await?;
            if !has_candidate(&keys, header.kid.as_deref()) {
                debug!("no cached key matches token kid, refreshing");
                keys = jwks.refresh_for_unknown_kid().await?;
            }
            let claims = verify(&token, &keys, header.kid.as_deref())?;

            if is_rpc {
                if claims.private.rpc.as_deref() != Some("1") {
                    return Err(KmsError::Forbidden(
                        "token claims do not allow the requested operation".into(),
                    ));
                }
                AuthScope::Rpc
            } else {
                AuthScope::Accounts(claims.private.accounts)
            }
        }
    };
    request.extensions_mut().insert(scope);
    Ok(next.run(request).await)
}

fn token_from_headers(headers: &HeaderMap) -> Option<(String, bool)> {
    if let Some(value) = headers.get(RPC_HEADER).and_then(|v| v.to_str().ok())
        && !value.is_empty()
    {
        return Some((value.to_string(), true));
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_string(), false))
}

fn candidates<'a>(
    keys: &'a [VerificationKey],
    kid: Option<&'a str>,
) -> impl Iterator<Item = &'a VerificationKey> + 'a {
    keys.iter()
        .filter(move |k| kid.is_none() || k.kid.is_none() || k.kid.as_deref() == kid)
}

fn has_candidate(keys: &[VerificationKey], kid: Option<&str>) -> bool {
    candidates(keys, kid).next().is_some()
}

fn verify(token: &str, keys: &[VerificationKey], kid: Option<&str>) -> KmsResult<Claims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 0;

    let mut last_error = None;
    for candidate in candidates(keys, kid) {
        match decode::<Claims>(token, &candidate.key, &validation) {
            Ok(data) => return Ok(data.claims),
            Err(e) => last_error = Some(e),
        }
    }
    Err(KmsError::Forbidden(match last_error {
        Some(e) => format!("error verifying token: {e}"),
        None => "no key matches the token".to_string(),
    }))
}

/// Middleware for `/admin` routes.
pub async fn require_admin(
    State(state): State<KmsState>,
    request: Request,
    next: Next,
) -> KmsResult<Response> {
    let config = state.config();
    let (Some(user), Some(hashed)) = (
        config.basic_auth_user.clone(),
        config.hashed_basic_auth_password.clone(),
    ) else {
        return Err(KmsError::Forbidden("admin access is not configured".into()));
    };

    let (given_user, given_password) =
        basic_credentials(request.headers()).ok_or(KmsError::Unauthorized)?;
    let authorized = tokio::task::spawn_blocking(move || {
        let user_matches = constant_time_eq(given_user.as_bytes(), user.as_bytes());
        let password_matches = STANDARD
            .decode(hashed.trim())
            .ok()
            .and_then(|h| String::from_utf8(h).ok())
            .is_some_and(|h| bcrypt::verify(&given_password, &h).unwrap_or(false));
        user_matches && password_matches
    })
    .await
    .map_err(|e| KmsError::Internal(format!("credential check failed: {e}")))?;

    if !authorized {
        return Err(KmsError::Unauthorized);
    }
    Ok(next.run(request).await)
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}
