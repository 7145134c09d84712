//! Password reset through a one-time key.
//!
//! Requesting a reset wraps every KEK a user holds under a fresh random key
//! and hands that key out (directly, or sealed in a reset token). Completing
//! the reset unwraps those branches, re-wraps them under the new password
//! and clears them, so a key works exactly once.

use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::graph::{KeyGraph, blocking, ensure_unchanged, normalize_email, unwrap_kek, wrap_kek};
use chrono::{DateTime, Duration, Utc};
use keygraph_crypto::{SymmetricKey, derive_key, hash_string, validate_password};
use keygraph_store::AccountUser;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Contents of a sealed reset token.
#[derive(Serialize, Deserialize)]
struct ResetClaims {
    account_user_id: Uuid,
    one_time_key: String,
    expires: DateTime<Utc>,
}

impl KeyGraph {
    /// Wraps every KEK of the user behind `email` under a new one-time key.
    ///
    /// The key is returned, never stored. Issuing a new key replaces any
    /// earlier one.
    pub async fn generate_one_time_key(&self, email: &str) -> KeyGraphResult<SymmetricKey> {
        let (_, key) = self.issue_one_time_key(email).await?;
        Ok(key)
    }

    async fn issue_one_time_key(&self, email: &str) -> KeyGraphResult<(Uuid, SymmetricKey)> {
        const OP: &str = "generate one-time key";
        let email = normalize_email(email);
        let user = self.find_user_by_email(OP, &email).await?;

        let email_key = {
            let salt = user.salt.clone();
            blocking(OP, move || derive_key(&email, &salt).context(OP)).await?
        };

        let one_time_key = SymmetricKey::generate();
        let mut relationships = user.relationships.clone();
        for rel in relationships.iter_mut() {
            let kek = unwrap_kek(OP, &email_key, &rel.email_wrapped_kek)?;
            rel.one_time_wrapped_kek = Some(wrap_kek(OP, &one_time_key, &kek)?);
        }

        self.write(OP, |tx| {
            ensure_unchanged(tx, OP, &user)?;
            for rel in &relationships {
                tx.update_relationship(rel).context(OP)?;
            }
            Ok(())
        })?;
        info!(account_user_id = %user.account_user_id, "issued one-time key");
        Ok((user.account_user_id, one_time_key))
    }

    /// Sets a new password using a key from [`KeyGraph::generate_one_time_key`].
    /// Pending invitations are accepted along the way.
    pub async fn reset_password(
        &self,
        email: &str,
        new_password: &str,
        one_time_key: &SymmetricKey,
    ) -> KeyGraphResult<()> {
        const OP: &str = "reset password";
        validate_password(new_password).context(OP)?;
        let user = self.find_user_by_email(OP, &normalize_email(email)).await?;
        self.apply_reset(OP, user, new_password, one_time_key).await
    }

    async fn apply_reset(
        &self,
        op: &'static str,
        user: AccountUser,
        new_password: &str,
        one_time_key: &SymmetricKey,
    ) -> KeyGraphResult<()> {
        if user.relationships.is_empty() {
            return Err(KeyGraphError::Decryption(format!("{op}: no reset is pending")));
        }

        let (password_key, password_hash) = {
            let salt = user.salt.clone();
            let password = new_password.to_owned();
            blocking(op, move || {
                Ok((
                    derive_key(&password, &salt).context(op)?,
                    hash_string(&password).context(op)?,
                ))
            })
            .await?
        };

        let mut relationships = user.relationships.clone();
        for rel in relationships.iter_mut() {
            let wrapped = rel
                .one_time_wrapped_kek
                .take()
                .ok_or_else(|| KeyGraphError::Decryption(format!("{op}: no reset is pending")))?;
            let kek = unwrap_kek(op, one_time_key, &wrapped)?;
            rel.password_wrapped_kek = Some(wrap_kek(op, &password_key, &kek)?);
        }

        self.write(op, |tx| {
            ensure_unchanged(tx, op, &user)?;
            for rel in &relationships {
                tx.update_relationship(rel).context(op)?;
            }
            let mut updated = user.clone();
            updated.hashed_password = Some(password_hash);
            tx.update_account_user(&updated).context(op)
        })?;
        info!(account_user_id = %user.account_user_id, "password reset");
        Ok(())
    }

    /// Issues a one-time key and seals it, with the user id and an expiry,
    /// into an opaque token suitable for a reset link.
    pub async fn issue_reset_token(&self, email: &str) -> KeyGraphResult<String> {
        let (account_user_id, key) = self.issue_one_time_key(email).await?;
        let claims = ResetClaims {
            account_user_id,
            one_time_key: key.to_base64(),
            expires: Utc::now() + Duration::seconds(self.config().reset_token_ttl_secs),
        };
        let json = serde_json::to_string(&claims)
            .map_err(|e| KeyGraphError::Configuration(format!("issue reset token: {e}")))?;
        self.encrypter().encrypt(&json).await
    }

    /// Completes a reset started by [`KeyGraph::issue_reset_token`]. The
    /// email must belong to the user the token was issued for.
    pub async fn reset_password_with_token(
        &self,
        token: &str,
        email: &str,
        new_password: &str,
    ) -> KeyGraphResult<()> {
        const OP: &str = "reset password with token";
        validate_password(new_password).context(OP)?;

        let json = self.encrypter().decrypt(token).await?;
        let claims: ResetClaims = serde_json::from_str(&json)
            .map_err(|_| KeyGraphError::Validation(format!("{OP}: malformed reset token")))?;
        if claims.expires <= Utc::now() {
            return Err(KeyGraphError::Validation(format!("{OP}: reset token expired")));
        }
        let key = SymmetricKey::from_base64(&claims.one_time_key).context(OP)?;

        let user = self.find_user_by_email(OP, &normalize_email(email)).await?;
        if user.account_user_id != claims.account_user_id {
            return Err(KeyGraphError::CredentialMismatch(OP.to_string()));
        }
        self.apply_reset(OP, user, new_password, &key).await
    }
}
