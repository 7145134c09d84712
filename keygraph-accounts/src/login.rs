//! Login and credential changes.

use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::graph::{
    KeyGraph, blocking, ensure_unchanged, normalize_email, unwrap_kek, verify_password, wrap_kek,
};
use crate::results::{AccountKeys, AccountUserInfo, LoginAccount, LoginResult};
use keygraph_crypto::{
    compare_string, decrypt_with, derive_key, hash_string, validate_password,
};
use keygraph_store::Relationship;
use tracing::{debug, info};
use uuid::Uuid;

impl KeyGraph {
    /// Authenticates an account user and unwraps the KEK of every account
    /// they can access. Pending invitations are accepted on the way: their
    /// email branch is re-wrapped under the password.
    ///
    /// With `include_keys` the result carries each account's KEK and
    /// decrypted private key.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        include_keys: bool,
    ) -> KeyGraphResult<LoginResult> {
        const OP: &str = "login";
        let email = normalize_email(email);
        let user = self.find_user_by_email(OP, &email).await?;

        let has_pending = user.relationships.iter().any(Relationship::is_pending);
        let (password_key, email_key) = {
            let user = user.clone();
            let password = password.to_owned();
            blocking(OP, move || {
                verify_password(OP, &user, &password)?;
                let password_key = derive_key(&password, &user.salt).context(OP)?;
                let email_key = if has_pending {
                    Some(derive_key(&email, &user.salt).context(OP)?)
                } else {
                    None
                };
                Ok((password_key, email_key))
            })
            .await?
        };

        let mut relationships = user.relationships.clone();
        if let Some(email_key) = email_key {
            let mut upgraded = Vec::new();
            for rel in relationships.iter_mut().filter(|r| r.is_pending()) {
                let kek = unwrap_kek(OP, &email_key, &rel.email_wrapped_kek)?;
                rel.password_wrapped_kek = Some(wrap_kek(OP, &password_key, &kek)?);
                upgraded.push(rel.clone());
            }
            self.write(OP, |tx| {
                ensure_unchanged(tx, OP, &user)?;
                for rel in &upgraded {
                    tx.update_relationship(rel).context(OP)?;
                }
                Ok(())
            })?;
            info!(
                account_user_id = %user.account_user_id,
                accepted = upgraded.len(),
                "accepted pending invitations on login"
            );
        }

        let accounts = self.read(OP, |tx| {
            relationships
                .iter()
                .map(|rel| tx.find_account(&rel.account_id))
                .collect::<Result<Vec<_>, _>>()
        })?;

        let mut result = Vec::with_capacity(accounts.len());
        for (rel, account) in relationships.iter().zip(accounts) {
            if account.retired {
                continue;
            }
            let wrapped = rel.password_wrapped_kek.as_ref().ok_or_else(|| {
                KeyGraphError::Decryption(format!("{OP}: relationship has no password branch"))
            })?;
            let kek = unwrap_kek(OP, &password_key, wrapped)?;
            let keys = if include_keys {
                let private_key = decrypt_with(&kek, &account.encrypted_private_key).context(OP)?;
                let private_key = String::from_utf8(private_key).map_err(|_| {
                    KeyGraphError::Decryption(format!("{OP}: private key is not UTF-8"))
                })?;
                Some(AccountKeys {
                    key_encryption_key: kek,
                    private_key,
                })
            } else {
                None
            };
            result.push(LoginAccount {
                account_id: account.account_id,
                name: account.name,
                created: account.created,
                public_key: account.public_key,
                keys,
            });
        }

        debug!(account_user_id = %user.account_user_id, accounts = result.len(), "login succeeded");
        Ok(LoginResult {
            account_user_id: user.account_user_id,
            admin_level: user.admin_level,
            accounts: result,
        })
    }

    /// Looks up which accounts a user can access, without touching keys.
    pub fn lookup_account_user(&self, account_user_id: &Uuid) -> KeyGraphResult<AccountUserInfo> {
        let user = self.read("lookup account user", |tx| tx.find_account_user(account_user_id))?;
        let (pending, active): (Vec<_>, Vec<_>) =
            user.relationships.iter().partition(|r| r.is_pending());
        Ok(AccountUserInfo {
            account_user_id: user.account_user_id,
            admin_level: user.admin_level,
            account_ids: active.iter().map(|r| r.account_id).collect(),
            pending_account_ids: pending.iter().map(|r| r.account_id).collect(),
        })
    }

    /// Replaces a user's password, re-wrapping every password branch under
    /// the new password. Pending invitations keep only their email branch
    /// and are accepted at the next login.
    pub async fn change_password(
        &self,
        account_user_id: &Uuid,
        current_password: &str,
        new_password: &str,
    ) -> KeyGraphResult<()> {
        const OP: &str = "change password";
        validate_password(new_password).context(OP)?;
        let user = self.read(OP, |tx| tx.find_account_user(account_user_id))?;

        let (current_key, new_key, new_hash) = {
            let user = user.clone();
            let current = current_password.to_owned();
            let new = new_password.to_owned();
            blocking(OP, move || {
                verify_password(OP, &user, &current)?;
                Ok((
                    derive_key(&current, &user.salt).context(OP)?,
                    derive_key(&new, &user.salt).context(OP)?,
                    hash_string(&new).context(OP)?,
                ))
            })
            .await?
        };

        let mut relationships = user.relationships.clone();
        for rel in relationships.iter_mut() {
            let Some(wrapped) = rel.password_wrapped_kek.as_ref() else {
                continue;
            };
            let kek = unwrap_kek(OP, &current_key, wrapped)?;
            rel.password_wrapped_kek = Some(wrap_kek(OP, &new_key, &kek)?);
        }

        self.write(OP, |tx| {
            ensure_unchanged(tx, OP, &user)?;
            for rel in &relationships {
                tx.update_relationship(rel).context(OP)?;
            }
            let mut updated = user.clone();
            updated.hashed_password = Some(new_hash);
            tx.update_account_user(&updated).context(OP)
        })?;
        info!(account_user_id = %account_user_id, "password changed");
        Ok(())
    }

    /// Moves a user to a new email address. The email branch of every
    /// relationship is re-wrapped under a key derived from the new address.
    pub async fn change_email(
        &self,
        account_user_id: &Uuid,
        password: &str,
        current_email: &str,
        new_email: &str,
    ) -> KeyGraphResult<()> {
        const OP: &str = "change email";
        let current_email = normalize_email(current_email);
        let new_email = normalize_email(new_email);
        if new_email.is_empty() || !new_email.contains('@') {
            return Err(KeyGraphError::Validation(format!("{OP}: new email is not an address")));
        }
        let user = self.read(OP, |tx| tx.find_account_user(account_user_id))?;

        let scan = self.scan_email(OP, &new_email).await?;
        if let Some(other) = &scan.found
            && other.account_user_id != user.account_user_id
        {
            return Err(KeyGraphError::Validation(format!("{OP}: email is already in use")));
        }

        let (current_key, new_key, new_hash) = {
            let user = user.clone();
            let password = password.to_owned();
            let new_email = new_email.clone();
            blocking(OP, move || {
                verify_password(OP, &user, &password)?;
                compare_string(&current_email, &user.hashed_email).context(OP)?;
                Ok((
                    derive_key(&current_email, &user.salt).context(OP)?,
                    derive_key(&new_email, &user.salt).context(OP)?,
                    hash_string(&new_email).context(OP)?,
                ))
            })
            .await?
        };

        let mut relationships = user.relationships.clone();
        for rel in relationships.iter_mut() {
            let kek = unwrap_kek(OP, &current_key, &rel.email_wrapped_kek)?;
            rel.email_wrapped_kek = wrap_kek(OP, &new_key, &kek)?;
        }

        self.write(OP, |tx| {
            ensure_unchanged(tx, OP, &user)?;
            if scan
                .claimed_since(tx, OP, &new_email, Some(&user.account_user_id))?
                .is_some()
            {
                return Err(KeyGraphError::Validation(format!("{OP}: email is already in use")));
            }
            for rel in &relationships {
                tx.update_relationship(rel).context(OP)?;
            }
            let mut updated = user.clone();
            updated.hashed_email = new_hash;
            tx.update_account_user(&updated).context(OP)
        })?;
        info!(account_user_id = %account_user_id, "email changed");
        Ok(())
    }
}
