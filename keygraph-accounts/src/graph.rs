//! The key graph service and the helpers its operations share.
//!
//! Operations follow one shape: read what they need in a short read
//! transaction, do the CPU-heavy key derivation on the blocking pool with no
//! transaction open, then apply every change in a single write transaction
//! that first re-checks the records it read. Transactions are never held
//! across an `.await`.

use crate::config::KeyGraphConfig;
use crate::encrypter::Encrypter;
use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::scatter;
use keygraph_crypto::{
    CipherEnvelope, CryptoError, SymmetricKey, compare_string, decrypt_with, encrypt_with,
};
use keygraph_store::{Account, AccountUser, Store, StoreResult, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Envelope-encryption key graph over a [`Store`].
pub struct KeyGraph {
    store: Arc<dyn Store>,
    encrypter: Arc<dyn Encrypter>,
    config: KeyGraphConfig,
}

impl KeyGraph {
    pub fn new(store: Arc<dyn Store>, encrypter: Arc<dyn Encrypter>, config: KeyGraphConfig) -> Self {
        Self {
            store,
            encrypter,
            config,
        }
    }

    pub fn config(&self) -> &KeyGraphConfig {
        &self.config
    }

    pub(crate) fn encrypter(&self) -> &dyn Encrypter {
        self.encrypter.as_ref()
    }

    /// Runs `f` in a transaction that is dropped, never committed.
    pub(crate) fn read<T>(
        &self,
        op: &str,
        f: impl FnOnce(&dyn Transaction) -> StoreResult<T>,
    ) -> KeyGraphResult<T> {
        let tx = self.store.transaction().context(op)?;
        f(&*tx).context(op)
    }

    /// Runs `f` in a transaction and commits it when `f` succeeds. On error
    /// the transaction is dropped and nothing is written.
    pub(crate) fn write<T>(
        &self,
        op: &str,
        f: impl FnOnce(&mut dyn Transaction) -> KeyGraphResult<T>,
    ) -> KeyGraphResult<T> {
        let mut tx = self.store.transaction().context(op)?;
        let out = f(&mut *tx)?;
        tx.commit().context(op)?;
        Ok(out)
    }

    /// Finds the account user whose hashed email matches `email` by checking
    /// every user. Hashes are salted per user, so there is no index to use.
    pub(crate) async fn scan_email(&self, op: &str, email: &str) -> KeyGraphResult<EmailScan> {
        let users = self.read(op, |tx| tx.find_account_users())?;
        let seen = users
            .iter()
            .map(|u| (u.account_user_id, u.hashed_email.clone()))
            .collect();
        let email = normalize_email(email);
        let found = scatter::first_match(users, self.config.max_concurrency, move |user: AccountUser| {
            match compare_string(&email, &user.hashed_email) {
                Ok(()) => Some(user),
                Err(CryptoError::Mismatch) => None,
                Err(e) => {
                    warn!(account_user_id = %user.account_user_id, "skipping unreadable email hash: {}", e);
                    None
                }
            }
        })
        .await
        .map_err(|e| KeyGraphError::Configuration(format!("{op}: email scan failed: {e}")))?;
        Ok(EmailScan { found, seen })
    }

    pub(crate) async fn lookup_user_by_email(
        &self,
        op: &str,
        email: &str,
    ) -> KeyGraphResult<Option<AccountUser>> {
        Ok(self.scan_email(op, email).await?.found)
    }

    pub(crate) async fn find_user_by_email(&self, op: &str, email: &str) -> KeyGraphResult<AccountUser> {
        self.lookup_user_by_email(op, email)
            .await?
            .ok_or_else(|| KeyGraphError::UnknownUser(format!("{op}: no account user matches the given email")))
    }

    /// Hashes `user_id` under every account's salt.
    pub(crate) async fn hash_for_accounts(
        &self,
        op: &str,
        accounts: Vec<Account>,
        user_id: &str,
    ) -> KeyGraphResult<Vec<String>> {
        let user_id = user_id.to_owned();
        let op_owned = op.to_owned();
        let hashed = scatter::map_all(accounts, self.config.max_concurrency, move |account: Account| {
            account.hash_user_id(&user_id).context(&op_owned)
        })
        .await
        .map_err(|e| KeyGraphError::Configuration(format!("{op}: hashing failed: {e}")))?;
        hashed.into_iter().collect()
    }

    pub(crate) fn active_account(&self, op: &str, account_id: &Uuid) -> KeyGraphResult<Account> {
        let account = self.read(op, |tx| tx.find_account(account_id))?;
        if account.retired {
            return Err(KeyGraphError::UnknownAccount(format!("{op}: {account_id} is retired")));
        }
        Ok(account)
    }
}

/// Outcome of an email scan, with the email hash of every user it checked.
pub(crate) struct EmailScan {
    pub(crate) found: Option<AccountUser>,
    seen: HashMap<Uuid, CipherEnvelope>,
}

impl EmailScan {
    /// Returns the id of a user other than `owner` that claims `email` and
    /// was added, or changed its email, after the scan. Users the scan
    /// already checked are not hashed again.
    pub(crate) fn claimed_since(
        &self,
        tx: &dyn Transaction,
        op: &str,
        email: &str,
        owner: Option<&Uuid>,
    ) -> KeyGraphResult<Option<Uuid>> {
        let email = normalize_email(email);
        for user in tx.find_account_users().context(op)? {
            if owner == Some(&user.account_user_id)
                || self.seen.get(&user.account_user_id) == Some(&user.hashed_email)
            {
                continue;
            }
            match compare_string(&email, &user.hashed_email) {
                Ok(()) => return Ok(Some(user.account_user_id)),
                Err(CryptoError::Mismatch) => {}
                Err(e) => {
                    warn!(account_user_id = %user.account_user_id, "skipping unreadable email hash: {}", e);
                }
            }
        }
        Ok(None)
    }
}

/// Emails are hashed and used as key material in this form only.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Runs CPU-bound key work on the blocking pool.
pub(crate) async fn blocking<T, F>(op: &str, f: F) -> KeyGraphResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> KeyGraphResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| KeyGraphError::Configuration(format!("{op}: blocking task failed: {e}")))?
}

/// Fails with [`KeyGraphError::Transaction`] if the stored user no longer
/// equals the copy an operation read before deriving keys.
pub(crate) fn ensure_unchanged(
    tx: &dyn Transaction,
    op: &str,
    read: &AccountUser,
) -> KeyGraphResult<()> {
    let current = tx.find_account_user(&read.account_user_id).context(op)?;
    if current != *read {
        return Err(KeyGraphError::Transaction(format!(
            "{op}: account user {} changed concurrently",
            read.account_user_id
        )));
    }
    Ok(())
}

pub(crate) fn wrap_kek(op: &str, key: &SymmetricKey, kek: &SymmetricKey) -> KeyGraphResult<CipherEnvelope> {
    encrypt_with(key, kek.as_bytes()).context(op)
}

pub(crate) fn unwrap_kek(op: &str, key: &SymmetricKey, wrapped: &CipherEnvelope) -> KeyGraphResult<SymmetricKey> {
    let raw = decrypt_with(key, wrapped).context(op)?;
    SymmetricKey::from_slice(&raw).context(op)
}

/// Verifies a password against a user's stored hash. Users that never set a
/// password fail like a wrong password.
pub(crate) fn verify_password(op: &str, user: &AccountUser, password: &str) -> KeyGraphResult<()> {
    let hashed = user
        .hashed_password
        .as_ref()
        .ok_or_else(|| KeyGraphError::CredentialMismatch(op.to_string()))?;
    compare_string(password, hashed).context(op)
}
