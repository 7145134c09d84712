//! Seeding an empty store.

use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::graph::{KeyGraph, blocking, normalize_email, wrap_kek};
use chrono::Utc;
use keygraph_crypto::{
    SymmetricKey, derive_key, encrypt_with, generate_rsa_keypair, hash_string, new_fast_salt,
    new_salt, validate_password,
};
use keygraph_store::{Account, AccountUser, AdminLevel, Relationship};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

/// Initial accounts and account users.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub accounts: Vec<BootstrapAccount>,
    pub account_users: Vec<BootstrapAccountUser>,
    /// Seed even if the store already holds data.
    #[serde(default)]
    pub force: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapAccount {
    pub account_id: Uuid,
    pub name: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BootstrapAccountUser {
    pub email: String,
    pub password: String,
    /// Accounts this user gets full access to.
    pub accounts: Vec<Uuid>,
    #[serde(default)]
    pub admin_level: AdminLevel,
}

impl std::fmt::Debug for BootstrapAccountUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAccountUser")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("accounts", &self.accounts)
            .field("admin_level", &self.admin_level)
            .finish()
    }
}

impl KeyGraph {
    /// Creates the configured accounts, users and relationships in one
    /// transaction. Refuses to touch a store that already holds accounts or
    /// users unless `force` is set; forced seeding adds to the existing
    /// data and fails on id collisions.
    pub async fn bootstrap(&self, config: BootstrapConfig) -> KeyGraphResult<()> {
        const OP: &str = "bootstrap";
        let known: HashMap<Uuid, &str> = config
            .accounts
            .iter()
            .map(|a| (a.account_id, a.name.as_str()))
            .collect();
        if known.len() != config.accounts.len() {
            return Err(KeyGraphError::Validation(format!("{OP}: duplicate account id")));
        }
        for user in &config.account_users {
            validate_password(&user.password).context(OP)?;
            if let Some(id) = user.accounts.iter().find(|id| !known.contains_key(id)) {
                return Err(KeyGraphError::Validation(format!(
                    "{OP}: user references unknown account {id}"
                )));
            }
        }
        if !config.force && !self.read(OP, |tx| tx.is_empty())? {
            return Err(KeyGraphError::Validation(format!(
                "{OP}: store is not empty, refusing to seed without force"
            )));
        }

        let bits = self.config().rsa_key_bits;
        let mut keks = HashMap::new();
        let mut accounts = Vec::with_capacity(config.accounts.len());
        for seed in &config.accounts {
            let keypair = blocking(OP, move || generate_rsa_keypair(bits).context(OP)).await?;
            let kek = SymmetricKey::generate();
            accounts.push(Account {
                account_id: seed.account_id,
                name: seed.name.clone(),
                public_key: keypair.public_jwk,
                encrypted_private_key: encrypt_with(&kek, keypair.private_jwk.as_bytes()).context(OP)?,
                user_salt: new_fast_salt(),
                retired: false,
                created: Utc::now(),
            });
            keks.insert(seed.account_id, kek);
        }

        let mut users = Vec::with_capacity(config.account_users.len());
        let mut relationships = Vec::new();
        for seed in config.account_users {
            let email = normalize_email(&seed.email);
            let password = seed.password;
            let admin_level = seed.admin_level;
            let (user, email_key, password_key) = blocking(OP, move || {
                let salt = new_salt();
                let email_key = derive_key(&email, &salt).context(OP)?;
                let password_key = derive_key(&password, &salt).context(OP)?;
                let user = AccountUser {
                    account_user_id: Uuid::new_v4(),
                    hashed_email: hash_string(&email).context(OP)?,
                    hashed_password: Some(hash_string(&password).context(OP)?),
                    salt,
                    admin_level,
                    relationships: Vec::new(),
                };
                Ok((user, email_key, password_key))
            })
            .await?;

            for account_id in &seed.accounts {
                let Some(kek) = keks.get(account_id) else {
                    continue;
                };
                let mut rel = Relationship::new(
                    user.account_user_id,
                    *account_id,
                    wrap_kek(OP, &email_key, kek)?,
                );
                rel.password_wrapped_kek = Some(wrap_kek(OP, &password_key, kek)?);
                relationships.push(rel);
            }
            users.push(user);
        }

        let (account_count, user_count) = (accounts.len(), users.len());
        self.write(OP, |tx| {
            if !tx.is_empty().context(OP)? {
                if !config.force {
                    return Err(KeyGraphError::Validation(format!(
                        "{OP}: store is not empty, refusing to seed without force"
                    )));
                }
                warn!("seeding a non-empty store");
            }
            for account in accounts {
                tx.create_account(account).context(OP)?;
            }
            for user in users {
                tx.create_account_user(user).context(OP)?;
            }
            for rel in relationships {
                tx.create_relationship(rel).context(OP)?;
            }
            Ok(())
        })?;
        info!(accounts = account_count, account_users = user_count, "bootstrapped store");
        Ok(())
    }
}
