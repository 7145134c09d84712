//! Account lifecycle.

use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::graph::{KeyGraph, blocking, ensure_unchanged, normalize_email, verify_password, wrap_kek};
use crate::results::{AccountResult, EventResult};
use chrono::Utc;
use keygraph_crypto::{
    SymmetricKey, derive_key, encrypt_with, generate_rsa_keypair, new_fast_salt,
};
use keygraph_store::ids::latest_sequence;
use keygraph_store::{Account, EventQuery, Relationship, StoreError};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

impl KeyGraph {
    /// Creates an account owned by an existing account user.
    ///
    /// A fresh RSA keypair and KEK are generated; the private key is stored
    /// encrypted under the KEK and the KEK is wrapped under both the
    /// creator's password and email derived keys.
    pub async fn create_account(
        &self,
        name: &str,
        creator_email: &str,
        creator_password: &str,
    ) -> KeyGraphResult<Uuid> {
        const OP: &str = "create account";
        let name = name.trim().to_owned();
        if name.is_empty() {
            return Err(KeyGraphError::Validation(format!("{OP}: account name must not be empty")));
        }
        let email = normalize_email(creator_email);
        let creator = self.find_user_by_email(OP, &email).await?;

        let (email_key, password_key, keypair) = {
            let creator = creator.clone();
            let password = creator_password.to_owned();
            let bits = self.config().rsa_key_bits;
            blocking(OP, move || {
                verify_password(OP, &creator, &password)?;
                Ok((
                    derive_key(&email, &creator.salt).context(OP)?,
                    derive_key(&password, &creator.salt).context(OP)?,
                    generate_rsa_keypair(bits).context(OP)?,
                ))
            })
            .await?
        };

        let kek = SymmetricKey::generate();
        let account = Account {
            account_id: Uuid::new_v4(),
            name,
            public_key: keypair.public_jwk,
            encrypted_private_key: encrypt_with(&kek, keypair.private_jwk.as_bytes()).context(OP)?,
            user_salt: new_fast_salt(),
            retired: false,
            created: Utc::now(),
        };
        let mut relationship = Relationship::new(
            creator.account_user_id,
            account.account_id,
            wrap_kek(OP, &email_key, &kek)?,
        );
        relationship.password_wrapped_kek = Some(wrap_kek(OP, &password_key, &kek)?);

        let account_id = account.account_id;
        self.write(OP, |tx| {
            if tx.find_accounts().context(OP)?.iter().any(|a| a.name == account.name) {
                return Err(KeyGraphError::Validation(format!(
                    "{OP}: an account named {:?} already exists",
                    account.name
                )));
            }
            ensure_unchanged(tx, OP, &creator)?;
            tx.create_account(account).context(OP)?;
            tx.create_relationship(relationship).context(OP)
        })?;
        info!(%account_id, account_user_id = %creator.account_user_id, "created account");
        Ok(account_id)
    }

    /// Marks an account retired and removes every relationship to it, which
    /// makes its KEK unrecoverable.
    pub fn retire_account(&self, account_id: &Uuid) -> KeyGraphResult<()> {
        const OP: &str = "retire account";
        let removed = self.write(OP, |tx| {
            let mut account = tx.find_account(account_id).context(OP)?;
            if account.retired {
                return Err(KeyGraphError::UnknownAccount(format!("{OP}: {account_id} is already retired")));
            }
            account.retired = true;
            tx.update_account(&account).context(OP)?;
            tx.delete_relationships_for_account(account_id).context(OP)
        })?;
        info!(%account_id, relationships = removed, "retired account");
        Ok(())
    }

    /// Reads an account. With `include_events` the result also carries the
    /// encrypted private key, the account's events after `since`, the
    /// secrets those events reference and the ids of events deleted after
    /// `since`.
    pub fn get_account(
        &self,
        account_id: &Uuid,
        include_events: bool,
        since: Option<Uuid>,
    ) -> KeyGraphResult<AccountResult> {
        const OP: &str = "get account";
        let account = self.active_account(OP, account_id)?;
        let mut result = AccountResult {
            account_id: account.account_id,
            name: account.name,
            created: account.created,
            public_key: account.public_key,
            encrypted_private_key: None,
            events: Vec::new(),
            secrets: HashMap::new(),
            deleted_events: Vec::new(),
            sequence: None,
        };
        if !include_events {
            return Ok(result);
        }

        let query = EventQuery::for_accounts(vec![*account_id]).since(since);
        let (events, secrets, tombstones) = self.read(OP, |tx| {
            let events = tx.find_events(&query)?;
            let mut secrets = HashMap::new();
            for secret_id in events.iter().filter_map(|e| e.secret_id.as_ref()) {
                if secrets.contains_key(secret_id) {
                    continue;
                }
                match tx.find_secret(secret_id) {
                    Ok(secret) => {
                        secrets.insert(secret.secret_id, secret.encrypted_secret);
                    }
                    // Parked or purged secrets leave their events behind.
                    Err(StoreError::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
            let tombstones = if since.is_some() {
                tx.find_tombstones(&query)?
            } else {
                Vec::new()
            };
            Ok((events, secrets, tombstones))
        })?;

        result.sequence = latest_sequence(
            events
                .iter()
                .map(|e| &e.sequence)
                .chain(tombstones.iter().map(|t| &t.sequence)),
        )
        .or(since);
        result.encrypted_private_key = Some(account.encrypted_private_key);
        result.events = events.iter().map(EventResult::from).collect();
        result.secrets = secrets;
        result.deleted_events = tombstones.into_iter().map(|t| t.event_id).collect();
        Ok(result)
    }
}
