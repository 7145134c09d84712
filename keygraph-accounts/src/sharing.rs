//! Inviting account users and accepting invitations.

use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::graph::{
    KeyGraph, blocking, ensure_unchanged, normalize_email, unwrap_kek, verify_password, wrap_kek,
};
use crate::results::InviteResult;
use keygraph_crypto::{derive_key, hash_string, new_salt, validate_password};
use keygraph_store::{AccountUser, AdminLevel, Relationship};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

impl KeyGraph {
    /// Shares the inviter's accounts with `invitee_email`.
    ///
    /// With `account_id` only that account is shared, otherwise every
    /// account the inviter has unlocked. Accounts the invitee can already
    /// access are skipped. Unknown invitees are created without a password;
    /// they set one through [`KeyGraph::join`].
    pub async fn invite_user(
        &self,
        invitee_email: &str,
        inviter_email: &str,
        inviter_password: &str,
        account_id: Option<Uuid>,
    ) -> KeyGraphResult<InviteResult> {
        const OP: &str = "invite user";
        let invitee_email = normalize_email(invitee_email);
        if invitee_email.is_empty() || !invitee_email.contains('@') {
            return Err(KeyGraphError::Validation(format!("{OP}: invitee email is not an address")));
        }
        let inviter = self.find_user_by_email(OP, &normalize_email(inviter_email)).await?;
        let scan = self.scan_email(OP, &invitee_email).await?;
        let existing = scan.found.clone();
        if existing
            .as_ref()
            .is_some_and(|u| u.account_user_id == inviter.account_user_id)
        {
            return Err(KeyGraphError::Validation(format!("{OP}: cannot invite yourself")));
        }

        let (inviter_key, invitee, invitee_key) = {
            let inviter = inviter.clone();
            let password = inviter_password.to_owned();
            let existing = existing.clone();
            let invitee_email = invitee_email.clone();
            blocking(OP, move || {
                verify_password(OP, &inviter, &password)?;
                let inviter_key = derive_key(&password, &inviter.salt).context(OP)?;
                let invitee = match existing {
                    Some(user) => user,
                    None => AccountUser {
                        account_user_id: Uuid::new_v4(),
                        hashed_email: hash_string(&invitee_email).context(OP)?,
                        hashed_password: None,
                        salt: new_salt(),
                        admin_level: AdminLevel::None,
                        relationships: Vec::new(),
                    },
                };
                let invitee_key = derive_key(&invitee_email, &invitee.salt).context(OP)?;
                Ok((inviter_key, invitee, invitee_key))
            })
            .await?
        };

        let already: HashSet<Uuid> = invitee.relationships.iter().map(|r| r.account_id).collect();
        let shareable: Vec<&Relationship> = inviter
            .relationships
            .iter()
            .filter(|r| !r.is_pending())
            .filter(|r| account_id.is_none_or(|id| r.account_id == id))
            .collect();
        if let Some(id) = account_id
            && shareable.is_empty()
        {
            return Err(KeyGraphError::UnknownAccount(format!("{OP}: inviter cannot access {id}")));
        }

        let mut granted = Vec::new();
        for rel in shareable.into_iter().filter(|r| !already.contains(&r.account_id)) {
            let wrapped = rel.password_wrapped_kek.as_ref().ok_or_else(|| {
                KeyGraphError::Decryption(format!("{OP}: relationship has no password branch"))
            })?;
            let kek = unwrap_kek(OP, &inviter_key, wrapped)?;
            granted.push(Relationship::new(
                invitee.account_user_id,
                rel.account_id,
                wrap_kek(OP, &invitee_key, &kek)?,
            ));
        }

        let account_names = self.write(OP, |tx| {
            ensure_unchanged(tx, OP, &inviter)?;
            match &existing {
                Some(user) => ensure_unchanged(tx, OP, user)?,
                None => {
                    if let Some(other) = scan.claimed_since(tx, OP, &invitee_email, None)? {
                        return Err(KeyGraphError::Transaction(format!(
                            "{OP}: account user {other} claimed the invitee email concurrently"
                        )));
                    }
                    tx.create_account_user(invitee.clone()).context(OP)?
                }
            }
            let mut names = Vec::with_capacity(granted.len());
            for rel in granted {
                names.push(tx.find_account(&rel.account_id).context(OP)?.name);
                tx.create_relationship(rel).context(OP)?;
            }
            Ok(names)
        })?;

        info!(
            inviter = %inviter.account_user_id,
            invitee = %invitee.account_user_id,
            accounts = account_names.len(),
            "shared accounts"
        );
        Ok(InviteResult {
            account_names,
            user_exists_with_password: invitee.hashed_password.is_some(),
        })
    }

    /// Sets the first password of an invited user and unlocks every
    /// account they were invited to.
    pub async fn join(&self, email: &str, password: &str) -> KeyGraphResult<()> {
        const OP: &str = "join";
        validate_password(password).context(OP)?;
        let email = normalize_email(email);
        let user = self.find_user_by_email(OP, &email).await?;
        if user.hashed_password.is_some() {
            return Err(KeyGraphError::Validation(format!("{OP}: user has already joined")));
        }

        let (email_key, password_key, password_hash) = {
            let salt = user.salt.clone();
            let password = password.to_owned();
            blocking(OP, move || {
                Ok((
                    derive_key(&email, &salt).context(OP)?,
                    derive_key(&password, &salt).context(OP)?,
                    hash_string(&password).context(OP)?,
                ))
            })
            .await?
        };

        let mut relationships = user.relationships.clone();
        for rel in relationships.iter_mut() {
            let kek = unwrap_kek(OP, &email_key, &rel.email_wrapped_kek)?;
            rel.password_wrapped_kek = Some(wrap_kek(OP, &password_key, &kek)?);
        }

        self.write(OP, |tx| {
            ensure_unchanged(tx, OP, &user)?;
            for rel in &relationships {
                tx.update_relationship(rel).context(OP)?;
            }
            let mut updated = user.clone();
            updated.hashed_password = Some(password_hash);
            tx.update_account_user(&updated).context(OP)
        })?;
        info!(account_user_id = %user.account_user_id, accounts = relationships.len(), "joined");
        Ok(())
    }
}
