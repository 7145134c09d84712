//! Records persisted by the key graph.

use chrono::{DateTime, Utc};
use keygraph_crypto::{CipherEnvelope, CryptoResult, hash_fast};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant. Its RSA private key is only ever stored wrapped under the
/// account's key-encryption key, which itself is never stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub name: String,
    /// Public RSA key as JWK JSON.
    pub public_key: String,
    /// Private RSA key (JWK JSON) encrypted under the KEK.
    pub encrypted_private_key: CipherEnvelope,
    /// Salt for hashing end-user identifiers into secret ids.
    pub user_salt: CipherEnvelope,
    pub retired: bool,
    pub created: DateTime<Utc>,
}

impl Account {
    /// Hashes a pseudonymous end-user id into this account's secret id space.
    pub fn hash_user_id(&self, user_id: &str) -> CryptoResult<String> {
        hash_fast(user_id, &self.user_salt)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    #[default]
    None,
    SuperAdmin,
}

/// A person who can log in. Identified by a memory-hard hash of their email.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountUser {
    pub account_user_id: Uuid,
    pub hashed_email: CipherEnvelope,
    /// `None` until an invited user joins.
    pub hashed_password: Option<CipherEnvelope>,
    /// KDF salt shared by the password and email derived keys.
    pub salt: CipherEnvelope,
    pub admin_level: AdminLevel,
    /// Populated on reads; writes go through the relationship methods.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Grants one account user access to one account's KEK.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub relationship_id: Uuid,
    pub account_user_id: Uuid,
    pub account_id: Uuid,
    /// `None` while an invitation is pending.
    pub password_wrapped_kek: Option<CipherEnvelope>,
    pub email_wrapped_kek: CipherEnvelope,
    /// Present only between a reset request and its completion.
    pub one_time_wrapped_kek: Option<CipherEnvelope>,
}

impl Relationship {
    pub fn new(account_user_id: Uuid, account_id: Uuid, email_wrapped_kek: CipherEnvelope) -> Self {
        Self {
            relationship_id: Uuid::new_v4(),
            account_user_id,
            account_id,
            password_wrapped_kek: None,
            email_wrapped_kek,
            one_time_wrapped_kek: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.password_wrapped_kek.is_none()
    }
}

/// An end user's secret, encrypted for the account owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub secret_id: String,
    pub encrypted_secret: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub sequence: Uuid,
    pub account_id: Uuid,
    /// `None` for anonymous events.
    pub secret_id: Option<String>,
    /// Opaque ciphertext.
    pub payload: String,
}

/// Marks an event that was deleted, so clients syncing since an earlier
/// sequence learn about the removal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub event_id: Uuid,
    pub account_id: Uuid,
    pub secret_id: Option<String>,
    pub sequence: Uuid,
}

impl Tombstone {
    pub fn for_event(event: &Event, sequence: Uuid) -> Self {
        Self {
            event_id: event.event_id,
            account_id: event.account_id,
            secret_id: event.secret_id.clone(),
            sequence,
        }
    }
}

/// Filters for events and tombstones. Unset fields do not filter.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub account_ids: Option<Vec<Uuid>>,
    pub secret_ids: Option<Vec<String>>,
    /// Only records with a sequence strictly after this one.
    pub since: Option<Uuid>,
}

impl EventQuery {
    pub fn for_accounts(account_ids: Vec<Uuid>) -> Self {
        Self {
            account_ids: Some(account_ids),
            ..Self::default()
        }
    }

    pub fn for_secrets(secret_ids: Vec<String>) -> Self {
        Self {
            secret_ids: Some(secret_ids),
            ..Self::default()
        }
    }

    pub fn since(mut self, since: Option<Uuid>) -> Self {
        self.since = since;
        self
    }

    pub(crate) fn matches(
        &self,
        account_id: &Uuid,
        secret_id: Option<&String>,
        sequence: &Uuid,
    ) -> bool {
        if let Some(ids) = &self.account_ids
            && !ids.contains(account_id)
        {
            return false;
        }
        if let Some(ids) = &self.secret_ids {
            match secret_id {
                Some(id) if ids.contains(id) => {}
                _ => return false,
            }
        }
        self.since.is_none_or(|since| *sequence > since)
    }
}
