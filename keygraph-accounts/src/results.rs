//! Values returned by key graph operations.

use chrono::{DateTime, Utc};
use keygraph_crypto::{CipherEnvelope, SymmetricKey};
use keygraph_store::AdminLevel;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Outcome of a successful login.
#[derive(Debug)]
pub struct LoginResult {
    pub account_user_id: Uuid,
    pub admin_level: AdminLevel,
    pub accounts: Vec<LoginAccount>,
}

#[derive(Debug)]
pub struct LoginAccount {
    pub account_id: Uuid,
    pub name: String,
    pub created: DateTime<Utc>,
    /// Public RSA key as JWK JSON.
    pub public_key: String,
    /// Present only when keys were requested.
    pub keys: Option<AccountKeys>,
}

/// Unwrapped key material for one account.
pub struct AccountKeys {
    pub key_encryption_key: SymmetricKey,
    /// Private RSA key as JWK JSON.
    pub private_key: String,
}

impl fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeys")
            .field("key_encryption_key", &self.key_encryption_key)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Non-secret view of an account user.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AccountUserInfo {
    pub account_user_id: Uuid,
    pub admin_level: AdminLevel,
    pub account_ids: Vec<Uuid>,
    /// Accounts the user was invited to but has not unlocked yet.
    pub pending_account_ids: Vec<Uuid>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InviteResult {
    /// Names of the accounts the invitee was added to.
    pub account_names: Vec<String>,
    /// Whether the invitee could already log in before this invitation.
    pub user_exists_with_password: bool,
}

/// A stored event as handed back to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventResult {
    pub event_id: Uuid,
    pub sequence: Uuid,
    pub secret_id: Option<String>,
    pub payload: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct AccountResult {
    pub account_id: Uuid,
    pub name: String,
    pub created: DateTime<Utc>,
    pub public_key: String,
    /// Only populated when events were requested.
    pub encrypted_private_key: Option<CipherEnvelope>,
    pub events: Vec<EventResult>,
    /// Encrypted secrets referenced by `events`, keyed by secret id.
    pub secrets: HashMap<String, String>,
    /// Ids of events deleted after the requested sequence.
    pub deleted_events: Vec<Uuid>,
    /// Latest sequence covered by this result, to pass as `since` next time.
    pub sequence: Option<Uuid>,
}

/// Events of one end user, across accounts.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EventsResult {
    pub events: BTreeMap<Uuid, Vec<EventResult>>,
    pub deleted_events: Vec<Uuid>,
    pub sequence: Option<Uuid>,
}

/// Outcome of storing an end user's secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretAssociation {
    pub secret_id: String,
    /// Id the previous secret was parked under, if one existed.
    pub parked_secret_id: Option<String>,
    /// Number of events moved to the parked id.
    pub migrated_events: usize,
}

impl From<&keygraph_store::Event> for EventResult {
    fn from(event: &keygraph_store::Event) -> Self {
        Self {
            event_id: event.event_id,
            sequence: event.sequence,
            secret_id: event.secret_id.clone(),
            payload: event.payload.clone(),
        }
    }
}
