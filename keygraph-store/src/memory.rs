//! In-memory reference store.
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! private view of the tables, which replaces the shared tables on commit.
//! Writers are therefore fully serialized. Tables are shared copy-on-write:
//! opening a transaction copies nothing, and a table is copied only when a
//! transaction first writes to it.

use crate::entities::{Account, AccountUser, Event, EventQuery, Relationship, Secret, Tombstone};
use crate::error::{EntityKind, StoreError, StoreResult};
use crate::transaction::{Store, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Default)]
struct Tables {
    accounts: Arc<BTreeMap<Uuid, Account>>,
    account_users: Arc<BTreeMap<Uuid, AccountUser>>,
    relationships: Arc<BTreeMap<Uuid, Relationship>>,
    secrets: Arc<HashMap<String, Secret>>,
    events: Arc<BTreeMap<Uuid, Event>>,
    tombstones: Arc<Vec<Tombstone>>,
}

impl Tables {
    fn with_relationships(&self, user: &AccountUser) -> AccountUser {
        let mut user = user.clone();
        user.relationships = self
            .relationships
            .values()
            .filter(|r| r.account_user_id == user.account_user_id)
            .cloned()
            .collect();
        user
    }
}

/// Thread-safe in-memory [`Store`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) -> StoreResult<MemoryTransaction<'_>> {
        let guard = self
            .tables
            .lock()
            .map_err(|e| StoreError::Backend(format!("store lock poisoned: {e}")))?;
        let working = guard.clone();
        Ok(MemoryTransaction {
            guard,
            working,
            dirty: false,
        })
    }
}

impl Store for MemoryStore {
    fn transaction(&self) -> StoreResult<Box<dyn Transaction + '_>> {
        Ok(Box::new(self.begin()?))
    }
}

struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, Tables>,
    working: Tables,
    dirty: bool,
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.dirty {
            debug!("rolling back uncommitted transaction");
        }
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.working.accounts.is_empty() && self.working.account_users.is_empty())
    }

    fn create_account(&mut self, account: Account) -> StoreResult<()> {
        if self.working.accounts.contains_key(&account.account_id) {
            return Err(StoreError::conflict(EntityKind::Account, account.account_id));
        }
        self.dirty = true;
        Arc::make_mut(&mut self.working.accounts).insert(account.account_id, account);
        Ok(())
    }

    fn find_account(&self, account_id: &Uuid) -> StoreResult<Account> {
        self.working
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Account, account_id))
    }

    fn find_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(self.working.accounts.values().cloned().collect())
    }

    fn update_account(&mut self, account: &Account) -> StoreResult<()> {
        let slot = Arc::make_mut(&mut self.working.accounts)
            .get_mut(&account.account_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Account, account.account_id))?;
        *slot = account.clone();
        self.dirty = true;
        Ok(())
    }

    fn create_account_user(&mut self, mut user: AccountUser) -> StoreResult<()> {
        if self.working.account_users.contains_key(&user.account_user_id) {
            return Err(StoreError::conflict(EntityKind::AccountUser, user.account_user_id));
        }
        user.relationships.clear();
        self.dirty = true;
        Arc::make_mut(&mut self.working.account_users).insert(user.account_user_id, user);
        Ok(())
    }

    fn find_account_user(&self, account_user_id: &Uuid) -> StoreResult<AccountUser> {
        self.working
            .account_users
            .get(account_user_id)
            .map(|u| self.working.with_relationships(u))
            .ok_or_else(|| StoreError::not_found(EntityKind::AccountUser, account_user_id))
    }

    fn find_account_users(&self) -> StoreResult<Vec<AccountUser>> {
        Ok(self
            .working
            .account_users
            .values()
            .map(|u| self.working.with_relationships(u))
            .collect())
    }

    fn update_account_user(&mut self, user: &AccountUser) -> StoreResult<()> {
        let slot = Arc::make_mut(&mut self.working.account_users)
            .get_mut(&user.account_user_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::AccountUser, user.account_user_id))?;
        *slot = AccountUser {
            relationships: Vec::new(),
            ..user.clone()
        };
        self.dirty = true;
        Ok(())
    }

    fn create_relationship(&mut self, relationship: Relationship) -> StoreResult<()> {
        if !self.working.account_users.contains_key(&relationship.account_user_id) {
            return Err(StoreError::not_found(
                EntityKind::AccountUser,
                relationship.account_user_id,
            ));
        }
        if !self.working.accounts.contains_key(&relationship.account_id) {
            return Err(StoreError::not_found(EntityKind::Account, relationship.account_id));
        }
        let duplicate = self.working.relationships.values().any(|r| {
            r.account_user_id == relationship.account_user_id && r.account_id == relationship.account_id
        });
        if duplicate || self.working.relationships.contains_key(&relationship.relationship_id) {
            return Err(StoreError::conflict(
                EntityKind::Relationship,
                relationship.relationship_id,
            ));
        }
        self.dirty = true;
        Arc::make_mut(&mut self.working.relationships)
            .insert(relationship.relationship_id, relationship);
        Ok(())
    }

    fn update_relationship(&mut self, relationship: &Relationship) -> StoreResult<()> {
        let slot = Arc::make_mut(&mut self.working.relationships)
            .get_mut(&relationship.relationship_id)
            .ok_or_else(|| {
                StoreError::not_found(EntityKind::Relationship, relationship.relationship_id)
            })?;
        *slot = relationship.clone();
        self.dirty = true;
        Ok(())
    }

    fn delete_relationships_for_account(&mut self, account_id: &Uuid) -> StoreResult<usize> {
        if !self.working.relationships.values().any(|r| r.account_id == *account_id) {
            return Ok(0);
        }
        let relationships = Arc::make_mut(&mut self.working.relationships);
        let before = relationships.len();
        relationships.retain(|_, r| r.account_id != *account_id);
        let removed = before - relationships.len();
        self.dirty |= removed > 0;
        Ok(removed)
    }

    fn create_secret(&mut self, secret: Secret) -> StoreResult<()> {
        if self.working.secrets.contains_key(&secret.secret_id) {
            return Err(StoreError::conflict(EntityKind::Secret, &secret.secret_id));
        }
        self.dirty = true;
        Arc::make_mut(&mut self.working.secrets).insert(secret.secret_id.clone(), secret);
        Ok(())
    }

    fn find_secret(&self, secret_id: &str) -> StoreResult<Secret> {
        self.working
            .secrets
            .get(secret_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Secret, secret_id))
    }

    fn delete_secret(&mut self, secret_id: &str) -> StoreResult<()> {
        if !self.working.secrets.contains_key(secret_id) {
            return Err(StoreError::not_found(EntityKind::Secret, secret_id));
        }
        Arc::make_mut(&mut self.working.secrets)
            .remove(secret_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Secret, secret_id))?;
        self.dirty = true;
        Ok(())
    }

    fn create_event(&mut self, event: Event) -> StoreResult<()> {
        if self.working.events.contains_key(&event.event_id) {
            return Err(StoreError::conflict(EntityKind::Event, event.event_id));
        }
        self.dirty = true;
        Arc::make_mut(&mut self.working.events).insert(event.event_id, event);
        Ok(())
    }

    fn find_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        Ok(self
            .working
            .events
            .values()
            .filter(|e| query.matches(&e.account_id, e.secret_id.as_ref(), &e.sequence))
            .cloned()
            .collect())
    }

    fn delete_events(&mut self, event_ids: &[Uuid]) -> StoreResult<usize> {
        if !event_ids.iter().any(|id| self.working.events.contains_key(id)) {
            return Ok(0);
        }
        let events = Arc::make_mut(&mut self.working.events);
        let removed = event_ids
            .iter()
            .filter(|id| events.remove(*id).is_some())
            .count();
        self.dirty |= removed > 0;
        Ok(removed)
    }

    fn delete_events_before(&mut self, cutoff: &Uuid) -> StoreResult<usize> {
        let expired: Vec<Uuid> = self.working.events.range(..*cutoff).map(|(id, _)| *id).collect();
        self.delete_events(&expired)
    }

    fn create_tombstone(&mut self, tombstone: Tombstone) -> StoreResult<()> {
        self.dirty = true;
        Arc::make_mut(&mut self.working.tombstones).push(tombstone);
        Ok(())
    }

    fn find_tombstones(&self, query: &EventQuery) -> StoreResult<Vec<Tombstone>> {
        Ok(self
            .working
            .tombstones
            .iter()
            .filter(|t| query.matches(&t.account_id, t.secret_id.as_ref(), &t.sequence))
            .cloned()
            .collect())
    }

    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let working = std::mem::take(&mut self.working);
        *self.guard = working;
        self.dirty = false;
        Ok(())
    }
}
