//! The persistence contract the key graph is written against.

use crate::entities::{Account, AccountUser, Event, EventQuery, Relationship, Secret, Tombstone};
use crate::error::StoreResult;
use uuid::Uuid;

/// A source of transactions.
pub trait Store: Send + Sync {
    /// Opens a transaction. Everything done through it becomes visible to
    /// other transactions only once [`Transaction::commit`] succeeds.
    fn transaction(&self) -> StoreResult<Box<dyn Transaction + '_>>;
}

/// A scoped unit of work.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it
/// back, so every early return through `?` discards partial writes.
pub trait Transaction {
    /// True when no accounts and no account users exist.
    fn is_empty(&self) -> StoreResult<bool>;

    fn create_account(&mut self, account: Account) -> StoreResult<()>;
    fn find_account(&self, account_id: &Uuid) -> StoreResult<Account>;
    fn find_accounts(&self) -> StoreResult<Vec<Account>>;
    fn update_account(&mut self, account: &Account) -> StoreResult<()>;

    /// Inserts the user record. Its `relationships` are ignored.
    fn create_account_user(&mut self, user: AccountUser) -> StoreResult<()>;
    /// Looks up a user with all of its relationships attached.
    fn find_account_user(&self, account_user_id: &Uuid) -> StoreResult<AccountUser>;
    /// All users with their relationships attached.
    fn find_account_users(&self) -> StoreResult<Vec<AccountUser>>;
    /// Updates the user record. Its `relationships` are ignored.
    fn update_account_user(&mut self, user: &AccountUser) -> StoreResult<()>;

    fn create_relationship(&mut self, relationship: Relationship) -> StoreResult<()>;
    fn update_relationship(&mut self, relationship: &Relationship) -> StoreResult<()>;
    /// Removes every relationship pointing at the account.
    fn delete_relationships_for_account(&mut self, account_id: &Uuid) -> StoreResult<usize>;

    fn create_secret(&mut self, secret: Secret) -> StoreResult<()>;
    fn find_secret(&self, secret_id: &str) -> StoreResult<Secret>;
    fn delete_secret(&mut self, secret_id: &str) -> StoreResult<()>;

    fn create_event(&mut self, event: Event) -> StoreResult<()>;
    /// Matching events in event id order.
    fn find_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>>;
    fn delete_events(&mut self, event_ids: &[Uuid]) -> StoreResult<usize>;
    /// Deletes every event whose id sorts before `cutoff`. Event ids are
    /// v7, so this removes events created before the cutoff's timestamp.
    fn delete_events_before(&mut self, cutoff: &Uuid) -> StoreResult<usize>;

    fn create_tombstone(&mut self, tombstone: Tombstone) -> StoreResult<()>;
    fn find_tombstones(&self, query: &EventQuery) -> StoreResult<Vec<Tombstone>>;

    /// Makes all writes visible atomically.
    fn commit(self: Box<Self>) -> StoreResult<()>;
}
