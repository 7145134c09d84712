//! Shared helpers for key graph integration tests.
#![allow(dead_code)]

use keygraph_accounts::{
    BootstrapAccount, BootstrapAccountUser, BootstrapConfig, KeyGraph, KeyGraphConfig,
    LocalEncrypter,
};
use keygraph_crypto::MasterKey;
use keygraph_store::{
    Account, AccountUser, AdminLevel, Event, EventQuery, MemoryStore, Relationship, Secret, Store,
    StoreError, StoreResult, Tombstone, Transaction,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const ALICE: &str = "alice@acme.test";
pub const ALICE_PASSWORD: &str = "correct-password";
pub const BOB: &str = "bob@acme.test";
pub const BOB_PASSWORD: &str = "bob-password-1";

/// Key graph over a fresh in-memory store, with small RSA keys.
pub fn graph() -> (KeyGraph, MemoryStore) {
    graph_with(KeyGraphConfig::fast_keys())
}

pub fn graph_with(config: KeyGraphConfig) -> (KeyGraph, MemoryStore) {
    let store = MemoryStore::new();
    let graph = KeyGraph::new(
        Arc::new(store.clone()),
        Arc::new(LocalEncrypter::new(MasterKey::generate(1))),
        config,
    );
    (graph, store)
}

pub fn seed_user(email: &str, password: &str, accounts: Vec<Uuid>) -> BootstrapAccountUser {
    BootstrapAccountUser {
        email: email.into(),
        password: password.into(),
        accounts,
        admin_level: AdminLevel::None,
    }
}

/// Seeds one account "Acme" with alice as its only user.
pub async fn acme(graph: &KeyGraph) -> Uuid {
    let account_id = Uuid::new_v4();
    graph
        .bootstrap(BootstrapConfig {
            accounts: vec![BootstrapAccount {
                account_id,
                name: "Acme".into(),
            }],
            account_users: vec![seed_user(ALICE, ALICE_PASSWORD, vec![account_id])],
            force: false,
        })
        .await
        .unwrap();
    account_id
}

/// Private key JWK of `account_id` as seen by a login.
pub async fn private_key(graph: &KeyGraph, email: &str, password: &str, account_id: Uuid) -> String {
    let login = graph.login(email, password, true).await.unwrap();
    let account = login
        .accounts
        .into_iter()
        .find(|a| a.account_id == account_id)
        .expect("account not in login result");
    account.keys.expect("keys requested").private_key
}

// ── Hooked store ────────────────────────────────────────────────

type Hook = Box<dyn FnOnce(&MemoryStore) + Send>;

/// Memory store that can run a hook just before a chosen transaction opens
/// and can fail secret reads with a backend error.
pub struct HookedStore {
    inner: MemoryStore,
    opened: AtomicUsize,
    hook: Mutex<Option<(usize, Hook)>>,
    fail_secret_reads: AtomicBool,
}

impl HookedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            opened: AtomicUsize::new(0),
            hook: Mutex::new(None),
            fail_secret_reads: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Runs `hook` against the underlying store right before the `n`th
    /// transaction opened from now on (1 based).
    pub fn before_transaction(&self, n: usize, hook: impl FnOnce(&MemoryStore) + Send + 'static) {
        let at = self.opened.load(Ordering::SeqCst) + n;
        *self.hook.lock().unwrap() = Some((at, Box::new(hook)));
    }

    pub fn fail_secret_reads(&self, fail: bool) {
        self.fail_secret_reads.store(fail, Ordering::SeqCst);
    }
}

impl Store for HookedStore {
    fn transaction(&self) -> StoreResult<Box<dyn Transaction + '_>> {
        let n = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let due = {
            let mut slot = self.hook.lock().unwrap();
            match slot.take() {
                Some((at, hook)) if at == n => Some(hook),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(hook) = due {
            hook(&self.inner);
        }
        Ok(Box::new(HookedTransaction {
            inner: self.inner.transaction()?,
            fail_secret_reads: self.fail_secret_reads.load(Ordering::SeqCst),
        }))
    }
}

struct HookedTransaction<'a> {
    inner: Box<dyn Transaction + 'a>,
    fail_secret_reads: bool,
}

impl Transaction for HookedTransaction<'_> {
    fn is_empty(&self) -> StoreResult<bool> {
        self.inner.is_empty()
    }
    fn create_account(&mut self, account: Account) -> StoreResult<()> {
        self.inner.create_account(account)
    }
    fn find_account(&self, account_id: &Uuid) -> StoreResult<Account> {
        self.inner.find_account(account_id)
    }
    fn find_accounts(&self) -> StoreResult<Vec<Account>> {
        self.inner.find_accounts()
    }
    fn update_account(&mut self, account: &Account) -> StoreResult<()> {
        self.inner.update_account(account)
    }
    fn create_account_user(&mut self, user: AccountUser) -> StoreResult<()> {
        self.inner.create_account_user(user)
    }
    fn find_account_user(&self, account_user_id: &Uuid) -> StoreResult<AccountUser> {
        self.inner.find_account_user(account_user_id)
    }
    fn find_account_users(&self) -> StoreResult<Vec<AccountUser>> {
        self.inner.find_account_users()
    }
    fn update_account_user(&mut self, user: &AccountUser) -> StoreResult<()> {
        self.inner.update_account_user(user)
    }
    fn create_relationship(&mut self, relationship: Relationship) -> StoreResult<()> {
        self.inner.create_relationship(relationship)
    }
    fn update_relationship(&mut self, relationship: &Relationship) -> StoreResult<()> {
        self.inner.update_relationship(relationship)
    }
    fn delete_relationships_for_account(&mut self, account_id: &Uuid) -> StoreResult<usize> {
        self.inner.delete_relationships_for_account(account_id)
    }
    fn create_secret(&mut self, secret: Secret) -> StoreResult<()> {
        self.inner.create_secret(secret)
    }
    fn find_secret(&self, secret_id: &str) -> StoreResult<Secret> {
        if self.fail_secret_reads {
            return Err(StoreError::Backend("secret table unavailable".into()));
        }
        self.inner.find_secret(secret_id)
    }
    fn delete_secret(&mut self, secret_id: &str) -> StoreResult<()> {
        self.inner.delete_secret(secret_id)
    }
    fn create_event(&mut self, event: Event) -> StoreResult<()> {
        self.inner.create_event(event)
    }
    fn find_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        self.inner.find_events(query)
    }
    fn delete_events(&mut self, event_ids: &[Uuid]) -> StoreResult<usize> {
        self.inner.delete_events(event_ids)
    }
    fn delete_events_before(&mut self, cutoff: &Uuid) -> StoreResult<usize> {
        self.inner.delete_events_before(cutoff)
    }
    fn create_tombstone(&mut self, tombstone: Tombstone) -> StoreResult<()> {
        self.inner.create_tombstone(tombstone)
    }
    fn find_tombstones(&self, query: &EventQuery) -> StoreResult<Vec<Tombstone>> {
        self.inner.find_tombstones(query)
    }
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.inner.commit()
    }
}

/// Key graph over a [`HookedStore`].
pub fn hooked_graph() -> (KeyGraph, Arc<HookedStore>) {
    let store = Arc::new(HookedStore::new());
    let graph = KeyGraph::new(
        store.clone(),
        Arc::new(LocalEncrypter::new(MasterKey::generate(1))),
        KeyGraphConfig::fast_keys(),
    );
    (graph, store)
}

/// Stored copy of an account user.
pub fn stored_user(store: &MemoryStore, account_user_id: &Uuid) -> AccountUser {
    store
        .transaction()
        .unwrap()
        .find_account_user(account_user_id)
        .unwrap()
}
