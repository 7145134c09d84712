//! End-user secrets and the events bound to them.
//!
//! End users are pseudonymous: their id is only stored as a salted hash per
//! account. When an end user stores a new secret, everything recorded under
//! the old one moves to a randomly named parked secret, so the old data
//! stays readable with the old secret but is no longer linked to the id.

use crate::error::{Context, KeyGraphError, KeyGraphResult};
use crate::graph::KeyGraph;
use crate::results::{EventResult, EventsResult, SecretAssociation};
use chrono::Utc;
use keygraph_store::ids::{
    event_id_at, latest_sequence, new_event_id, next_sequence, sibling_event_id,
};
use keygraph_store::{Event, EventQuery, Secret, StoreError, Tombstone};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

impl KeyGraph {
    /// Stores `encrypted_secret` for `user_id` in an account.
    ///
    /// If the user already has a secret, the old secret and all events
    /// referencing it are moved to a fresh parked id in the same
    /// transaction. Moved events get new ids at their original timestamps
    /// and the originals are tombstoned.
    pub fn associate_user_secret(
        &self,
        account_id: &Uuid,
        user_id: &str,
        encrypted_secret: &str,
    ) -> KeyGraphResult<SecretAssociation> {
        const OP: &str = "associate user secret";
        if encrypted_secret.is_empty() {
            return Err(KeyGraphError::Validation(format!("{OP}: secret must not be empty")));
        }
        let account = self.active_account(OP, account_id)?;
        let secret_id = account.hash_user_id(user_id).context(OP)?;
        let parked_id = account.hash_user_id(&Uuid::new_v4().to_string()).context(OP)?;

        let association = self.write(OP, |tx| {
            let mut association = SecretAssociation {
                secret_id: secret_id.clone(),
                parked_secret_id: None,
                migrated_events: 0,
            };
            match tx.find_secret(&secret_id) {
                Ok(existing) => {
                    tx.create_secret(Secret {
                        secret_id: parked_id.clone(),
                        encrypted_secret: existing.encrypted_secret,
                    })
                    .context(OP)?;

                    let events = tx
                        .find_events(&EventQuery::for_secrets(vec![secret_id.clone()]))
                        .context(OP)?;
                    let sequence = next_sequence();
                    let mut moved = Vec::with_capacity(events.len());
                    for event in &events {
                        tx.create_event(Event {
                            event_id: sibling_event_id(&event.event_id).context(OP)?,
                            sequence,
                            account_id: event.account_id,
                            secret_id: Some(parked_id.clone()),
                            payload: event.payload.clone(),
                        })
                        .context(OP)?;
                        tx.create_tombstone(Tombstone::for_event(event, sequence))
                            .context(OP)?;
                        moved.push(event.event_id);
                    }
                    tx.delete_events(&moved).context(OP)?;
                    tx.delete_secret(&secret_id).context(OP)?;

                    association.parked_secret_id = Some(parked_id.clone());
                    association.migrated_events = moved.len();
                }
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(KeyGraphError::from_store(OP, e)),
            }
            tx.create_secret(Secret {
                secret_id: secret_id.clone(),
                encrypted_secret: encrypted_secret.to_owned(),
            })
            .context(OP)?;
            Ok(association)
        })?;

        if association.parked_secret_id.is_some() {
            info!(%account_id, events = association.migrated_events, "rotated user secret");
        } else {
            debug!(%account_id, "stored new user secret");
        }
        Ok(association)
    }

    /// Records an event. Events of an identified user require that user to
    /// have a secret in the account; `None` records an anonymous event.
    pub fn insert_event(
        &self,
        account_id: &Uuid,
        user_id: Option<&str>,
        payload: &str,
    ) -> KeyGraphResult<Uuid> {
        const OP: &str = "insert event";
        let account = self.active_account(OP, account_id)?;
        let secret_id = user_id
            .map(|id| account.hash_user_id(id))
            .transpose()
            .context(OP)?;
        let event = Event {
            event_id: new_event_id(),
            sequence: next_sequence(),
            account_id: *account_id,
            secret_id,
            payload: payload.to_owned(),
        };
        let event_id = event.event_id;
        self.write(OP, |tx| {
            if let Some(secret_id) = &event.secret_id {
                tx.find_secret(secret_id).context(OP)?;
            }
            tx.create_event(event).context(OP)
        })?;
        Ok(event_id)
    }

    /// Returns every event `user_id` has across all accounts, grouped by
    /// account, together with deletions after `since`.
    pub async fn query_events(&self, user_id: &str, since: Option<Uuid>) -> KeyGraphResult<EventsResult> {
        const OP: &str = "query events";
        let secret_ids = self.secret_ids_for(OP, user_id).await?;
        let query = EventQuery::for_secrets(secret_ids).since(since);
        let (events, tombstones) = self.read(OP, |tx| {
            let events = tx.find_events(&query)?;
            let tombstones = if since.is_some() {
                tx.find_tombstones(&query)?
            } else {
                Vec::new()
            };
            Ok((events, tombstones))
        })?;

        let sequence = latest_sequence(
            events
                .iter()
                .map(|e| &e.sequence)
                .chain(tombstones.iter().map(|t| &t.sequence)),
        )
        .or(since);
        let mut grouped: BTreeMap<Uuid, Vec<EventResult>> = BTreeMap::new();
        for event in &events {
            grouped.entry(event.account_id).or_default().push(event.into());
        }
        Ok(EventsResult {
            events: grouped,
            deleted_events: tombstones.into_iter().map(|t| t.event_id).collect(),
            sequence,
        })
    }

    /// Deletes every event `user_id` has across all accounts, leaving
    /// tombstones. Returns the number of deleted events.
    pub async fn purge(&self, user_id: &str) -> KeyGraphResult<usize> {
        const OP: &str = "purge";
        let secret_ids = self.secret_ids_for(OP, user_id).await?;
        let removed = self.write(OP, |tx| {
            let events = tx
                .find_events(&EventQuery::for_secrets(secret_ids))
                .context(OP)?;
            let sequence = next_sequence();
            for event in &events {
                tx.create_tombstone(Tombstone::for_event(event, sequence))
                    .context(OP)?;
            }
            let ids: Vec<Uuid> = events.iter().map(|e| e.event_id).collect();
            tx.delete_events(&ids).context(OP)
        })?;
        info!(events = removed, "purged end user events");
        Ok(removed)
    }

    /// Deletes every event older than `retention`. Event ids carry their
    /// creation time, so the cutoff is an id and no payload is read.
    pub fn expire(&self, retention: chrono::Duration) -> KeyGraphResult<usize> {
        const OP: &str = "expire events";
        if retention < chrono::Duration::zero() {
            return Err(KeyGraphError::Validation(format!("{OP}: retention must not be negative")));
        }
        let cutoff = event_id_at(Utc::now() - retention);
        let removed = self.write(OP, |tx| tx.delete_events_before(&cutoff).context(OP))?;
        info!(events = removed, %cutoff, "expired events");
        Ok(removed)
    }

    async fn secret_ids_for(&self, op: &str, user_id: &str) -> KeyGraphResult<Vec<String>> {
        let accounts = self.read(op, |tx| tx.find_accounts())?;
        self.hash_for_accounts(op, accounts, user_id).await
    }
}
