//! Time-sortable identifiers for events and sync sequences.
//!
//! Event ids and sequences are UUIDv7, so their string and byte order
//! follows creation time and a sequence can be used directly as a `since`
//! cursor.

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

static LAST_EVENT_ID: Mutex<Uuid> = Mutex::new(Uuid::nil());
static LAST_SEQUENCE: Mutex<Uuid> = Mutex::new(Uuid::nil());

/// Next v7 id after the one stored in `last`, bumping by one when the clock
/// has not moved past it.
fn monotonic(last: &Mutex<Uuid>) -> Uuid {
    let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
    let candidate = Uuid::now_v7();
    let next = if candidate > *last {
        candidate
    } else {
        Uuid::from_u128(last.as_u128() + 1)
    };
    *last = next;
    next
}

/// A new event id for the current time, greater than every event id this
/// process created before.
pub fn new_event_id() -> Uuid {
    monotonic(&LAST_EVENT_ID)
}

/// A new event id sharing `id`'s timestamp. Used when an event is rewritten
/// under a new id but must keep its place in time.
pub fn sibling_event_id(id: &Uuid) -> StoreResult<Uuid> {
    let ts = id
        .get_timestamp()
        .ok_or_else(|| StoreError::Backend(format!("event id {id} carries no timestamp")))?;
    Ok(Uuid::new_v7(ts))
}

/// The smallest v7 id carrying the millisecond of `at`. Every event created
/// at or after `at` has a greater id. Instants before the Unix epoch map to
/// the smallest v7 id.
pub fn event_id_at(at: DateTime<Utc>) -> Uuid {
    let millis = u128::from(at.timestamp_millis().max(0) as u64) & ((1 << 48) - 1);
    Uuid::from_u128((millis << 80) | (0x7 << 76) | (0b10 << 62))
}

/// A sequence value strictly greater than every sequence handed out before
/// by this process.
pub fn next_sequence() -> Uuid {
    monotonic(&LAST_SEQUENCE)
}

/// The greatest of the given sequences.
pub fn latest_sequence<'a>(sequences: impl IntoIterator<Item = &'a Uuid>) -> Option<Uuid> {
    sequences.into_iter().max().copied()
}
