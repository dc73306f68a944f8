//! Persisted set of seen notification ids.
//!
//! The set is a JSON array under [`SEEN_IDS_KEY`]. It only grows: each
//! `mark_read` re-reads the stored array and appends the ids it does not
//! already hold, so two rapid calls can never drop each other's ids.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use serde_json::Value;

use super::{sort_newest_first, NotificationEvent, NotificationSource};
use crate::error::{Result, SyncError};
use crate::storage::{KeyValueStore, SEEN_IDS_KEY};

pub struct NotificationDedupStore {
    store: Arc<dyn KeyValueStore>,
    // serializes read-modify-write of the stored array
    write_lock: Mutex<()>,
}

impl NotificationDedupStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Stored ids in insertion order, or `None` when the stored value is not
    /// a JSON array at all.
    ///
    /// Non-string elements of an otherwise readable array are dropped, and the
    /// string ids around them are kept.
    fn stored_ids(&self) -> Result<Option<Vec<String>>> {
        let Some(raw) = self.store.get(SEEN_IDS_KEY)? else {
            return Ok(Some(Vec::new()));
        };
        let values = match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(values) => values,
            Err(e) => {
                warn!("[Dedup] Seen id set unreadable: {}", e);
                return Ok(None);
            }
        };

        let total = values.len();
        let ids: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(id) => Some(id),
                _ => None,
            })
            .collect();
        if ids.len() < total {
            warn!("[Dedup] Skipped {} malformed seen ids", total - ids.len());
        }
        Ok(Some(ids))
    }

    /// Stored ids for reading; an unreadable set reads as empty.
    fn read_ids(&self) -> Result<Vec<String>> {
        Ok(self.stored_ids()?.unwrap_or_default())
    }

    /// Add the ids of `events` to the seen set. Returns how many were new.
    ///
    /// Idempotent; nothing is written when every id is already present.
    /// Events without an id cannot be tracked and are skipped. When the stored
    /// value is not an array the key is left untouched and this fails with
    /// [`SyncError::Persistence`].
    pub fn mark_read(&self, events: &[NotificationEvent]) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut ids = self
            .stored_ids()?
            .ok_or_else(|| SyncError::persistence("seen id set is not a JSON array"))?;
        let mut seen: HashSet<String> = ids.iter().cloned().collect();

        let before = ids.len();
        for event in events {
            if !event.id.is_empty() && seen.insert(event.id.clone()) {
                ids.push(event.id.clone());
            }
        }
        let added = ids.len() - before;
        if added == 0 {
            return Ok(0);
        }

        let json = serde_json::to_string(&ids).map_err(SyncError::persistence)?;
        self.store.set(SEEN_IDS_KEY, &json)?;
        debug!("[Dedup] Marked {} new ids read ({} total)", added, ids.len());
        Ok(added)
    }

    /// Set `had_read` on each event and sort newest-first.
    ///
    /// The flag is true when any event is unread. `had_read` is normally
    /// `id ∈ seen set`, except that events with an empty id are always
    /// reported as read: `mark_read` can never record them, so they would
    /// otherwise keep the unread flag set forever.
    pub fn annotate(&self, mut events: Vec<NotificationEvent>) -> Result<(Vec<NotificationEvent>, bool)> {
        let seen = self.seen_ids()?;
        for event in &mut events {
            event.had_read = event.id.is_empty() || seen.contains(&event.id);
        }
        sort_newest_first(&mut events);
        let has_unread = events.iter().any(|e| !e.had_read);
        Ok((events, has_unread))
    }

    pub fn seen_ids(&self) -> Result<HashSet<String>> {
        Ok(self.read_ids()?.into_iter().collect())
    }

    pub fn is_seen(&self, id: &str) -> Result<bool> {
        Ok(self.read_ids()?.iter().any(|seen| seen == id))
    }
}

/// Fetch the user's notification history and annotate it with read state.
///
/// Returns the events newest-first and whether any is unread.
pub async fn load_user_notifications<N: NotificationSource>(
    source: &N,
    store: &NotificationDedupStore,
) -> Result<(Vec<NotificationEvent>, bool)> {
    if !source.is_authenticated() {
        return Err(SyncError::Unauthenticated);
    }
    let events = source.user_notifications().await?;
    store.annotate(events)
}
