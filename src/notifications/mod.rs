//! Notification events, their sources and where alerts go.
//!
//! Events come from two endpoints: the proximity query driven by
//! [`ProximityPoller`] and the user history that [`NotificationDedupStore`]
//! annotates with read state.

use std::future::Future;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::types::GeoPoint;

pub mod dedup;
pub mod poller;

pub use dedup::{load_user_notifications, NotificationDedupStore};
pub use poller::{ProximityCheck, ProximityPoller};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// A report the user filed was validated or rejected
    Validation,
    /// Road status near the user changed
    Status,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Server id; proximity events may omit it
    #[serde(alias = "_id", default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "flexible_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Derived from the seen-id set, never read from the wire
    #[serde(default, skip_deserializing)]
    pub had_read: bool,
}

impl NotificationEvent {
    pub fn new(id: impl Into<String>, kind: NotificationKind, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            timestamp: None,
            had_read: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Accepts RFC 3339 strings or epoch milliseconds. Unparseable values become
/// `None` so one bad timestamp does not drop the whole batch.
fn flexible_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
        Float(f64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Raw::Millis(ms)) => Utc.timestamp_millis_opt(ms).single(),
        Some(Raw::Float(ms)) => Utc.timestamp_millis_opt(ms as i64).single(),
    })
}

/// Display order: newest first. Stable, so ties keep their input order on
/// every call; events without a timestamp sort last.
pub fn sort_newest_first(events: &mut [NotificationEvent]) {
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Backend notification endpoints.
pub trait NotificationSource: Send + Sync + 'static {
    /// Whether an access token is currently available.
    fn is_authenticated(&self) -> bool;

    /// Notifications relevant to `point`.
    fn notifications_near(
        &self,
        point: GeoPoint,
    ) -> impl Future<Output = Result<Vec<NotificationEvent>>> + Send;

    /// The user's notification history.
    fn user_notifications(&self) -> impl Future<Output = Result<Vec<NotificationEvent>>> + Send;
}

/// Host-side local alert presenter.
///
/// Returning `SyncError::PermissionDenied` means notifications are not allowed;
/// the poller keeps running but stops alerting for that poll.
pub trait AlertSink: Send + Sync + 'static {
    fn alert(&self, event: &NotificationEvent) -> impl Future<Output = Result<()>> + Send;
}
