//! User-adjustable settings and their persistence.
//!
//! Components never look settings up from ambient context. They receive a
//! `watch::Receiver<AppSettings>` at construction and react to `changed()`.
//! Every `update` or `reload` persists first, then broadcasts.

use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Result, SyncError};
use crate::storage::{KeyValueStore, SETTINGS_KEY};
use crate::types::GeoPoint;

/// Settings object persisted under [`SETTINGS_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Proximity polling on/off
    pub notifications_enabled: bool,
    /// Poll interval in minutes
    pub notif_interval: u32,
    /// Displacement in meters that counts as movement for the location watch
    pub move_distance: f64,
    /// Continuous location watch on/off
    pub watch_location_enabled: bool,
    /// Last known coordinate, used by the cached location fallback
    pub cached_location: Option<GeoPoint>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            notif_interval: 5,
            move_distance: 500.0,
            watch_location_enabled: true,
            cached_location: None,
        }
    }
}

impl AppSettings {
    /// Zero or missing intervals are saved as one minute.
    pub fn normalized(mut self) -> Self {
        if self.notif_interval == 0 {
            self.notif_interval = 1;
        }
        if !self.move_distance.is_finite() || self.move_distance < 0.0 {
            self.move_distance = 0.0;
        }
        self
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.notif_interval.max(1)) * 60)
    }
}

/// Persisted settings with change broadcast.
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    sender: watch::Sender<AppSettings>,
}

impl SettingsStore {
    /// Load settings from `store`, falling back to defaults when the key is
    /// missing or holds invalid JSON.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let settings = Self::read(store.as_ref())?;
        let (sender, _) = watch::channel(settings);
        Ok(Self { store, sender })
    }

    fn read(store: &dyn KeyValueStore) -> Result<AppSettings> {
        match store.get(SETTINGS_KEY)? {
            Some(raw) => match serde_json::from_str::<AppSettings>(&raw) {
                Ok(settings) => Ok(settings.normalized()),
                Err(e) => {
                    warn!("[Settings] Stored settings unreadable, using defaults: {}", e);
                    Ok(AppSettings::default())
                }
            },
            None => Ok(AppSettings::default()),
        }
    }

    /// Current settings snapshot.
    pub fn current(&self) -> AppSettings {
        self.sender.borrow().clone()
    }

    /// Receiver for components that must re-apply settings when they change.
    pub fn subscribe(&self) -> watch::Receiver<AppSettings> {
        self.sender.subscribe()
    }

    /// Apply `edit` to the current settings, persist, then broadcast.
    pub fn update<F>(&self, edit: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut next = self.current();
        edit(&mut next);
        let next = next.normalized();

        let json = serde_json::to_string(&next).map_err(SyncError::persistence)?;
        self.store.set(SETTINGS_KEY, &json)?;

        info!(
            "[Settings] Updated: notifications={} interval={}min watch={} move={}m",
            next.notifications_enabled,
            next.notif_interval,
            next.watch_location_enabled,
            next.move_distance
        );
        self.sender.send_replace(next.clone());
        Ok(next)
    }

    /// Re-read settings from storage and broadcast if they differ.
    pub fn reload(&self) -> Result<AppSettings> {
        let settings = Self::read(self.store.as_ref())?;
        self.sender.send_if_modified(|current| {
            if *current == settings {
                false
            } else {
                *current = settings.clone();
                true
            }
        });
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_defaults_when_missing() {
        let store = SettingsStore::load(Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(store.current(), AppSettings::default());
    }

    #[test]
    fn test_defaults_when_corrupt() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(SETTINGS_KEY, "{not json").unwrap();
        let store = SettingsStore::load(kv).unwrap();
        assert_eq!(store.current(), AppSettings::default());
    }

    #[test]
    fn test_camel_case_keys_and_partial_objects() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(SETTINGS_KEY, r#"{"notificationsEnabled":false,"notifInterval":0}"#)
            .unwrap();
        let settings = SettingsStore::load(kv).unwrap().current();
        assert!(!settings.notifications_enabled);
        // zero interval is normalized to one minute
        assert_eq!(settings.notif_interval, 1);
        assert!(settings.watch_location_enabled);
    }

    #[test]
    fn test_update_persists_and_broadcasts() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = SettingsStore::load(kv.clone()).unwrap();
        let mut rx = store.subscribe();

        store.update(|s| s.notif_interval = 10).unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().notif_interval, 10);

        let raw = kv.get(SETTINGS_KEY).unwrap().unwrap();
        assert!(raw.contains("\"notifInterval\":10"));
    }

    #[test]
    fn test_reload_picks_up_external_write() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = SettingsStore::load(kv.clone()).unwrap();
        let mut rx = store.subscribe();

        store.reload().unwrap();
        assert!(!rx.has_changed().unwrap());

        kv.set(SETTINGS_KEY, r#"{"watchLocationEnabled":false}"#).unwrap();
        let reloaded = store.reload().unwrap();
        assert!(!reloaded.watch_location_enabled);
        assert!(rx.has_changed().unwrap());
        assert!(!rx.borrow_and_update().watch_location_enabled);
    }
}
