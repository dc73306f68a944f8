//! roadwatch-sync - viewport-driven road status sync for mobile map clients
//!
//! This crate provides:
//! - Zoom gating and bounding-box segment sync with stale-response discard
//! - Decoding of the compact segment payload (base64, gzip, JSON)
//! - Device location tracking with an explicit fallback policy
//! - Proximity notification polling with timer reset on every poll
//! - A persisted seen-id set for notification read state
//! - SQLite key/value persistence and a reqwest backend client

pub mod config;
pub mod error;
pub mod location;
pub mod notifications;
pub mod segments;
pub mod settings;
pub mod storage;
pub mod types;
pub mod viewport;

#[cfg(feature = "http")]
pub mod http;

pub use config::{LocationFallback, SyncConfig, MIN_FETCH_ZOOM};
pub use error::{DecodeStage, Result, SyncError};
pub use location::{
    LocationProvider, LocationTracker, LocationWatch, PermissionState, PermissionStatus,
    WatchOptions, WatchPolicy,
};
pub use notifications::{
    load_user_notifications, AlertSink, NotificationDedupStore, NotificationEvent,
    NotificationKind, NotificationSource, ProximityCheck, ProximityPoller,
};
pub use segments::{Segment, SegmentSource, SegmentStatus, SegmentSynchronizer};
pub use settings::{AppSettings, SettingsStore};
pub use storage::{KeyValueStore, MemoryStore};
pub use types::{BoundingBox, GeoPoint, LocationSample, Region};
pub use viewport::{zoom_level, MapSurface, ViewportDecision, ViewportMonitor, ViewportOutcome};

#[cfg(feature = "persistence")]
pub use storage::SqliteStore;

#[cfg(feature = "http")]
pub use http::ApiClient;

/// Initialize logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("roadwatch"),
    );
}

/// Initialize logging for iOS
#[cfg(target_os = "ios")]
pub fn init_logging() {
    use log::LevelFilter;

    // Fails only if a logger is already installed
    let _ = oslog::OsLogger::new("roadwatch")
        .level_filter(LevelFilter::Debug)
        .init();
}

#[cfg(not(any(target_os = "android", target_os = "ios")))]
pub fn init_logging() {
    // No-op elsewhere; hosts and tests install their own logger
}
