//! # Location Tracker
//!
//! Owns the single "current location" value consumed by the viewport monitor
//! and the proximity poller.
//!
//! ## Permission states
//!
//! `Unrequested -> PermissionPending -> {Granted, Denied}`. The platform prompt
//! is shown at most once per tracker; concurrent callers wait for the same
//! answer.
//!
//! ## Modes
//!
//! - **One-shot** ([`LocationTracker::locate_once`]): a single fix bounded by
//!   `SyncConfig::location_timeout`.
//! - **Continuous** ([`LocationTracker::watch`]): a [`LocationWatch`] that
//!   filters raw platform samples by time and displacement thresholds. The
//!   watch is a scoped resource: it is released on `stop()`, on drop, and when
//!   the user disables location watching in settings.
//!
//! When no live fix can be had, [`LocationFallback`] decides whether a cached
//! or random coordinate is substituted.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use geo::{Distance, Haversine};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{LocationFallback, SyncConfig};
use crate::error::{Result, SyncError};
use crate::settings::AppSettings;
use crate::types::{BoundingBox, LocationSample};

/// Answer from the platform permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unrequested,
    PermissionPending,
    Granted,
    Denied,
}

/// Platform location API.
pub trait LocationProvider: Send + Sync + 'static {
    /// Show the foreground location permission prompt.
    fn request_permission(&self) -> impl Future<Output = PermissionStatus> + Send;

    /// Single position fix.
    fn current_position(&self) -> impl Future<Output = Result<LocationSample>> + Send;

    /// Start a platform position subscription.
    ///
    /// The platform listener must be removed once the returned receiver is
    /// dropped (sends start failing).
    fn watch_position(
        &self,
    ) -> impl Future<Output = Result<mpsc::Receiver<LocationSample>>> + Send;
}

// ============================================================================
// Watch thresholds
// ============================================================================

/// How the time and distance thresholds combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPolicy {
    /// Emit only after both the minimum time and the minimum displacement
    Both,
    /// Emit after either threshold is crossed
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchOptions {
    /// Minimum displacement in meters
    pub distance_interval_m: f64,
    /// Minimum time between emitted samples
    pub time_interval: Duration,
    pub policy: WatchPolicy,
}

impl WatchOptions {
    /// Whether `next` should be emitted given the last emitted sample.
    pub fn accepts(&self, last: Option<&LocationSample>, next: &LocationSample) -> bool {
        let Some(last) = last else {
            return true;
        };

        let elapsed = (next.captured_at - last.captured_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let moved = Haversine::distance(last.point().to_geo(), next.point().to_geo());

        let time_ok = elapsed >= self.time_interval;
        let distance_ok = moved >= self.distance_interval_m;

        match self.policy {
            WatchPolicy::Both => time_ok && distance_ok,
            WatchPolicy::Either => time_ok || distance_ok,
        }
    }
}

// ============================================================================
// Scoped watch handle
// ============================================================================

/// Live continuous-location subscription.
///
/// Dropping the handle releases the platform listener.
#[must_use = "dropping a LocationWatch stops it immediately"]
pub struct LocationWatch {
    task: Option<JoinHandle<()>>,
}

impl LocationWatch {
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("[LocationWatch] Released");
        }
    }
}

impl Drop for LocationWatch {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Tracker
// ============================================================================

pub struct LocationTracker<P> {
    provider: Arc<P>,
    settings: watch::Receiver<AppSettings>,
    location_timeout: Duration,
    fallback: LocationFallback,
    fallback_bbox: BoundingBox,
    watch_options: WatchOptions,
    permission: Mutex<PermissionState>,
    prompt: tokio::sync::Mutex<()>,
    current: Arc<watch::Sender<Option<LocationSample>>>,
}

impl<P: LocationProvider> LocationTracker<P> {
    pub fn new(provider: Arc<P>, config: &SyncConfig, settings: watch::Receiver<AppSettings>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            provider,
            settings,
            location_timeout: config.location_timeout,
            fallback: config.location_fallback,
            fallback_bbox: config.fallback_bbox,
            watch_options: config.watch_options,
            permission: Mutex::new(PermissionState::Unrequested),
            prompt: tokio::sync::Mutex::new(()),
            current: Arc::new(current),
        }
    }

    pub fn permission_state(&self) -> PermissionState {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_permission(&self, state: PermissionState) {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Prompt for permission if it has not been settled yet.
    pub async fn ensure_permission(&self) -> PermissionState {
        let _prompt = self.prompt.lock().await;

        match self.permission_state() {
            settled @ (PermissionState::Granted | PermissionState::Denied) => return settled,
            PermissionState::Unrequested | PermissionState::PermissionPending => {}
        }

        self.set_permission(PermissionState::PermissionPending);
        let state = match self.provider.request_permission().await {
            PermissionStatus::Granted => PermissionState::Granted,
            PermissionStatus::Denied => {
                warn!("[Location] Permission to access location was denied");
                PermissionState::Denied
            }
        };
        self.set_permission(state);
        state
    }

    /// Latest known location.
    pub fn current(&self) -> Option<LocationSample> {
        *self.current.borrow()
    }

    /// Receiver that always holds the latest location; older samples are dropped.
    pub fn subscribe(&self) -> watch::Receiver<Option<LocationSample>> {
        self.current.subscribe()
    }

    fn publish(&self, sample: LocationSample) {
        self.current.send_replace(Some(sample));
    }

    /// Single fix, falling back per policy when none is available.
    pub async fn locate_once(&self) -> Result<LocationSample> {
        let settings = self.settings.borrow().clone();

        let live = if !settings.watch_location_enabled {
            Err(SyncError::LocationUnavailable {
                message: "location watching disabled in settings".to_string(),
            })
        } else {
            match self.ensure_permission().await {
                PermissionState::Granted => self.live_fix().await,
                _ => Err(SyncError::PermissionDenied {
                    what: "location".to_string(),
                }),
            }
        };

        let sample = match live {
            Ok(sample) => sample,
            Err(cause) => self.fallback_fix(&settings, cause)?,
        };
        self.publish(sample);
        Ok(sample)
    }

    async fn live_fix(&self) -> Result<LocationSample> {
        match tokio::time::timeout(self.location_timeout, self.provider.current_position()).await {
            Ok(Ok(sample)) => {
                debug!(
                    "[Location] Fix {:.5}, {:.5}",
                    sample.latitude, sample.longitude
                );
                Ok(sample)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SyncError::LocationUnavailable {
                message: format!("no fix within {:?}", self.location_timeout),
            }),
        }
    }

    fn fallback_fix(&self, settings: &AppSettings, cause: SyncError) -> Result<LocationSample> {
        let cached = settings.cached_location.filter(|p| p.is_valid());

        let sample = match (self.fallback, cached) {
            (LocationFallback::Fail, _) => None,
            (LocationFallback::Cached | LocationFallback::RandomInBbox, Some(point)) => {
                info!("[Location] Using cached coordinate ({})", cause);
                Some(LocationSample::now(point))
            }
            (LocationFallback::Cached, None) => None,
            (LocationFallback::RandomInBbox, None) => {
                let point = self.fallback_bbox.random_point(&mut rand::thread_rng());
                warn!(
                    "[Location] Using random coordinate {:.5}, {:.5} ({})",
                    point.latitude, point.longitude, cause
                );
                Some(LocationSample::now(point))
            }
        };

        sample.ok_or(cause)
    }

    /// Start continuous watching with the configured thresholds and the
    /// user's `moveDistance`.
    ///
    /// The distance threshold follows later `moveDistance` changes without a
    /// restart.
    pub async fn watch(&self) -> Result<LocationWatch> {
        let options = WatchOptions {
            distance_interval_m: self.settings.borrow().move_distance,
            ..self.watch_options
        };
        self.start_watch(options, true).await
    }

    /// Start continuous watching with explicit thresholds.
    ///
    /// Requires granted permission and `watchLocationEnabled`. The returned
    /// handle owns the platform subscription. `options` stay fixed for the
    /// life of the watch.
    pub async fn watch_with(&self, options: WatchOptions) -> Result<LocationWatch> {
        self.start_watch(options, false).await
    }

    async fn start_watch(
        &self,
        mut options: WatchOptions,
        follow_move_distance: bool,
    ) -> Result<LocationWatch> {
        if !self.settings.borrow().watch_location_enabled {
            return Err(SyncError::LocationUnavailable {
                message: "location watching disabled in settings".to_string(),
            });
        }
        if self.ensure_permission().await != PermissionState::Granted {
            return Err(SyncError::PermissionDenied {
                what: "location".to_string(),
            });
        }

        let mut raw = self.provider.watch_position().await?;
        let current = Arc::clone(&self.current);
        let mut settings_rx = self.settings.clone();

        info!(
            "[LocationWatch] Started: {}m / {:?} ({:?})",
            options.distance_interval_m, options.time_interval, options.policy
        );

        let task = tokio::spawn(async move {
            let mut last: Option<LocationSample> = None;
            let mut settings_open = true;
            loop {
                tokio::select! {
                    sample = raw.recv() => {
                        let Some(sample) = sample else {
                            debug!("[LocationWatch] Platform stream ended");
                            break;
                        };
                        if options.accepts(last.as_ref(), &sample) {
                            last = Some(sample);
                            current.send_replace(Some(sample));
                        }
                    }
                    changed = settings_rx.changed(), if settings_open => {
                        if changed.is_err() {
                            settings_open = false;
                            continue;
                        }
                        let next = settings_rx.borrow_and_update().clone();
                        if !next.watch_location_enabled {
                            info!("[LocationWatch] Disabled in settings, releasing");
                            break;
                        }
                        if follow_move_distance
                            && next.move_distance != options.distance_interval_m
                        {
                            info!(
                                "[LocationWatch] Distance threshold {}m -> {}m",
                                options.distance_interval_m, next.move_distance
                            );
                            options.distance_interval_m = next.move_distance;
                        }
                    }
                }
            }
        });

        Ok(LocationWatch { task: Some(task) })
    }
}
