//! Viewport monitoring and the segment fetch gate.
//!
//! Every viewport-changed event recomputes a discrete zoom level. Below
//! [`MIN_FETCH_ZOOM`](crate::config::MIN_FETCH_ZOOM) the segment cache is
//! cleared and nothing is fetched; a bounding box at that scale spans too much
//! road network to serve cheaply. At or above it, the on-screen corners are
//! read from the map surface and handed to the synchronizer.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::segments::{SegmentSource, SegmentSynchronizer};
use crate::types::{BoundingBox, GeoPoint, LocationSample, Region};

/// Tile edge in pixels for the slippy-map pyramid.
pub const TILE_SIZE_PX: f64 = 256.0;

/// Longitude delta used when centering the first region on a location fix.
pub const INITIAL_REGION_DELTA: f64 = 0.01;

/// Tile-pyramid zoom for a viewport spanning `longitude_delta` degrees across
/// `viewport_width_px` pixels.
///
/// `round(log2(360 * width / 256 / delta))`. Inputs without a usable zoom
/// (non-positive or non-finite) return `i32::MIN`, which never passes the
/// fetch gate.
pub fn zoom_level(longitude_delta: f64, viewport_width_px: f64) -> i32 {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    if !usable(longitude_delta) || !usable(viewport_width_px) {
        return i32::MIN;
    }
    let scale = 360.0 * (viewport_width_px / TILE_SIZE_PX / longitude_delta);
    scale.log2().round() as i32
}

/// Host map view.
pub trait MapSurface: Send + Sync {
    /// Rendered width of the map in pixels.
    fn viewport_width_px(&self) -> f64;

    /// Two opposite on-screen corners (north-east, south-west) as rendered.
    fn visible_corners(&self) -> impl Future<Output = Result<(GeoPoint, GeoPoint)>> + Send;
}

/// What a region change calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportDecision {
    Clear { zoom: i32 },
    Fetch { zoom: i32 },
}

/// Result of handling one region change.
#[derive(Debug, Clone)]
pub enum ViewportOutcome {
    /// Zoomed out past the gate; cache dropped, no request made
    Cleared { zoom: i32 },
    /// Cache replaced with the segments for `bbox`
    Synced { bbox: BoundingBox, segment_count: usize },
    /// A newer region change superseded this one
    Stale,
    /// No new data; the error says why
    Failed(SyncError),
}

pub struct ViewportMonitor<S> {
    synchronizer: Arc<SegmentSynchronizer<S>>,
    min_fetch_zoom: i32,
    last_bbox: Mutex<Option<BoundingBox>>,
}

impl<S: SegmentSource> ViewportMonitor<S> {
    pub fn new(synchronizer: Arc<SegmentSynchronizer<S>>, config: &SyncConfig) -> Self {
        Self {
            synchronizer,
            min_fetch_zoom: config.min_fetch_zoom,
            last_bbox: Mutex::new(None),
        }
    }

    /// Pure fetch gate.
    pub fn decide(&self, region: &Region, viewport_width_px: f64) -> ViewportDecision {
        let zoom = zoom_level(region.longitude_delta, viewport_width_px);
        if zoom < self.min_fetch_zoom {
            ViewportDecision::Clear { zoom }
        } else {
            ViewportDecision::Fetch { zoom }
        }
    }

    /// Handle a viewport-changed event.
    pub async fn on_region_change<M: MapSurface>(&self, region: Region, surface: &M) -> ViewportOutcome {
        match self.decide(&region, surface.viewport_width_px()) {
            ViewportDecision::Clear { zoom } => {
                debug!("[Viewport] Zoom {} below {}, clearing segments", zoom, self.min_fetch_zoom);
                self.synchronizer.clear();
                ViewportOutcome::Cleared { zoom }
            }
            ViewportDecision::Fetch { zoom } => {
                let (a, b) = match surface.visible_corners().await {
                    Ok(corners) => corners,
                    Err(e) => {
                        warn!("[Viewport] Could not read map corners: {}", e);
                        return ViewportOutcome::Failed(e);
                    }
                };
                let bbox = BoundingBox::from_corners(a, b);
                *self.last_bbox.lock().unwrap_or_else(PoisonError::into_inner) = Some(bbox);
                debug!("[Viewport] Zoom {}, fetching {:?}", zoom, bbox);

                match self.synchronizer.sync(bbox).await {
                    Ok(segments) => ViewportOutcome::Synced {
                        bbox,
                        segment_count: segments.len(),
                    },
                    Err(e) if e.is_stale() => ViewportOutcome::Stale,
                    Err(e) => ViewportOutcome::Failed(e),
                }
            }
        }
    }

    /// Last bounding box handed to the synchronizer, for display.
    pub fn last_bbox(&self) -> Option<BoundingBox> {
        *self.last_bbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn synchronizer(&self) -> &Arc<SegmentSynchronizer<S>> {
        &self.synchronizer
    }

    /// First region to show: centered on the current fix, or the city overview.
    pub fn initial_region(location: Option<&LocationSample>) -> Region {
        match location {
            Some(sample) => Region::around(sample.point(), INITIAL_REGION_DELTA),
            None => Region::default(),
        }
    }
}
