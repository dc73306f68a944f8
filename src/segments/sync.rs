//! Segment synchronizer.
//!
//! Each `sync` call takes a token from a monotonically increasing counter
//! before going to the network. When the response arrives it is applied only
//! if its token is still the latest issued; otherwise it is discarded as
//! stale, so a slow wide-area query can never overwrite a newer one.
//!
//! Cache transitions:
//! - success: wholesale swap to the decoded list
//! - network error: last-good list retained
//! - decode error: cache cleared
//! - stale: untouched

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, info, warn};

use super::{decode_segments, Segment, SegmentSource};
use crate::error::{Result, SyncError};
use crate::types::BoundingBox;

#[derive(Debug, Default)]
struct SegmentCache {
    segments: Vec<Segment>,
    bbox: Option<BoundingBox>,
    last_error: Option<SyncError>,
}

pub struct SegmentSynchronizer<S> {
    source: Arc<S>,
    latest_token: AtomicU64,
    cache: Mutex<SegmentCache>,
}

impl<S: SegmentSource> SegmentSynchronizer<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            latest_token: AtomicU64::new(0),
            cache: Mutex::new(SegmentCache::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, SegmentCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch segments for `bbox` and replace the cache with them.
    pub async fn sync(&self, bbox: BoundingBox) -> Result<Vec<Segment>> {
        let token = self.latest_token.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        debug!(
            "[SegmentSync #{}] Querying lon [{:.5}, {:.5}] lat [{:.5}, {:.5}]",
            token, bbox.lon_min, bbox.lon_max, bbox.lat_min, bbox.lat_max
        );

        let response = self.source.fetch_segment_payload(bbox).await;

        let latest = self.latest_token.load(Ordering::SeqCst);
        if token != latest {
            debug!(
                "[SegmentSync #{}] Discarding stale response (latest #{}, {} ms)",
                token,
                latest,
                start.elapsed().as_millis()
            );
            return Err(SyncError::StaleResponse { token, latest });
        }

        let decoded = response.and_then(|payload| decode_segments(&payload));

        let mut cache = self.cache();
        // clear() or a newer sync may have run while decoding
        let latest = self.latest_token.load(Ordering::SeqCst);
        if token != latest {
            return Err(SyncError::StaleResponse { token, latest });
        }

        match decoded {
            Ok(segments) => {
                cache.segments = segments.clone();
                cache.bbox = Some(bbox);
                cache.last_error = None;
                info!(
                    "[SegmentSync #{}] Applied {} segments ({} ms)",
                    token,
                    segments.len(),
                    start.elapsed().as_millis()
                );
                Ok(segments)
            }
            Err(e @ SyncError::Decode { .. }) => {
                warn!("[SegmentSync #{}] Payload rejected, clearing cache: {}", token, e);
                cache.segments.clear();
                cache.bbox = None;
                cache.last_error = Some(e.clone());
                Err(e)
            }
            Err(e) => {
                warn!(
                    "[SegmentSync #{}] Fetch failed, keeping {} cached segments: {}",
                    token,
                    cache.segments.len(),
                    e
                );
                cache.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Drop cached segments and invalidate every in-flight fetch.
    pub fn clear(&self) {
        let mut cache = self.cache();
        let token = self.latest_token.fetch_add(1, Ordering::SeqCst) + 1;
        if !cache.segments.is_empty() {
            debug!(
                "[SegmentSync] Cleared {} segments (token #{})",
                cache.segments.len(),
                token
            );
        }
        cache.segments.clear();
        cache.bbox = None;
        cache.last_error = None;
    }

    /// Snapshot of the cached segments.
    pub fn segments(&self) -> Vec<Segment> {
        self.cache().segments.clone()
    }

    pub fn segment_count(&self) -> usize {
        self.cache().segments.len()
    }

    /// Bounding box of the currently cached segments.
    pub fn cached_bbox(&self) -> Option<BoundingBox> {
        self.cache().bbox
    }

    /// Error from the latest applied fetch, for transient UI state.
    pub fn last_error(&self) -> Option<SyncError> {
        self.cache().last_error.clone()
    }
}
