//! Road segments and their traffic-condition flags.
//!
//! Segments are fetched per bounding box, decoded from the compact wire
//! payload ([`codec`]) and held by the [`SegmentSynchronizer`] cache, which is
//! replaced wholesale on every successful fetch.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{BoundingBox, GeoPoint};

pub mod codec;
pub mod sync;

pub use codec::{decode_segments, encode_segments};
pub use sync::SegmentSynchronizer;

/// Traffic-condition flags of a segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStatus {
    #[serde(rename = "JAM", default)]
    pub jam: bool,
    #[serde(rename = "FLOOD", default)]
    pub flood: bool,
    #[serde(rename = "POLICE", default)]
    pub police: bool,
    #[serde(rename = "OBSTACLE", default)]
    pub obstacle: bool,
}

impl SegmentStatus {
    /// True when any condition is reported.
    pub fn any(&self) -> bool {
        self.jam || self.flood || self.police || self.obstacle
    }
}

/// A stretch of road with its status, coordinates latitude-first.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: String,
    pub way_id: Option<i64>,
    pub coordinates: Vec<GeoPoint>,
    pub status: SegmentStatus,
    pub tags: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Backend that answers bounding-box segment queries.
///
/// Returns the raw base64 payload; decoding belongs to the synchronizer so a
/// malformed payload is distinguishable from a transport failure.
pub trait SegmentSource: Send + Sync + 'static {
    fn fetch_segment_payload(
        &self,
        bbox: BoundingBox,
    ) -> impl Future<Output = Result<String>> + Send;
}
