//! Segment payload codec.
//!
//! The `data` field of a `POST /segment/map` response is:
//!
//! ```text
//! base64( gzip( utf8( {"data": [{"id", "coordinates": [[lon, lat], ...], "status": {...}}] } ) ) )
//! ```
//!
//! Wire coordinates are `[longitude, latitude]`; decoded segments are
//! latitude-first. Every stage failure is reported with its [`DecodeStage`].

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Deserializer, Serialize};

use super::{Segment, SegmentStatus};
use crate::error::{DecodeStage, OptionExt, Result, SyncError};
use crate::types::GeoPoint;

#[derive(Debug, Serialize, Deserialize)]
struct WireCollection {
    data: Vec<WireSegment>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireSegment {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    way_id: Option<i64>,
    #[serde(default)]
    coordinates: Vec<Vec<f64>>,
    #[serde(default)]
    status: Option<SegmentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Segment ids arrive as strings from the segment service but as integers
/// from older OSM-derived payloads.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Int(n) => n.to_string(),
    })
}

/// Decode a base64 segment payload into latitude-first segments.
pub fn decode_segments(payload: &str) -> Result<Vec<Segment>> {
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| SyncError::decode(DecodeStage::Base64, e))?;

    let mut raw = Vec::with_capacity(compressed.len() * 4);
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| SyncError::decode(DecodeStage::Gzip, e))?;

    let text = String::from_utf8(raw).map_err(|e| SyncError::decode(DecodeStage::Utf8, e))?;

    let collection: WireCollection =
        serde_json::from_str(&text).map_err(|e| SyncError::decode(DecodeStage::Json, e))?;

    collection
        .data
        .into_iter()
        .map(project_segment)
        .collect()
}

fn project_segment(wire: WireSegment) -> Result<Segment> {
    let coordinates = wire
        .coordinates
        .iter()
        .map(|pair| {
            let lon = pair
                .first()
                .copied()
                .ok_or_decode(DecodeStage::Geometry, "empty coordinate pair")?;
            let lat = pair
                .get(1)
                .copied()
                .ok_or_decode(DecodeStage::Geometry, "coordinate pair missing latitude")?;
            let point = GeoPoint::new(lat, lon);
            if !point.is_valid() {
                return Err(SyncError::decode(
                    DecodeStage::Geometry,
                    format!("segment {} has out-of-range point [{}, {}]", wire.id, lon, lat),
                ));
            }
            Ok(point)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Segment {
        id: wire.id,
        way_id: wire.way_id,
        coordinates,
        status: wire.status.unwrap_or_default(),
        tags: wire.tags,
    })
}

/// Encode segments into the wire payload, swapping back to `[lon, lat]`.
///
/// Inverse of [`decode_segments`]; used to build fixtures.
pub fn encode_segments(segments: &[Segment]) -> Result<String> {
    let collection = WireCollection {
        data: segments
            .iter()
            .map(|s| WireSegment {
                id: s.id.clone(),
                way_id: s.way_id,
                coordinates: s
                    .coordinates
                    .iter()
                    .map(|p| vec![p.longitude, p.latitude])
                    .collect(),
                status: Some(s.status),
                tags: s.tags.clone(),
            })
            .collect(),
    };

    let json = serde_json::to_vec(&collection).map_err(|e| SyncError::decode(DecodeStage::Json, e))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| SyncError::decode(DecodeStage::Gzip, e))?;
    let compressed = encoder
        .finish()
        .map_err(|e| SyncError::decode(DecodeStage::Gzip, e))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}
