//! Core geographic types shared by the viewport, location and poller code.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

// ============================================================================
// Points
// ============================================================================

/// A coordinate with latitude and longitude, latitude-first as the map draws it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }

    pub(crate) fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

// ============================================================================
// Bounding Box
// ============================================================================

/// Rectangular extent of the visible map.
///
/// Field names match the `POST /segment/map` request body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    /// Create a bounding box, rejecting inverted or non-finite bounds.
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Result<Self> {
        let all_finite = [lon_min, lat_min, lon_max, lat_max]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(SyncError::InvalidBounds {
                message: "non-finite coordinate".to_string(),
            });
        }
        if lon_min > lon_max || lat_min > lat_max {
            return Err(SyncError::InvalidBounds {
                message: format!(
                    "inverted box lon [{}, {}] lat [{}, {}]",
                    lon_min, lon_max, lat_min, lat_max
                ),
            });
        }
        Ok(Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        })
    }

    /// Build a box from two opposite map corners in any order.
    pub fn from_corners(a: GeoPoint, b: GeoPoint) -> Self {
        Self {
            lon_min: a.longitude.min(b.longitude),
            lat_min: a.latitude.min(b.latitude),
            lon_max: a.longitude.max(b.longitude),
            lat_max: a.latitude.max(b.latitude),
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.longitude >= self.lon_min
            && point.longitude <= self.lon_max
            && point.latitude >= self.lat_min
            && point.latitude <= self.lat_max
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }

    /// Uniform random point inside the box.
    pub fn random_point<R: Rng + ?Sized>(&self, rng: &mut R) -> GeoPoint {
        let latitude = if self.lat_max > self.lat_min {
            rng.gen_range(self.lat_min..=self.lat_max)
        } else {
            self.lat_min
        };
        let longitude = if self.lon_max > self.lon_min {
            rng.gen_range(self.lon_min..=self.lon_max)
        } else {
            self.lon_min
        };
        GeoPoint::new(latitude, longitude)
    }
}

// ============================================================================
// Region
// ============================================================================

/// Visible map region as reported by a viewport-changed event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl Region {
    /// Square region of `delta` degrees centered on `point`.
    pub fn around(point: GeoPoint, delta: f64) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            latitude_delta: delta,
            longitude_delta: delta,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

impl Default for Region {
    /// Ho Chi Minh City overview used before the first location fix.
    fn default() -> Self {
        Self {
            latitude: 10.82,
            longitude: 106.63,
            latitude_delta: 0.5,
            longitude_delta: 0.5,
        }
    }
}

// ============================================================================
// Location Samples
// ============================================================================

/// A device position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
        }
    }

    /// A sample captured now.
    pub fn now(point: GeoPoint) -> Self {
        Self::new(point.latitude, point.longitude, Utc::now())
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_bbox_rejects_inverted() {
        assert!(BoundingBox::new(106.80, 10.87, 106.81, 10.89).is_ok());
        assert!(matches!(
            BoundingBox::new(106.81, 10.87, 106.80, 10.89),
            Err(SyncError::InvalidBounds { .. })
        ));
        assert!(BoundingBox::new(f64::NAN, 10.87, 106.80, 10.89).is_err());
    }

    #[test]
    fn test_bbox_from_corners_normalizes() {
        let ne = GeoPoint::new(10.89, 106.81);
        let sw = GeoPoint::new(10.87, 106.80);
        let a = BoundingBox::from_corners(ne, sw);
        let b = BoundingBox::from_corners(sw, ne);
        assert_eq!(a, b);
        assert!(a.lon_min <= a.lon_max);
        assert!(a.lat_min <= a.lat_max);
        assert!(a.contains(a.center()));
    }

    #[test]
    fn test_bbox_serializes_as_request_body() {
        let bbox = BoundingBox::new(106.80, 10.87, 106.81, 10.89).unwrap();
        let json = serde_json::to_value(bbox).unwrap();
        assert_eq!(json["lon_min"], 106.80);
        assert_eq!(json["lat_max"], 10.89);
    }

    #[test]
    fn test_random_point_stays_inside() {
        let bbox = BoundingBox::new(106.6, 10.7, 106.8, 10.9).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert!(bbox.contains(bbox.random_point(&mut rng)));
        }
    }

    #[test]
    fn test_point_validity() {
        assert!(GeoPoint::new(10.82, 106.63).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_valid());
    }
}
