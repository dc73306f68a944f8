//! End-to-end wiring through the public API.
//!
//! A location fix centers the first region, the viewport monitor gates and
//! syncs segments, and the proximity poller picks up the same location.
//!
//! Run with: `cargo test --test sync_flow`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use roadwatch_sync::segments::encode_segments;
use roadwatch_sync::{
    AlertSink, AppSettings, GeoPoint, LocationProvider, LocationSample, LocationTracker,
    MapSurface, MemoryStore, NotificationEvent, NotificationKind, NotificationSource,
    PermissionStatus, ProximityCheck, ProximityPoller, Result, Segment, SegmentSource,
    SegmentStatus, SegmentSynchronizer, SettingsStore, SyncConfig, ViewportMonitor,
    ViewportOutcome,
};
use tokio::sync::mpsc;

const HERE: GeoPoint = GeoPoint {
    latitude: 10.8800,
    longitude: 106.8050,
};

struct Device;

impl LocationProvider for Device {
    async fn request_permission(&self) -> PermissionStatus {
        PermissionStatus::Granted
    }

    async fn current_position(&self) -> Result<LocationSample> {
        Ok(LocationSample::new(HERE.latitude, HERE.longitude, Utc::now()))
    }

    async fn watch_position(&self) -> Result<mpsc::Receiver<LocationSample>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

/// Screen showing the region's own extent.
struct Screen {
    width_px: f64,
    half_span: f64,
}

impl MapSurface for Screen {
    fn viewport_width_px(&self) -> f64 {
        self.width_px
    }

    async fn visible_corners(&self) -> Result<(GeoPoint, GeoPoint)> {
        Ok((
            GeoPoint::new(HERE.latitude + self.half_span, HERE.longitude + self.half_span),
            GeoPoint::new(HERE.latitude - self.half_span, HERE.longitude - self.half_span),
        ))
    }
}

struct Backend {
    segment_queries: AtomicUsize,
    proximity_queries: Mutex<Vec<GeoPoint>>,
}

impl SegmentSource for Backend {
    async fn fetch_segment_payload(&self, _bbox: roadwatch_sync::BoundingBox) -> Result<String> {
        self.segment_queries.fetch_add(1, Ordering::SeqCst);
        encode_segments(&[Segment {
            id: "jam-1".to_string(),
            way_id: Some(48211),
            coordinates: vec![HERE, GeoPoint::new(HERE.latitude + 0.0005, HERE.longitude)],
            status: SegmentStatus {
                jam: true,
                ..Default::default()
            },
            tags: None,
        }])
    }
}

impl NotificationSource for Backend {
    fn is_authenticated(&self) -> bool {
        true
    }

    async fn notifications_near(&self, point: GeoPoint) -> Result<Vec<NotificationEvent>> {
        self.proximity_queries.lock().unwrap().push(point);
        Ok(vec![NotificationEvent::new(
            "",
            NotificationKind::Status,
            "Traffic jam 200m ahead",
        )])
    }

    async fn user_notifications(&self) -> Result<Vec<NotificationEvent>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct Alerts(Mutex<Vec<String>>);

impl AlertSink for Alerts {
    async fn alert(&self, event: &NotificationEvent) -> Result<()> {
        self.0.lock().unwrap().push(event.content.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_location_to_segments_and_alerts() {
    let _ = env_logger::builder().is_test(true).try_init();

    let config = SyncConfig::default();
    let settings = SettingsStore::load(Arc::new(MemoryStore::new())).unwrap();
    let backend = Arc::new(Backend {
        segment_queries: AtomicUsize::new(0),
        proximity_queries: Mutex::new(Vec::new()),
    });

    let tracker = LocationTracker::new(Arc::new(Device), &config, settings.subscribe());
    let sample = tracker.locate_once().await.unwrap();

    let monitor = ViewportMonitor::new(Arc::new(SegmentSynchronizer::new(backend.clone())), &config);
    let region = ViewportMonitor::<Backend>::initial_region(Some(&sample));
    assert_eq!(region.center(), HERE);

    // 0.01 degrees across 1080px is zoom 17
    let phone = Screen {
        width_px: 1080.0,
        half_span: 0.005,
    };
    let outcome = monitor.on_region_change(region, &phone).await;
    assert!(matches!(outcome, ViewportOutcome::Synced { segment_count: 1, .. }));
    let segments = monitor.synchronizer().segments();
    assert!(segments[0].status.jam);
    assert_eq!(segments[0].coordinates[0], HERE);

    // zooming out to the city overview drops everything without a query
    let outcome = monitor
        .on_region_change(roadwatch_sync::Region::default(), &phone)
        .await;
    assert!(matches!(outcome, ViewportOutcome::Cleared { .. }));
    assert_eq!(monitor.synchronizer().segment_count(), 0);
    assert_eq!(backend.segment_queries.load(Ordering::SeqCst), 1);

    let alerts = Arc::new(Alerts::default());
    let check = Arc::new(ProximityCheck::new(backend.clone(), alerts.clone()));
    let poller = ProximityPoller::start(check, settings.subscribe(), tracker.subscribe()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), async {
        while alerts.0.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("poll on start with a known location");

    assert_eq!(*backend.proximity_queries.lock().unwrap(), [HERE]);
    assert_eq!(*alerts.0.lock().unwrap(), ["Traffic jam 200m ahead"]);
    assert_eq!(settings.current(), AppSettings::default());

    poller.stop();
}
