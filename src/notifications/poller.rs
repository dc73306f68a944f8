//! Proximity notification poller.
//!
//! One spawned task owns the only poll timer. Triggers:
//! - the timer, every `notifInterval` minutes
//! - a new sample on the tracker's location channel
//! - [`ProximityPoller::trigger`]
//!
//! Every poll, whatever triggered it, resets the deadline to `now + interval`,
//! with `now` taken when the poll is triggered.
//! The reset is a deadline reassignment on a single `Sleep`, so an old timer
//! can never fire next to a new one.

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use super::{AlertSink, NotificationSource};
use crate::error::{Result, SyncError};
use crate::settings::AppSettings;
use crate::types::{GeoPoint, LocationSample};

/// One proximity query plus the last-content alert filter.
pub struct ProximityCheck<N, A> {
    source: Arc<N>,
    sink: Arc<A>,
    last_content: Mutex<Option<String>>,
}

impl<N: NotificationSource, A: AlertSink> ProximityCheck<N, A> {
    pub fn new(source: Arc<N>, sink: Arc<A>) -> Self {
        Self {
            source,
            sink,
            last_content: Mutex::new(None),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.source.is_authenticated()
    }

    /// Content of the most recently surfaced alert.
    pub fn last_content(&self) -> Option<String> {
        self.last_content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Query notifications near `point` and alert on each whose content differs
    /// from the last one surfaced. Returns the number of alerts raised.
    pub async fn poll_once(&self, point: GeoPoint) -> Result<usize> {
        let events = self.source.notifications_near(point).await?;
        debug!(
            "[Poller] {} notifications near {:.5}, {:.5}",
            events.len(),
            point.latitude,
            point.longitude
        );

        let mut raised = 0;
        for event in &events {
            if self.last_content().as_deref() == Some(event.content.as_str()) {
                continue;
            }
            match self.sink.alert(event).await {
                Ok(()) => {
                    raised += 1;
                    *self.last_content.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(event.content.clone());
                }
                Err(SyncError::PermissionDenied { .. }) => {
                    debug!("[Poller] Alerts not permitted, skipping remaining events");
                    break;
                }
                Err(e) => warn!("[Poller] Alert failed: {}", e),
            }
        }
        Ok(raised)
    }
}

/// Handle to the running poll task. Dropping it stops polling.
pub struct ProximityPoller {
    manual: mpsc::UnboundedSender<GeoPoint>,
    task: Option<JoinHandle<()>>,
}

impl ProximityPoller {
    /// Spawn the poll task.
    ///
    /// Fails with [`SyncError::Unauthenticated`] when no access token is
    /// available; nothing is spawned in that case. If a location is already
    /// known and polling is enabled, one poll runs immediately.
    pub fn start<N, A>(
        check: Arc<ProximityCheck<N, A>>,
        settings: watch::Receiver<AppSettings>,
        locations: watch::Receiver<Option<LocationSample>>,
    ) -> Result<Self>
    where
        N: NotificationSource,
        A: AlertSink,
    {
        if !check.is_authenticated() {
            warn!("[Poller] Not starting: no access token");
            return Err(SyncError::Unauthenticated);
        }

        let (manual, manual_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(poll_loop(check, settings, locations, manual_rx));
        Ok(Self {
            manual,
            task: Some(task),
        })
    }

    /// Poll now at `point`, resetting the timer.
    pub fn trigger(&self, point: GeoPoint) {
        if self.manual.send(point).is_err() {
            debug!("[Poller] Trigger ignored, poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("[Poller] Stopped");
        }
    }
}

impl Drop for ProximityPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_poll<N: NotificationSource, A: AlertSink>(check: &ProximityCheck<N, A>, point: GeoPoint) {
    match check.poll_once(point).await {
        Ok(raised) if raised > 0 => info!("[Poller] Raised {} alerts", raised),
        Ok(_) => {}
        Err(e) => warn!("[Poller] Poll failed: {}", e),
    }
}

async fn poll_loop<N: NotificationSource, A: AlertSink>(
    check: Arc<ProximityCheck<N, A>>,
    mut settings: watch::Receiver<AppSettings>,
    mut locations: watch::Receiver<Option<LocationSample>>,
    mut manual: mpsc::UnboundedReceiver<GeoPoint>,
) {
    let mut current = settings.borrow_and_update().clone();
    let mut interval = current.poll_interval();
    let mut settings_open = true;
    let mut locations_open = true;

    let timer = sleep(interval);
    tokio::pin!(timer);

    info!(
        "[Poller] Started: every {:?}, enabled={}",
        interval, current.notifications_enabled
    );

    let known = *locations.borrow_and_update();
    if current.notifications_enabled {
        if let Some(sample) = known {
            let deadline = Instant::now() + interval;
            run_poll(&check, sample.point()).await;
            timer.as_mut().reset(deadline);
        }
    }

    loop {
        let enabled = current.notifications_enabled;

        let point = tokio::select! {
            _ = timer.as_mut(), if enabled => {
                let latest = *locations.borrow();
                if latest.is_none() {
                    debug!("[Poller] Timer fired with no location yet");
                }
                latest.map(|s| s.point())
            }
            changed = locations.changed(), if locations_open => {
                if changed.is_err() {
                    locations_open = false;
                    continue;
                }
                let latest = *locations.borrow_and_update();
                latest.filter(|_| enabled).map(|s| s.point())
            }
            changed = settings.changed(), if settings_open => {
                if changed.is_err() {
                    settings_open = false;
                    continue;
                }
                let next = settings.borrow_and_update().clone();
                if next.poll_interval() != interval
                    || next.notifications_enabled != current.notifications_enabled
                {
                    interval = next.poll_interval();
                    timer.as_mut().reset(Instant::now() + interval);
                    info!(
                        "[Poller] Rescheduled: every {:?}, enabled={}",
                        interval, next.notifications_enabled
                    );
                }
                current = next;
                continue;
            }
            Some(point) = manual.recv() => {
                Some(point).filter(|_| enabled)
            }
            else => break,
        };

        // Measured from the trigger, not from when a slow poll returns.
        // Reset on every trigger, including a timer tick with nothing to poll
        let deadline = Instant::now() + interval;
        if let Some(point) = point {
            run_poll(&check, point).await;
        }
        timer.as_mut().reset(deadline);
    }

    debug!("[Poller] All triggers closed, exiting");
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::test_support::{FakeSource, RecordingSink};
    use super::*;
    use crate::notifications::{NotificationEvent, NotificationKind};

    const MINUTE: Duration = Duration::from_secs(60);

    fn status(content: &str) -> NotificationEvent {
        NotificationEvent::new("", NotificationKind::Status, content)
    }

    fn here() -> LocationSample {
        LocationSample::now(GeoPoint::new(10.8231, 106.6297))
    }

    struct Harness {
        source: Arc<FakeSource>,
        sink: Arc<RecordingSink>,
        check: Arc<ProximityCheck<FakeSource, RecordingSink>>,
        settings: watch::Sender<AppSettings>,
        locations: watch::Sender<Option<LocationSample>>,
    }

    impl Harness {
        fn new(nearby: Vec<NotificationEvent>, location: Option<LocationSample>) -> Self {
            Self::with_source(FakeSource::new(nearby), location)
        }

        fn with_source(source: FakeSource, location: Option<LocationSample>) -> Self {
            let source = Arc::new(source);
            let sink = Arc::new(RecordingSink::default());
            let check = Arc::new(ProximityCheck::new(source.clone(), sink.clone()));
            let (settings, _) = watch::channel(AppSettings::default());
            let (locations, _) = watch::channel(location);
            Self {
                source,
                sink,
                check,
                settings,
                locations,
            }
        }

        fn start(&self) -> Result<ProximityPoller> {
            ProximityPoller::start(
                self.check.clone(),
                self.settings.subscribe(),
                self.locations.subscribe(),
            )
        }
    }

    #[tokio::test]
    async fn test_poll_once_alerts_only_on_changed_content() {
        let h = Harness::new(vec![status("Jam"), status("Jam"), status("Flood")], None);

        assert_eq!(h.check.poll_once(here().point()).await.unwrap(), 2);
        assert_eq!(h.sink.contents(), ["Jam", "Flood"]);

        // same content as last surfaced
        h.source.set_nearby(vec![status("Flood")]);
        assert_eq!(h.check.poll_once(here().point()).await.unwrap(), 0);

        // only compared with the single last one
        h.source.set_nearby(vec![status("Jam")]);
        assert_eq!(h.check.poll_once(here().point()).await.unwrap(), 1);
        assert_eq!(h.check.last_content().as_deref(), Some("Jam"));
    }

    #[tokio::test]
    async fn test_denied_alerts_do_not_fail_poll() {
        let h = Harness::new(vec![status("Jam")], None);
        h.sink.denied.store(true, Ordering::SeqCst);

        assert_eq!(h.check.poll_once(here().point()).await.unwrap(), 0);
        assert!(h.check.last_content().is_none());

        h.sink.denied.store(false, Ordering::SeqCst);
        assert_eq!(h.check.poll_once(here().point()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_requires_token() {
        let h = Harness::new(vec![], Some(here()));
        h.source.set_authenticated(false);

        assert!(matches!(h.start(), Err(SyncError::Unauthenticated)));
        tokio::task::yield_now().await;
        assert!(h.source.poll_times().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_poll_when_location_known() {
        let h = Harness::new(vec![status("Jam")], Some(here()));
        let t0 = Instant::now();
        let _poller = h.start().unwrap();

        sleep(MINUTE).await;
        assert_eq!(h.source.poll_times(), [t0]);
        assert_eq!(h.sink.contents(), ["Jam"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_movement_poll_resets_timer() {
        let h = Harness::new(vec![], None);
        let t0 = Instant::now();
        let _poller = h.start().unwrap();

        // the 5 minute timer would fire at t0+5m; movement at t0+2m resets it
        sleep(2 * MINUTE).await;
        h.locations.send_replace(Some(here()));

        sleep(6 * MINUTE).await;
        assert_eq!(h.source.poll_times(), [t0 + 2 * MINUTE, t0 + 7 * MINUTE]);

        sleep(5 * MINUTE).await;
        assert_eq!(
            h.source.poll_times(),
            [t0 + 2 * MINUTE, t0 + 7 * MINUTE, t0 + 12 * MINUTE]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_does_not_delay_next_timer() {
        let slow = FakeSource::new(vec![]).with_latency(Duration::from_secs(30));
        let h = Harness::with_source(slow, None);
        let t0 = Instant::now();
        let _poller = h.start().unwrap();

        sleep(2 * MINUTE).await;
        h.locations.send_replace(Some(here()));

        // the 30s answer time must not push the next tick past t0+7m
        sleep(5 * MINUTE + MINUTE / 4).await;
        assert_eq!(h.source.poll_times(), [t0 + 2 * MINUTE, t0 + 7 * MINUTE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_resets_timer() {
        let h = Harness::new(vec![], Some(here()));
        let t0 = Instant::now();
        let poller = h.start().unwrap();

        sleep(3 * MINUTE).await;
        poller.trigger(here().point());

        sleep(4 * MINUTE).await;
        assert_eq!(h.source.poll_times(), [t0, t0 + 3 * MINUTE]);

        sleep(2 * MINUTE).await;
        assert_eq!(h.source.poll_times(), [t0, t0 + 3 * MINUTE, t0 + 8 * MINUTE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_live() {
        let h = Harness::new(vec![], Some(here()));
        let t0 = Instant::now();
        let _poller = h.start().unwrap();

        sleep(MINUTE).await;
        h.settings.send_modify(|s| s.notif_interval = 2);

        sleep(4 * MINUTE + MINUTE / 2).await;
        assert_eq!(
            h.source.poll_times(),
            [t0, t0 + 3 * MINUTE, t0 + 5 * MINUTE]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_parks_and_enable_resumes() {
        let h = Harness::new(vec![], Some(here()));
        let t0 = Instant::now();
        let _poller = h.start().unwrap();

        sleep(MINUTE).await;
        h.settings.send_modify(|s| s.notifications_enabled = false);

        // neither timer nor movement polls while disabled
        sleep(10 * MINUTE).await;
        h.locations.send_replace(Some(here()));
        sleep(10 * MINUTE).await;
        assert_eq!(h.source.poll_times(), [t0]);

        h.settings.send_modify(|s| s.notifications_enabled = true);
        sleep(6 * MINUTE).await;
        assert_eq!(h.source.poll_times(), [t0, t0 + 26 * MINUTE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_polling() {
        let h = Harness::new(vec![], Some(here()));
        let poller = h.start().unwrap();
        sleep(MINUTE).await;
        assert!(poller.is_running());

        poller.stop();
        sleep(30 * MINUTE).await;
        assert_eq!(h.source.poll_times().len(), 1);
    }
}
