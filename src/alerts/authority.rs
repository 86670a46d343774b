use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};

use chrono::TimeDelta;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    backend::{AlertPayload, AlertRequest, BackendEvent, NotificationBackend},
    models::{Booking, DiagnosticsSnapshot, Interval, TimeSpan},
};

use super::{
    extender::FollowUpLedger,
    publisher::{Observer, SnapshotPublisher},
    reconciler,
};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::authority";

use crate::{log_debug, log_error, log_info, log_warn};

/// Owns the notification backend on behalf of the client: schedules booking
/// alerts, handles backend events and keeps the diagnostics observer fed.
///
/// None of the public operations fail or block on the backend; failures are
/// logged and show up only as a missing or stale snapshot.
#[derive(Clone)]
pub struct AlertAuthority {
    pub(super) backend: Arc<dyn NotificationBackend>,
    pub(super) ledger: Arc<FollowUpLedger>,
    tolerance: TimeDelta,
    authorized: Arc<AtomicBool>,
    publisher: SnapshotPublisher,
    /// Sequence of the newest refresh that updated the badge.
    badge_sequence: Arc<AtomicU64>,
    received: Arc<Mutex<Vec<TimeSpan>>>,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AlertAuthority {
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn NotificationBackend>, tolerance: TimeDelta) -> Self {
        Self {
            backend,
            ledger: Arc::new(FollowUpLedger::default()),
            tolerance,
            authorized: Arc::new(AtomicBool::new(false)),
            publisher: SnapshotPublisher::new(),
            badge_sequence: Arc::new(AtomicU64::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn tolerance(&self) -> TimeDelta {
        self.tolerance
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    /// Attach the event handler and ask for authorization.
    ///
    /// Returns immediately; the handle resolves to the grant once the backend
    /// answers. A denial leaves scheduling as a no-op and is not retried.
    pub fn initialize(&self) -> JoinHandle<bool> {
        self.listen();

        let this = self.clone();
        tokio::spawn(async move {
            let granted = this.backend.request_authorization().await;
            if granted {
                this.authorized.store(true, Ordering::SeqCst);
                log_info!("Notifications allowed");
            } else {
                log_warn!("Notifications NOT allowed; scheduling disabled");
            }
            granted
        })
    }

    /// Route backend events to this authority, replacing any previous handler.
    fn listen(&self) {
        let (sink, mut events) = mpsc::unbounded_channel();
        self.backend.attach(sink);

        let this = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                this.handle_event(event).await;
            }
        });

        let mut guard = match self.listener.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = guard.replace(handle) {
            previous.abort();
        }
    }

    async fn handle_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::WillPresent {
                alert,
                foreground,
                reply,
            } => self.on_delivery(alert, foreground, reply).await,
            BackendEvent::Response { identifier } => self.on_response(&identifier),
        }
    }

    fn on_response(&self, identifier: &str) {
        let Some(span) = TimeSpan::decode(identifier) else {
            log_warn!("response for undecodable identifier {identifier}");
            return;
        };
        let mut received = match self.received.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        received.push(span);
        log_info!("response for {identifier}, received count= {}", received.len());
    }

    /// Spans of alerts the user interacted with, oldest first.
    pub fn received(&self) -> Vec<TimeSpan> {
        match self.received.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Schedule the start alert for `interval`; returns its identifier once
    /// the backend accepted it.
    pub async fn schedule(&self, title: &str, message: &str, interval: Interval) -> Option<String> {
        if !self.is_authorized() {
            log_debug!("not authorized; skipping alert for {}", interval.brief());
            return None;
        }

        let span = TimeSpan::for_interval(title, message, &interval);
        log_info!("@{span}");
        let identifier = span.encode();

        let request = AlertRequest::new(
            identifier.clone(),
            AlertPayload::booking_start(title, message),
            interval.start(),
        );

        match self.backend.submit(request).await {
            Ok(()) => {
                self.request_refresh();
                Some(identifier)
            }
            Err(err) => {
                log_error!("alert submission failed for {span}: {err:?}");
                None
            }
        }
    }

    /// Schedule alerts for `interval` and return the resulting booking.
    pub async fn book(&self, title: &str, message: &str, interval: Interval) -> Booking {
        let mut booking = Booking::new(interval);
        booking.identifier = self.schedule(title, message, interval).await;
        booking
    }

    /// Fire-and-forget; the refresh it triggers may still count the request.
    pub fn cancel_pending(&self, identifier: &str) {
        log_info!("cancel {identifier}");
        let backend = self.backend.clone();
        let identifiers = vec![identifier.to_string()];
        tokio::spawn(async move {
            if let Err(err) = backend.cancel(identifiers).await {
                log_warn!("cancel failed: {err:?}");
            }
        });
        self.request_refresh();
    }

    /// Bulk clear; the returned handle may be awaited or dropped.
    pub fn clear_all_pending(&self) -> JoinHandle<()> {
        self.ledger.clear();
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.remove_all_pending().await {
                log_warn!("clearing pending alerts failed: {err:?}");
            }
        })
    }

    pub fn clear_all_delivered(&self) -> JoinHandle<()> {
        self.ledger.clear();
        let backend = self.backend.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = backend.remove_all_delivered().await {
                log_warn!("clearing delivered alerts failed: {err:?}");
            }
        });
        self.request_refresh();
        handle
    }

    pub fn clear_badge(&self) {
        let backend = self.backend.clone();
        tokio::spawn(async move {
            if let Err(err) = backend.set_badge(0).await {
                log_warn!("clearing badge failed: {err:?}");
            }
        });
    }

    /// Install the single diagnostics observer and push it a fresh snapshot.
    pub fn set_observer<F>(&self, observer: F)
    where
        F: Fn(DiagnosticsSnapshot) + Send + Sync + 'static,
    {
        let observer: Observer = Arc::new(observer);
        self.publisher.set_observer(observer);
        self.request_refresh();
    }

    pub fn latest_snapshot(&self) -> Option<DiagnosticsSnapshot> {
        self.publisher.latest()
    }

    pub fn request_refresh(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            this.refresh().await;
        });
    }

    /// Re-derive the counts from the backend, purge obsolete deliveries,
    /// update the badge and publish the snapshot.
    pub async fn refresh(&self) -> Option<DiagnosticsSnapshot> {
        let sequence = self.publisher.next_sequence();

        let reconciliation = match reconciler::collect(&self.backend, self.tolerance).await {
            Ok(reconciliation) => reconciliation,
            Err(err) => {
                log_warn!("diagnostics refresh skipped: {err:?}");
                return None;
            }
        };

        if !reconciliation.obsolete.is_empty() {
            log_debug!("purging {} obsolete alerts", reconciliation.obsolete.len());
            // A failed purge resurfaces on the next refresh.
            if let Err(err) = self.backend.remove_delivered(reconciliation.obsolete).await {
                log_warn!("purging obsolete alerts failed: {err:?}");
            }
        }

        let snapshot = reconciliation.snapshot;
        self.update_badge(sequence, snapshot.current).await;

        log_info!("@{snapshot}");
        self.publisher.publish(sequence, snapshot);
        Some(snapshot)
    }

    /// Set the badge unless a newer refresh already did.
    async fn update_badge(&self, sequence: u64, current: usize) {
        if self.badge_sequence.fetch_max(sequence, Ordering::SeqCst) > sequence {
            log_debug!("skipping badge from stale refresh #{sequence}");
            return;
        }
        if let Err(err) = self.backend.set_badge(current).await {
            log_warn!("badge update failed: {err:?}");
        }
    }

    /// Stop handling backend events.
    pub fn shutdown(&self) {
        let handle = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{SubsecRound, Utc};
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::backend::{fake::FakeBackend, Presentation};

    fn tolerance() -> TimeDelta {
        TimeDelta::seconds(2)
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within 1s");
    }

    async fn authorized(fake: &Arc<FakeBackend>) -> AlertAuthority {
        let authority = AlertAuthority::new(fake.clone(), tolerance());
        assert!(authority.initialize().await.unwrap());
        authority
    }

    fn upcoming(seconds_from_now: i64, duration: i64) -> Interval {
        Interval::starting_at(
            Utc::now() + TimeDelta::seconds(seconds_from_now),
            TimeDelta::seconds(duration),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn denied_authorization_makes_scheduling_a_no_op() {
        let fake = Arc::new(FakeBackend::denying());
        let authority = AlertAuthority::new(fake.clone(), tolerance());
        assert!(!authority.initialize().await.unwrap());

        assert_eq!(authority.schedule("R", "booked", upcoming(10, 10)).await, None);
        assert!(fake.submissions().is_empty());
    }

    #[tokio::test]
    async fn schedule_submits_encoded_identifier_at_start() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        let interval = upcoming(10, 7200);

        let identifier = authority
            .schedule("R", "booked", interval)
            .await
            .expect("scheduled");

        let submissions = fake.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].identifier, identifier);
        assert_eq!(submissions[0].fire_at, interval.start().trunc_subsecs(0));
        assert!(!submissions[0].payload.end_of_booking);

        let span = TimeSpan::decode(&identifier).unwrap();
        assert_eq!(span.title(), "R");
        assert_eq!(span.message(), "booked");
        assert_eq!(span.end().timestamp_micros(), interval.end().timestamp_micros());
    }

    #[tokio::test]
    async fn submission_failure_is_absorbed() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        fake.fail_submissions(true);

        let booking = authority.book("R", "booked", upcoming(10, 10)).await;
        assert_eq!(booking.identifier, None);
        assert!(fake.pending_requests().is_empty());
    }

    #[tokio::test]
    async fn start_delivery_chains_exactly_one_end_alert() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        let interval = upcoming(0, 7200);
        let identifier = authority.schedule("R", "booked", interval).await.unwrap();

        assert_eq!(fake.fire(&identifier).await, Some(Presentation::Present));
        eventually(|| fake.submissions().len() == 2).await;

        let follow_up = &fake.submissions()[1];
        assert_eq!(follow_up.identifier, identifier);
        assert_eq!(follow_up.fire_at, interval.end().trunc_subsecs(0));
        assert!(follow_up.payload.end_of_booking);
        assert_eq!(follow_up.payload.badge, None);

        // The end alert is swallowed, removed and never chained again.
        assert_eq!(fake.fire(&identifier).await, Some(Presentation::Suppress));
        eventually(|| fake.delivered_identifiers().is_empty()).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.submissions().len(), 2);
    }

    #[tokio::test]
    async fn repeated_follow_up_for_same_delivery_is_refused() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        let span = TimeSpan::for_interval("R", "booked", &upcoming(0, 600));
        let delivered = crate::backend::DeliveredAlert {
            identifier: span.encode(),
            payload: AlertPayload::booking_start("R", "booked"),
            delivered_at: Utc::now(),
        };

        assert!(authority.schedule_follow_up(&delivered).await);
        assert!(!authority.schedule_follow_up(&delivered).await);
        assert_eq!(fake.submissions().len(), 1);
    }

    #[tokio::test]
    async fn follow_up_for_foreign_identifier_is_skipped() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        let delivered = crate::backend::DeliveredAlert {
            identifier: "not-a-span".into(),
            payload: AlertPayload::booking_start("R", "booked"),
            delivered_at: Utc::now(),
        };

        assert!(!authority.schedule_follow_up(&delivered).await);
        assert!(fake.submissions().is_empty());
    }

    #[tokio::test]
    async fn observer_gets_initial_snapshot_without_external_trigger() {
        let fake = Arc::new(FakeBackend::granting());
        let now = Utc::now();
        for identifier in ["p1", "p2", "p3"] {
            fake.seed_pending(identifier);
        }
        let payload = AlertPayload::booking_start("R", "booked");
        for offset in [-5, -30] {
            let span = TimeSpan::new(
                "R",
                "booked",
                now + TimeDelta::seconds(offset),
                now + TimeDelta::seconds(3600),
            )
            .unwrap();
            fake.seed_delivered(&span.encode(), payload.clone());
        }
        for offset in [-7200, -3600] {
            let span = TimeSpan::new(
                "R",
                "booked",
                now + TimeDelta::seconds(offset),
                now + TimeDelta::seconds(offset + 60),
            )
            .unwrap();
            fake.seed_delivered(&span.encode(), payload.clone());
        }
        fake.seed_delivered("foreign", payload);

        let authority = AlertAuthority::new(fake.clone(), tolerance());
        let (tx, mut rx) = mpsc::unbounded_channel();
        authority.set_observer(move |snapshot| {
            let _ = tx.send(snapshot);
        });

        let snapshot = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            snapshot,
            DiagnosticsSnapshot {
                pending: 3,
                delivered: 5,
                current: 2,
            }
        );

        // Obsolete and undecodable deliveries were purged; the badge shows current.
        assert_eq!(fake.delivered_identifiers().len(), 2);
        assert_eq!(fake.badge(), Some(2));
        assert_eq!(authority.latest_snapshot(), Some(snapshot));
    }

    #[tokio::test]
    async fn refresh_leaves_no_obsolete_delivery_behind() {
        let fake = Arc::new(FakeBackend::granting());
        let now = Utc::now();
        let finished =
            TimeSpan::new("R", "m", now - TimeDelta::seconds(90), now - TimeDelta::seconds(30))
                .unwrap();
        fake.seed_delivered(&finished.encode(), AlertPayload::booking_start("R", "m"));

        let authority = AlertAuthority::new(fake.clone(), tolerance());
        let snapshot = authority.refresh().await.unwrap();
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.current, 0);
        assert!(fake.delivered_identifiers().is_empty());

        let next = authority.refresh().await.unwrap();
        assert_eq!(next, DiagnosticsSnapshot::default());
    }

    #[tokio::test]
    async fn cancel_pending_removes_request_eventually() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        let identifier = authority
            .schedule("R", "booked", upcoming(60, 60))
            .await
            .unwrap();

        authority.cancel_pending(&identifier);
        eventually(|| fake.pending_requests().is_empty()).await;
        assert_eq!(fake.cancelled(), vec![identifier]);

        let snapshot = authority.refresh().await.unwrap();
        assert_eq!(snapshot.pending, 0);
    }

    #[tokio::test]
    async fn clears_and_badge_reset() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        authority.schedule("R", "a", upcoming(60, 60)).await.unwrap();
        fake.seed_delivered("x", AlertPayload::booking_start("R", "m"));

        authority.clear_all_pending();
        authority.clear_all_delivered();
        authority.clear_badge();

        eventually(|| fake.pending_requests().is_empty()).await;
        eventually(|| fake.delivered_identifiers().is_empty()).await;
        eventually(|| fake.badge() == Some(0)).await;
        assert_eq!(authority.ledger.len(), 0);
    }

    #[tokio::test]
    async fn responses_record_decodable_spans() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        let span = TimeSpan::for_interval("R", "booked", &upcoming(0, 60));

        assert!(fake.respond("garbage"));
        assert!(fake.respond(&span.encode()));
        eventually(|| authority.received().len() == 1).await;
        assert_eq!(authority.received(), vec![span]);
    }

    #[tokio::test]
    async fn reinitializing_keeps_a_single_handler() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = authorized(&fake).await;
        assert!(authority.initialize().await.unwrap());
        assert!(fake.has_sink());

        let identifier = authority
            .schedule("R", "booked", upcoming(0, 600))
            .await
            .unwrap();
        assert_eq!(fake.fire(&identifier).await, Some(Presentation::Present));
        eventually(|| fake.submissions().len() == 2).await;
        sleep(Duration::from_millis(50)).await;
        assert_eq!(fake.submissions().len(), 2);

        authority.shutdown();
    }

    #[tokio::test]
    async fn stale_refresh_does_not_overwrite_the_badge() {
        let fake = Arc::new(FakeBackend::granting());
        let authority = AlertAuthority::new(fake.clone(), tolerance());
        let older = authority.publisher.next_sequence();
        let newer = authority.publisher.next_sequence();

        authority.update_badge(newer, 3).await;
        authority.update_badge(older, 9).await;
        assert_eq!(fake.badge(), Some(3));

        authority.update_badge(authority.publisher.next_sequence(), 1).await;
        assert_eq!(fake.badge(), Some(1));
    }

    #[tokio::test]
    async fn failed_purge_is_retried_on_the_next_refresh() {
        let fake = Arc::new(FakeBackend::granting());
        fake.seed_delivered("foreign", AlertPayload::booking_start("R", "m"));
        fake.fail_removals(true);

        let authority = AlertAuthority::new(fake.clone(), tolerance());
        let snapshot = authority.refresh().await.unwrap();
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(fake.delivered_identifiers(), vec!["foreign".to_string()]);

        fake.fail_removals(false);
        authority.refresh().await.unwrap();
        assert!(fake.delivered_identifiers().is_empty());
    }
}
