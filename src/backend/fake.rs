//! In-memory backend for exercising the alert engine without SQLite or timers.

use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::oneshot;

use super::{
    AlertPayload, AlertRequest, BackendEvent, DeliveredAlert, EventSink, NotificationBackend,
    Presentation,
};

#[derive(Default)]
struct FakeState {
    grant: bool,
    fail_submissions: bool,
    fail_removals: bool,
    pending: Vec<AlertRequest>,
    delivered: Vec<DeliveredAlert>,
    submissions: Vec<AlertRequest>,
    cancelled: Vec<String>,
    badge: Option<usize>,
    sink: Option<EventSink>,
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn granting() -> Self {
        let backend = Self::default();
        backend.lock().grant = true;
        backend
    }

    pub fn denying() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail_submissions(&self, fail: bool) {
        self.lock().fail_submissions = fail;
    }

    pub fn fail_removals(&self, fail: bool) {
        self.lock().fail_removals = fail;
    }

    pub fn seed_pending(&self, identifier: &str) {
        self.lock().pending.push(AlertRequest::new(
            identifier.to_string(),
            AlertPayload::booking_start("seed", "seed"),
            Utc::now(),
        ));
    }

    pub fn seed_delivered(&self, identifier: &str, payload: AlertPayload) {
        self.lock().delivered.push(DeliveredAlert {
            identifier: identifier.to_string(),
            payload,
            delivered_at: Utc::now(),
        });
    }

    pub fn submissions(&self) -> Vec<AlertRequest> {
        self.lock().submissions.clone()
    }

    pub fn pending_requests(&self) -> Vec<AlertRequest> {
        self.lock().pending.clone()
    }

    pub fn delivered_identifiers(&self) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .map(|alert| alert.identifier.clone())
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn badge(&self) -> Option<usize> {
        self.lock().badge
    }

    pub fn has_sink(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Fire the pending request `identifier` as a foreground delivery and
    /// return the handler's presentation decision.
    pub async fn fire(&self, identifier: &str) -> Option<Presentation> {
        let (alert, sink) = {
            let mut state = self.lock();
            let index = state
                .pending
                .iter()
                .position(|request| request.identifier == identifier)?;
            let request = state.pending.remove(index);
            let alert = DeliveredAlert {
                identifier: request.identifier,
                payload: request.payload,
                delivered_at: Utc::now(),
            };
            state
                .delivered
                .retain(|existing| existing.identifier != alert.identifier);
            state.delivered.push(alert.clone());
            (alert, state.sink.clone()?)
        };

        let (reply, decision) = oneshot::channel();
        sink.send(BackendEvent::WillPresent {
            alert,
            foreground: true,
            reply,
        })
        .ok()?;
        decision.await.ok()
    }

    pub fn respond(&self, identifier: &str) -> bool {
        let sink = self.lock().sink.clone();
        sink.map(|sink| {
            sink.send(BackendEvent::Response {
                identifier: identifier.to_string(),
            })
            .is_ok()
        })
        .unwrap_or(false)
    }
}

#[async_trait]
impl NotificationBackend for FakeBackend {
    async fn request_authorization(&self) -> bool {
        self.lock().grant
    }

    async fn submit(&self, request: AlertRequest) -> Result<()> {
        let mut state = self.lock();
        if state.fail_submissions {
            bail!("submission rejected");
        }
        state
            .pending
            .retain(|existing| existing.identifier != request.identifier);
        state.pending.push(request.clone());
        state.submissions.push(request);
        Ok(())
    }

    async fn cancel(&self, identifiers: Vec<String>) -> Result<()> {
        let mut state = self.lock();
        state
            .pending
            .retain(|request| !identifiers.contains(&request.identifier));
        state.cancelled.extend(identifiers);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .pending
            .iter()
            .map(|request| request.identifier.clone())
            .collect())
    }

    async fn delivered(&self) -> Result<Vec<DeliveredAlert>> {
        Ok(self.lock().delivered.clone())
    }

    async fn remove_delivered(&self, identifiers: Vec<String>) -> Result<()> {
        let mut state = self.lock();
        if state.fail_removals {
            bail!("removal rejected");
        }
        state
            .delivered
            .retain(|alert| !identifiers.contains(&alert.identifier));
        Ok(())
    }

    async fn remove_all_pending(&self) -> Result<()> {
        self.lock().pending.clear();
        Ok(())
    }

    async fn remove_all_delivered(&self) -> Result<()> {
        self.lock().delivered.clear();
        Ok(())
    }

    async fn set_badge(&self, count: usize) -> Result<()> {
        self.lock().badge = Some(count);
        Ok(())
    }

    fn attach(&self, sink: EventSink) {
        self.lock().sink = Some(sink);
    }
}
