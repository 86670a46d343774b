//! Chaining of end-of-booking alerts onto delivered start alerts.
//!
//! A start alert that fires schedules exactly one follow-up under the same
//! identifier, due at the end of the decoded span. The follow-up carries the
//! end-of-booking marker, so its own delivery is swallowed instead of
//! chaining again.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::{
    backend::{AlertPayload, AlertRequest, DeliveredAlert, Presentation},
    models::TimeSpan,
};

use super::AlertAuthority;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::extender";

use crate::{log_debug, log_error, log_info, log_warn};

/// Identifiers that already received their follow-up, keyed to span end.
#[derive(Default)]
pub struct FollowUpLedger {
    extended: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl FollowUpLedger {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        match self.extended.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns false when `identifier` was already extended and its span has not ended.
    pub fn claim(&self, identifier: &str, span_end: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let mut extended = self.lock();
        extended.retain(|_, end| *end >= now);
        if extended.contains_key(identifier) {
            return false;
        }
        extended.insert(identifier.to_string(), span_end);
        true
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// The end-of-booking request for a delivered start alert, or `None` when the
/// identifier is not a span this engine produced.
pub fn follow_up_request(delivered: &DeliveredAlert) -> Option<(TimeSpan, AlertRequest)> {
    let span = TimeSpan::decode(&delivered.identifier)?;
    let request = AlertRequest::new(
        delivered.identifier.clone(),
        AlertPayload::end_of_booking_from(&delivered.payload),
        span.end(),
    );
    Some((span, request))
}

impl AlertAuthority {
    /// Re-submit a delivered start alert's identifier to fire at the span end.
    ///
    /// Returns true when the follow-up was accepted by the backend.
    pub async fn schedule_follow_up(&self, delivered: &DeliveredAlert) -> bool {
        if !self.is_authorized() {
            return false;
        }

        let Some((span, request)) = follow_up_request(delivered) else {
            log_warn!(
                "failed to decode time span from {}; no end alert scheduled",
                delivered.identifier
            );
            return false;
        };

        if !self.ledger.claim(&request.identifier, span.end(), Utc::now()) {
            log_debug!("follow-up already scheduled for {}", request.identifier);
            return false;
        }

        let fire_at = request.fire_at;
        match self.backend.submit(request).await {
            Ok(()) => {
                log_info!("end alert scheduled at {fire_at} for {span}");
                self.request_refresh();
                true
            }
            Err(err) => {
                log_error!("end alert submission failed for {span}: {err:?}");
                false
            }
        }
    }

    /// Delivery hook: swallow end-of-booking alerts, present and chain start alerts.
    pub(crate) async fn on_delivery(
        &self,
        alert: DeliveredAlert,
        foreground: bool,
        reply: oneshot::Sender<Presentation>,
    ) {
        log_debug!(
            "delivered {} (end_of_booking={}, foreground={foreground})",
            alert.identifier,
            alert.payload.end_of_booking
        );

        if alert.payload.end_of_booking {
            let _ = reply.send(Presentation::Suppress);
            if let Err(err) = self
                .backend
                .remove_delivered(vec![alert.identifier.clone()])
                .await
            {
                log_warn!("failed to remove end alert {}: {err:?}", alert.identifier);
            }
        } else {
            let _ = reply.send(Presentation::Present);
            self.schedule_follow_up(&alert).await;
        }

        self.request_refresh();
    }
}
