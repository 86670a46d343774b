//! The notification backend the alert engine schedules against.
//!
//! The backend owns the pending/delivered stores and fires deliveries at
//! roughly the requested wall-clock time. Everything here is eventually
//! consistent: enumerations may not yet reflect a cancel or purge issued a
//! moment earlier.

pub mod dispatcher;
pub mod local;

#[cfg(test)]
pub(crate) mod fake;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

pub use local::LocalBackend;

pub const ALARM_CATEGORY: &str = "alarm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub title: String,
    pub subtitle: String,
    pub body: String,
    pub category: String,
    pub badge: Option<u32>,
    pub sound: bool,
    /// Marks the chained alert fired at the end of a booking.
    pub end_of_booking: bool,
}

impl AlertPayload {
    pub fn booking_start(title: &str, message: &str) -> Self {
        Self {
            title: title.to_string(),
            subtitle: String::new(),
            body: message.to_string(),
            category: ALARM_CATEGORY.to_string(),
            badge: Some(1),
            sound: true,
            end_of_booking: false,
        }
    }

    /// Silent copy of a delivered start alert, flagged as end-of-booking.
    pub fn end_of_booking_from(start: &AlertPayload) -> Self {
        Self {
            title: start.title.clone(),
            subtitle: start.subtitle.clone(),
            body: start.body.clone(),
            category: start.category.clone(),
            badge: None,
            sound: false,
            end_of_booking: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    pub identifier: String,
    pub payload: AlertPayload,
    pub fire_at: DateTime<Utc>,
}

impl AlertRequest {
    /// Fire times have whole-second resolution; the fraction is dropped.
    pub fn new(identifier: String, payload: AlertPayload, fire_at: DateTime<Utc>) -> Self {
        Self {
            identifier,
            payload,
            fire_at: fire_at.trunc_subsecs(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredAlert {
    pub identifier: String,
    pub payload: AlertPayload,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// Show the alert with badge and sound.
    Present,
    Suppress,
}

#[derive(Debug)]
pub enum BackendEvent {
    /// An alert fired. The handler must answer on `reply`; a dropped reply
    /// is treated as [`Presentation::Present`].
    WillPresent {
        alert: DeliveredAlert,
        foreground: bool,
        reply: oneshot::Sender<Presentation>,
    },
    /// The user interacted with a delivered alert.
    Response { identifier: String },
}

pub type EventSink = mpsc::UnboundedSender<BackendEvent>;

#[async_trait]
pub trait NotificationBackend: Send + Sync + 'static {
    async fn request_authorization(&self) -> bool;

    /// Schedule `request`, replacing any pending request with the same identifier.
    async fn submit(&self, request: AlertRequest) -> Result<()>;

    async fn cancel(&self, identifiers: Vec<String>) -> Result<()>;

    async fn pending(&self) -> Result<Vec<String>>;

    async fn delivered(&self) -> Result<Vec<DeliveredAlert>>;

    async fn remove_delivered(&self, identifiers: Vec<String>) -> Result<()>;

    async fn remove_all_pending(&self) -> Result<()>;

    async fn remove_all_delivered(&self) -> Result<()>;

    /// Set the external unread-count indicator.
    async fn set_badge(&self, count: usize) -> Result<()>;

    /// Route delivery and response events to `sink`, replacing the previous sink.
    fn attach(&self, sink: EventSink);
}
