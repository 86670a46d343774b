use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::{
    sync::oneshot,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::db::Database;

use super::{BackendEvent, DeliveredAlert, EventSink, Presentation};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::dispatch";

use crate::{log_debug, log_error, log_info, log_warn};

pub(crate) type SharedSink = Arc<Mutex<Option<EventSink>>>;

pub(crate) fn current_sink(sink: &SharedSink) -> Option<EventSink> {
    match sink.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Moves due alerts from pending to delivered and hands each one to the
/// attached event handler.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub db: Database,
    pub sink: SharedSink,
    pub foreground: bool,
    pub presentation_timeout: Duration,
}

impl Dispatcher {
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.db.take_due_alerts(now).await?;
        let count = due.len();
        for alert in due {
            self.deliver(alert).await;
        }
        Ok(count)
    }

    /// Offer `alert` to the handler and return how it was shown.
    pub(super) async fn deliver(&self, alert: DeliveredAlert) -> Presentation {
        log_debug!("delivering {}", alert.identifier);

        let handled = match current_sink(&self.sink) {
            Some(sink) => Some(self.ask_handler(&sink, alert.clone()).await),
            None => None,
        };
        let decision = match (self.foreground, handled) {
            // Background deliveries are shown by the system whatever the handler says.
            (false, _) => Presentation::Present,
            (true, Some(decision)) => decision,
            (true, None) => Presentation::Suppress,
        };

        if decision == Presentation::Present {
            log_info!(
                "[alert] {} | {}{}",
                alert.payload.title,
                alert.payload.body,
                if alert.payload.sound { " (sound)" } else { "" }
            );
        }
        decision
    }

    async fn ask_handler(&self, sink: &EventSink, alert: DeliveredAlert) -> Presentation {
        let (reply, decision) = oneshot::channel();
        let event = BackendEvent::WillPresent {
            alert,
            foreground: self.foreground,
            reply,
        };
        if sink.send(event).is_err() {
            log_warn!("event handler detached; presenting by default");
            return Presentation::Present;
        }

        match time::timeout(self.presentation_timeout, decision).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => Presentation::Present,
            Err(_) => {
                log_warn!(
                    "no presentation decision within {:?}; presenting by default",
                    self.presentation_timeout
                );
                Presentation::Present
            }
        }
    }
}

pub(crate) async fn dispatch_loop(
    dispatcher: Dispatcher,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = dispatcher.run_once(Utc::now()).await {
                    log_error!("alert dispatch failed: {err:?}");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("dispatch loop shutting down");
                break;
            }
        }
    }
}
