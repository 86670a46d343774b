use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{db::Database, settings::Settings};

use super::{
    dispatcher::{current_sink, dispatch_loop, Dispatcher, SharedSink},
    AlertRequest, BackendEvent, DeliveredAlert, EventSink, NotificationBackend,
};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::backend";

use crate::{log_info, log_warn};

struct DispatchTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// SQLite-backed scheduling backend with an in-process dispatch loop.
///
/// Alerts live in the database, so requests scheduled before a restart are
/// still delivered (late) once [`LocalBackend::start`] runs again.
pub struct LocalBackend {
    db: Database,
    sink: SharedSink,
    badge: AtomicUsize,
    notifications_allowed: bool,
    foreground: bool,
    dispatch_interval: Duration,
    presentation_timeout: Duration,
    task: Mutex<Option<DispatchTask>>,
}

impl LocalBackend {
    pub fn new(db: Database, settings: &Settings) -> Self {
        Self {
            db,
            sink: Arc::new(Mutex::new(None)),
            badge: AtomicUsize::new(0),
            notifications_allowed: settings.notifications_allowed,
            foreground: settings.foreground,
            dispatch_interval: settings.dispatch_interval(),
            presentation_timeout: settings.presentation_timeout(),
            task: Mutex::new(None),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            db: self.db.clone(),
            sink: self.sink.clone(),
            foreground: self.foreground,
            presentation_timeout: self.presentation_timeout,
        }
    }

    pub fn start(&self) -> Result<()> {
        let mut guard = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            bail!("dispatch loop already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(dispatch_loop(
            self.dispatcher(),
            self.dispatch_interval,
            cancel_token.clone(),
        ));
        *guard = Some(DispatchTask {
            handle,
            cancel_token,
        });
        log_info!("dispatch loop started (every {:?})", self.dispatch_interval);
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.cancel_token.cancel();
            task.handle.await?;
        }
        Ok(())
    }

    /// Deliver everything due at `now` without waiting for the next tick.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<usize> {
        self.dispatcher().run_once(now).await
    }

    /// Simulate the user interacting with the delivered alert `identifier`.
    pub fn respond(&self, identifier: &str) -> bool {
        let Some(sink) = current_sink(&self.sink) else {
            return false;
        };
        sink.send(BackendEvent::Response {
            identifier: identifier.to_string(),
        })
        .is_ok()
    }

    pub fn badge(&self) -> usize {
        self.badge.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationBackend for LocalBackend {
    async fn request_authorization(&self) -> bool {
        if !self.notifications_allowed {
            log_warn!("notifications are disabled in settings");
        }
        self.notifications_allowed
    }

    async fn submit(&self, request: AlertRequest) -> Result<()> {
        self.db.upsert_pending(&request).await
    }

    async fn cancel(&self, identifiers: Vec<String>) -> Result<()> {
        self.db.delete_pending(identifiers).await.map(|_| ())
    }

    async fn pending(&self) -> Result<Vec<String>> {
        let pending = self.db.list_pending().await?;
        Ok(pending.into_iter().map(|request| request.identifier).collect())
    }

    async fn delivered(&self) -> Result<Vec<DeliveredAlert>> {
        self.db.list_delivered().await
    }

    async fn remove_delivered(&self, identifiers: Vec<String>) -> Result<()> {
        if identifiers.is_empty() {
            return Ok(());
        }
        self.db.delete_delivered(identifiers).await.map(|_| ())
    }

    async fn remove_all_pending(&self) -> Result<()> {
        self.db.clear_pending().await.map(|_| ())
    }

    async fn remove_all_delivered(&self) -> Result<()> {
        self.db.clear_delivered().await.map(|_| ())
    }

    async fn set_badge(&self, count: usize) -> Result<()> {
        if self.badge.swap(count, Ordering::SeqCst) != count {
            log_info!("badge set to {count}");
        }
        Ok(())
    }

    fn attach(&self, sink: EventSink) {
        let mut guard = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(sink);
    }
}
