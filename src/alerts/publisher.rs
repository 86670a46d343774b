//! Single-slot observer delivery for diagnostics snapshots.
//!
//! All snapshots reach the observer from one task, in order of the refresh
//! that produced them. A refresh that finishes after a newer one has already
//! been published is dropped instead of rolling the counts back.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use tokio::sync::mpsc;

use crate::models::DiagnosticsSnapshot;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::publisher";

use crate::{log_debug, log_info};

pub type Observer = Arc<dyn Fn(DiagnosticsSnapshot) + Send + Sync>;

#[derive(Default)]
struct Slot {
    observer: Option<Observer>,
    last_published: u64,
    latest: Option<DiagnosticsSnapshot>,
}

#[derive(Clone)]
pub struct SnapshotPublisher {
    slot: Arc<Mutex<Slot>>,
    sequence: Arc<AtomicU64>,
    outbox: mpsc::UnboundedSender<(u64, DiagnosticsSnapshot)>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SnapshotPublisher {
    /// Must be called inside a tokio runtime; spawns the delivery task.
    pub fn new() -> Self {
        let slot = Arc::new(Mutex::new(Slot::default()));
        let (outbox, mut inbox) = mpsc::unbounded_channel::<(u64, DiagnosticsSnapshot)>();

        let task_slot = slot.clone();
        tokio::spawn(async move {
            while let Some((sequence, snapshot)) = inbox.recv().await {
                let observer = {
                    let mut slot = lock(&task_slot);
                    if sequence <= slot.last_published {
                        log_debug!("dropping stale snapshot #{sequence} ({snapshot})");
                        continue;
                    }
                    slot.last_published = sequence;
                    slot.latest = Some(snapshot);
                    slot.observer.clone()
                };
                // Called outside the lock so the observer may replace itself.
                if let Some(observer) = observer {
                    observer(snapshot);
                }
            }
        });

        Self {
            slot,
            sequence: Arc::new(AtomicU64::new(0)),
            outbox,
        }
    }

    /// Install `observer`, discarding the previous one.
    pub fn set_observer(&self, observer: Observer) {
        let replaced = lock(&self.slot).observer.replace(observer).is_some();
        if replaced {
            log_info!("diagnostics observer replaced");
        }
    }

    /// Stamp a refresh at its start; later stamps win.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn publish(&self, sequence: u64, snapshot: DiagnosticsSnapshot) {
        // Send only fails once the delivery task is gone, i.e. at runtime shutdown.
        let _ = self.outbox.send((sequence, snapshot));
    }

    pub fn latest(&self) -> Option<DiagnosticsSnapshot> {
        lock(&self.slot).latest
    }
}
