use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    backend::{DeliveredAlert, NotificationBackend},
    models::DiagnosticsSnapshot,
};

use super::currency::identifier_is_current;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub snapshot: DiagnosticsSnapshot,
    /// Delivered identifiers to purge: not current, or not decodable.
    pub obsolete: Vec<String>,
}

pub fn reconcile(
    pending: &[String],
    delivered: &[DeliveredAlert],
    now: DateTime<Utc>,
    tolerance: TimeDelta,
) -> Reconciliation {
    let (current, obsolete): (Vec<&DeliveredAlert>, Vec<&DeliveredAlert>) = delivered
        .iter()
        .partition(|alert| identifier_is_current(&alert.identifier, now, tolerance));

    Reconciliation {
        snapshot: DiagnosticsSnapshot {
            pending: pending.len(),
            delivered: delivered.len(),
            current: current.len(),
        },
        obsolete: obsolete
            .into_iter()
            .map(|alert| alert.identifier.clone())
            .collect(),
    }
}

/// Run both enumerations concurrently and classify once both have answered.
///
/// Completion order of the two queries is irrelevant; the snapshot is only
/// computed after the join, so it never mixes a stale pending list with a
/// fresh delivered one from the same call.
pub async fn collect(
    backend: &Arc<dyn NotificationBackend>,
    tolerance: TimeDelta,
) -> Result<Reconciliation> {
    let pending_query = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.pending().await })
    };
    let delivered_query = {
        let backend = backend.clone();
        tokio::spawn(async move { backend.delivered().await })
    };

    let (pending, delivered) = tokio::join!(pending_query, delivered_query);
    let pending = pending
        .context("pending enumeration task failed")?
        .context("failed to enumerate pending alerts")?;
    let delivered = delivered
        .context("delivered enumeration task failed")?
        .context("failed to enumerate delivered alerts")?;

    Ok(reconcile(&pending, &delivered, Utc::now(), tolerance))
}
