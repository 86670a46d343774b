use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::{
    backend::{AlertRequest, DeliveredAlert},
    db::{
        helpers::{from_unix_seconds, payload_from_row},
        Database,
    },
};

fn row_to_request(row: &Row) -> Result<AlertRequest> {
    let fire_at: i64 = row.get("fire_at")?;
    Ok(AlertRequest {
        identifier: row.get("identifier")?,
        payload: payload_from_row(row)?,
        fire_at: from_unix_seconds(fire_at, "fire_at")?,
    })
}

impl Database {
    /// Insert `request`, replacing a pending alert with the same identifier.
    pub async fn upsert_pending(&self, request: &AlertRequest) -> Result<()> {
        let record = request.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO pending_alerts
                    (identifier, title, subtitle, body, category, badge, sound, end_of_booking, fire_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.identifier,
                    record.payload.title,
                    record.payload.subtitle,
                    record.payload.body,
                    record.payload.category,
                    record.payload.badge,
                    record.payload.sound,
                    record.payload.end_of_booking,
                    record.fire_at.timestamp(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to insert pending alert")?;
            Ok(())
        })
        .await
    }

    pub async fn list_pending(&self) -> Result<Vec<AlertRequest>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identifier, title, subtitle, body, category, badge, sound, end_of_booking, fire_at
                 FROM pending_alerts
                 ORDER BY fire_at ASC, identifier ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut requests = Vec::new();
            while let Some(row) = rows.next()? {
                requests.push(row_to_request(row)?);
            }
            Ok(requests)
        })
        .await
    }

    pub async fn delete_pending(&self, identifiers: Vec<String>) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM pending_alerts WHERE identifier = ?1")?;
                for identifier in &identifiers {
                    removed += stmt.execute(params![identifier])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    pub async fn clear_pending(&self) -> Result<usize> {
        self.execute(|conn| Ok(conn.execute("DELETE FROM pending_alerts", [])?))
            .await
    }

    /// Move every pending alert due at `now` into the delivered set.
    ///
    /// A delivered alert with the same identifier is replaced, which is how
    /// an end-of-booking alert supersedes the start alert it chains from.
    pub async fn take_due_alerts(&self, now: DateTime<Utc>) -> Result<Vec<DeliveredAlert>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let due = {
                let mut stmt = tx.prepare(
                    "SELECT identifier, title, subtitle, body, category, badge, sound, end_of_booking, fire_at
                     FROM pending_alerts
                     WHERE fire_at <= ?1
                     ORDER BY fire_at ASC, identifier ASC",
                )?;
                let mut rows = stmt.query(params![now.timestamp()])?;
                let mut due = Vec::new();
                while let Some(row) = rows.next()? {
                    due.push(row_to_request(row)?);
                }
                due
            };

            let mut delivered = Vec::with_capacity(due.len());
            for request in due {
                tx.execute(
                    "DELETE FROM pending_alerts WHERE identifier = ?1",
                    params![request.identifier],
                )?;
                tx.execute(
                    "INSERT OR REPLACE INTO delivered_alerts
                        (identifier, title, subtitle, body, category, badge, sound, end_of_booking, delivered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        request.identifier,
                        request.payload.title,
                        request.payload.subtitle,
                        request.payload.body,
                        request.payload.category,
                        request.payload.badge,
                        request.payload.sound,
                        request.payload.end_of_booking,
                        now.to_rfc3339(),
                    ],
                )?;
                delivered.push(DeliveredAlert {
                    identifier: request.identifier,
                    payload: request.payload,
                    delivered_at: now,
                });
            }

            tx.commit().context("failed to commit due alerts")?;
            Ok(delivered)
        })
        .await
    }
}
