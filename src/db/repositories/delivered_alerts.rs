use anyhow::Result;
use rusqlite::{params, Row};

use crate::{
    backend::DeliveredAlert,
    db::{
        helpers::{parse_datetime, payload_from_row},
        Database,
    },
};

fn row_to_delivered(row: &Row) -> Result<DeliveredAlert> {
    let delivered_at: String = row.get("delivered_at")?;
    Ok(DeliveredAlert {
        identifier: row.get("identifier")?,
        payload: payload_from_row(row)?,
        delivered_at: parse_datetime(&delivered_at, "delivered_at")?,
    })
}

impl Database {
    pub async fn list_delivered(&self) -> Result<Vec<DeliveredAlert>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT identifier, title, subtitle, body, category, badge, sound, end_of_booking, delivered_at
                 FROM delivered_alerts
                 ORDER BY delivered_at ASC, identifier ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut alerts = Vec::new();
            while let Some(row) = rows.next()? {
                alerts.push(row_to_delivered(row)?);
            }
            Ok(alerts)
        })
        .await
    }

    pub async fn delete_delivered(&self, identifiers: Vec<String>) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM delivered_alerts WHERE identifier = ?1")?;
                for identifier in &identifiers {
                    removed += stmt.execute(params![identifier])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    pub async fn clear_delivered(&self) -> Result<usize> {
        self.execute(|conn| Ok(conn.execute("DELETE FROM delivered_alerts", [])?))
            .await
    }
}
