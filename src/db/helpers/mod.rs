use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::backend::AlertPayload;

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} holds out-of-range value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn from_unix_seconds(value: i64, field: &str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(value, 0).ok_or_else(|| anyhow!("{field} out of range: {value}"))
}

/// Reads the payload columns shared by `pending_alerts` and `delivered_alerts`.
pub fn payload_from_row(row: &Row) -> Result<AlertPayload> {
    let badge: Option<i64> = row.get("badge")?;
    Ok(AlertPayload {
        title: row.get("title")?,
        subtitle: row.get("subtitle")?,
        body: row.get("body")?,
        category: row.get("category")?,
        badge: badge.map(|value| to_u32(value, "badge")).transpose()?,
        sound: row.get("sound")?,
        end_of_booking: row.get("end_of_booking")?,
    })
}
