use anyhow::{bail, Result};
use chrono::{DateTime, Local, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            bail!("interval start {start} is after its end {end}");
        }
        Ok(Self { start, end })
    }

    pub fn starting_at(start: DateTime<Utc>, duration: TimeDelta) -> Result<Self> {
        let Some(end) = start.checked_add_signed(duration) else {
            bail!("interval of {duration} starting at {start} ends out of range");
        };
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Human-readable form, e.g. `25.10.2020 15:42:05 to 25.10.2020 17:42:05`.
    pub fn brief(&self) -> String {
        format!(
            "{} to {}",
            self.start.with_timezone(&Local).format("%d.%m.%Y %H:%M:%S"),
            self.end.with_timezone(&Local).format("%d.%m.%Y %H:%M:%S")
        )
    }
}

/// A client-side reservation. The alert identifier is kept alongside the
/// interval so that cancelling the booking targets its backend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub interval: Interval,
    pub identifier: Option<String>,
}

impl Booking {
    pub fn new(interval: Interval) -> Self {
        Self {
            interval,
            identifier: None,
        }
    }

    pub fn id(&self) -> String {
        self.interval.brief()
    }
}
