//! The (title, message, start, end) record that identifies one booking alert.
//!
//! The encoded form is the backend request identifier, so it has to be
//! deterministic and lossless: timestamps are kept at microsecond precision
//! and written as fractional Unix-epoch seconds rather than calendar strings.
//! The seconds are written as exact decimals with six fraction digits; going
//! through `f64` would drop microseconds for dates past 2255.

use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use super::Interval;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    title: String,
    message: String,
    #[serde(with = "epoch_seconds")]
    start: DateTime<Utc>,
    #[serde(with = "epoch_seconds")]
    end: DateTime<Utc>,
}

impl TimeSpan {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        let start = to_micros_precision(start);
        let end = to_micros_precision(end);
        if start > end {
            bail!("time span starts at {start} after it ends at {end}");
        }
        Ok(Self {
            title: title.into(),
            message: message.into(),
            start,
            end,
        })
    }

    pub fn for_interval(
        title: impl Into<String>,
        message: impl Into<String>,
        interval: &Interval,
    ) -> Self {
        // Interval already guarantees start <= end and truncation preserves order.
        Self {
            title: title.into(),
            message: message.into(),
            start: to_micros_precision(interval.start()),
            end: to_micros_precision(interval.end()),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Identifier form: `{"title":..,"message":..,"start":<secs>,"end":<secs>}`.
    pub fn encode(&self) -> String {
        // Serializing plain strings and validated decimals cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse an identifier produced by [`TimeSpan::encode`].
    ///
    /// Anything else (foreign identifiers, corrupted text, reversed spans)
    /// yields `None`; callers skip such identifiers.
    pub fn decode(identifier: &str) -> Option<Self> {
        let span: TimeSpan = serde_json::from_str(identifier).ok()?;
        if span.start > span.end {
            return None;
        }
        Some(span)
    }
}

impl fmt::Display for TimeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "title= {}, message= {}, start= {}, end= {}",
            self.title,
            self.message,
            format_micros(self.start),
            format_micros(self.end)
        )
    }
}

fn format_micros(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S%.6f")
        .to_string()
}

fn to_micros_precision(at: DateTime<Utc>) -> DateTime<Utc> {
    let micros = at.timestamp_micros();
    DateTime::from_timestamp_micros(micros).unwrap_or(at)
}

mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::value::RawValue;

    const MICROS_PER_SECOND: u64 = 1_000_000;

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(to_decimal(at.timestamp_micros()))
            .map_err(ser::Error::custom)?;
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        let micros = parse_micros(raw.get())
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp {}", raw.get())))?;
        DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| de::Error::custom("timestamp out of range"))
    }

    fn to_decimal(micros: i64) -> String {
        let sign = if micros < 0 { "-" } else { "" };
        let magnitude = micros.unsigned_abs();
        format!(
            "{sign}{}.{:06}",
            magnitude / MICROS_PER_SECOND,
            magnitude % MICROS_PER_SECOND
        )
    }

    /// Exact for plain decimals; exponent forms go through `f64`.
    fn parse_micros(text: &str) -> Option<i64> {
        let text = text.trim();
        if text.contains(['e', 'E']) {
            let seconds: f64 = text.parse().ok()?;
            let micros = (seconds * MICROS_PER_SECOND as f64).round();
            if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
                return None;
            }
            return Some(micros as i64);
        }

        let (negative, digits) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        let all_digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
            return None;
        }

        let whole: i64 = whole.parse().ok()?;
        let mut fraction_micros: i64 = 0;
        for (index, byte) in fraction.bytes().enumerate() {
            let digit = i64::from(byte - b'0');
            if index < 6 {
                fraction_micros = fraction_micros * 10 + digit;
            } else {
                // Round half up on the seventh digit.
                if digit >= 5 {
                    fraction_micros += 1;
                }
                break;
            }
        }
        for _ in fraction.len()..6 {
            fraction_micros *= 10;
        }

        let magnitude = whole
            .checked_mul(MICROS_PER_SECOND as i64)?
            .checked_add(fraction_micros)?;
        Some(if negative { -magnitude } else { magnitude })
    }
}
