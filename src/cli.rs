use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::Parser;
use tokio::time::{self, MissedTickBehavior};

use crate::{
    alerts::AlertAuthority,
    backend::{LocalBackend, NotificationBackend},
    db::Database,
    models::{Booking, DiagnosticsSnapshot, Interval},
    settings::SettingsStore,
};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::cli";

use crate::{log_info, log_warn};

#[derive(Debug, Parser)]
#[command(name = "stickplan", version, about = "Schedule booking alerts and watch their lifecycle counts")]
pub struct Args {
    /// Directory holding settings.json and the alert store.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Seconds from now until the first booking starts.
    #[arg(long, default_value_t = 10)]
    pub start_after: i64,

    /// Length of each booking in seconds.
    #[arg(long, default_value_t = 10)]
    pub duration: i64,

    /// Number of back-to-back bookings to add.
    #[arg(long, default_value_t = 1)]
    pub bookings: u32,

    #[arg(long, default_value = "SomeCalendar")]
    pub title: String,

    #[arg(long, default_value = "Your booking starts now")]
    pub message: String,

    /// Remove all pending and delivered alerts before booking.
    #[arg(long)]
    pub clear: bool,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("stickplan")
}

fn print_snapshot(snapshot: DiagnosticsSnapshot) {
    println!("{snapshot}");
}

/// Build the `index`-th booking interval, laid out back to back.
fn booking_interval(args: &Args, index: u32) -> Result<Interval> {
    let offset = i64::from(index)
        .checked_mul(args.duration)
        .and_then(|elapsed| elapsed.checked_add(args.start_after))
        .with_context(|| format!("booking #{index} starts too far from now"))?;
    let start = TimeDelta::try_seconds(offset)
        .and_then(|offset| Utc::now().checked_add_signed(offset))
        .with_context(|| format!("booking #{index} starts out of range"))?;
    let duration = TimeDelta::try_seconds(args.duration)
        .with_context(|| format!("duration of {}s is out of range", args.duration))?;
    Interval::starting_at(start, duration)
}

pub async fn run_demo(args: Args) -> Result<()> {
    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    let settings = SettingsStore::new(data_dir.join("settings.json"))?
        .settings()
        .with_env_overrides();
    let db = Database::new(data_dir.join("stickplan.sqlite3"))?;

    let backend = Arc::new(LocalBackend::new(db, &settings));
    let authority = AlertAuthority::new(backend.clone(), settings.tolerance());

    let granted = authority
        .initialize()
        .await
        .context("authorization task failed")?;
    authority.set_observer(print_snapshot);

    if args.clear {
        authority.clear_all_pending().await?;
        authority.clear_all_delivered().await?;
        authority.clear_badge();
        // Re-register so the cleared counts are printed right away.
        authority.set_observer(print_snapshot);
    }

    backend.start()?;

    let mut bookings: Vec<Booking> = Vec::new();
    if granted {
        for index in 0..args.bookings {
            let interval = booking_interval(&args, index)?;
            let booking = authority.book(&args.title, &args.message, interval).await;
            println!("id: {}", booking.id());
            bookings.push(booking);
        }
    } else {
        log_warn!("notifications not authorized; nothing will be scheduled");
    }

    let deadline = bookings
        .iter()
        .map(|booking| booking.interval.end())
        .max()
        .unwrap_or_else(Utc::now)
        .checked_add_signed(TimeDelta::seconds(5))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    tokio::select! {
        _ = wait_until_settled(&authority, deadline) => {}
        _ = tokio::signal::ctrl_c() => {
            let identifiers: Vec<String> = bookings
                .iter()
                .filter_map(|booking| booking.identifier.clone())
                .collect();
            log_info!("interrupted; cancelling {} bookings", identifiers.len());
            backend.cancel(identifiers).await?;
        }
    }

    backend.shutdown().await?;
    authority.shutdown();
    Ok(())
}

/// Watch the published counts until nothing is pending and no delivered
/// alert is current, or until `deadline` passes.
///
/// Only reads the latest snapshot; refreshes come from the authority's own
/// triggers so the observer sees each change once.
async fn wait_until_settled(authority: &AlertAuthority, deadline: DateTime<Utc>) {
    let mut ticker = time::interval(Duration::from_millis(250));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let settled = matches!(
            authority.latest_snapshot(),
            Some(snapshot) if snapshot.pending == 0 && snapshot.current == 0
        );
        if settled || Utc::now() > deadline {
            break;
        }
    }
}
