pub mod alerts;
pub mod backend;
mod cli;
pub mod db;
pub mod models;
pub mod settings;
pub mod utils;

use anyhow::Context;
use clap::Parser;

pub use alerts::AlertAuthority;
pub use backend::{LocalBackend, NotificationBackend};
pub use cli::Args;
pub use models::{Booking, DiagnosticsSnapshot, Interval, TimeSpan};
pub use settings::{Settings, SettingsStore};

pub fn run() -> anyhow::Result<()> {
    // Reads RUST_LOG
    utils::logging::init();

    log::info!("stickplan starting up...");

    let args = Args::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(cli::run_demo(args))
}
