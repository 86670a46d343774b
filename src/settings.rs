use anyhow::{Context, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "stickplan::settings";

use crate::{log_info, log_warn};

pub const DEFAULT_TOLERANCE_MS: i64 = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How far before its start a delivered alert already counts as current.
    pub tolerance_ms: i64,
    pub notifications_allowed: bool,
    pub foreground: bool,
    pub dispatch_interval_ms: u64,
    pub presentation_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tolerance_ms: DEFAULT_TOLERANCE_MS,
            notifications_allowed: true,
            foreground: true,
            dispatch_interval_ms: 250,
            presentation_timeout_ms: 1_000,
        }
    }
}

impl Settings {
    pub fn tolerance(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.tolerance_ms.max(0))
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(10))
    }

    pub fn presentation_timeout(&self) -> Duration {
        Duration::from_millis(self.presentation_timeout_ms)
    }

    /// Apply `STICKPLAN_TOLERANCE_MS` and `STICKPLAN_DEBUG` on top of the stored values.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(
            std::env::var("STICKPLAN_TOLERANCE_MS").ok().as_deref(),
            std::env::var("STICKPLAN_DEBUG").ok().as_deref(),
        );
        self
    }

    fn apply_overrides(&mut self, tolerance_ms: Option<&str>, debug: Option<&str>) {
        if let Some(raw) = tolerance_ms {
            match raw.trim().parse::<i64>() {
                Ok(value) if value >= 0 => self.tolerance_ms = value,
                _ => log_warn!("ignoring invalid STICKPLAN_TOLERANCE_MS={raw}"),
            }
        }

        let debug_mode = debug
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.dispatch_interval_ms = 100;
        }
    }
}

/// Settings loaded once from `<data_dir>/settings.json`.
///
/// A missing file is created with the defaults so it can be edited for the
/// next run; an unreadable one is left alone and the defaults are used.
pub struct SettingsStore {
    path: PathBuf,
    data: Settings,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            let store = Self {
                path,
                data: Settings::default(),
            };
            store.persist()?;
            return Ok(store);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let data = serde_json::from_str(&contents).unwrap_or_else(|err| {
            log_warn!("settings at {} are invalid ({err}); using defaults", path.display());
            Settings::default()
        });
        Ok(Self { path, data })
    }

    pub fn settings(&self) -> Settings {
        self.data.clone()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        log_info!("wrote default settings to {}", self.path.display());
        Ok(())
    }
}
