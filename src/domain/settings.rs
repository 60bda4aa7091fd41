use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_REFRESH_INTERVAL_MINUTES: u32 = 5;

/// User-editable settings record stored under `settings`.
///
/// Every field is optional on the wire; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub enable_notifications: bool,
    pub show_badge: bool,
    pub refresh_interval: u32,
    pub show_snippets: bool,
    pub enable_folders: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_notifications: true,
            show_badge: true,
            refresh_interval: DEFAULT_REFRESH_INTERVAL_MINUTES,
            show_snippets: true,
            enable_folders: false,
        }
    }
}

impl Settings {
    /// Alarm period in minutes; zero counts as unset.
    pub fn refresh_minutes(&self) -> u32 {
        if self.refresh_interval == 0 {
            DEFAULT_REFRESH_INTERVAL_MINUTES
        } else {
            self.refresh_interval
        }
    }

    pub fn refresh_period(&self) -> Duration {
        minutes(self.refresh_minutes())
    }
}

/// Field overrides from the command line; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub enable_notifications: Option<bool>,
    pub show_badge: Option<bool>,
    pub refresh_interval: Option<u32>,
    pub show_snippets: Option<bool>,
    pub enable_folders: Option<bool>,
}

impl SettingsPatch {
    pub fn apply(&self, mut s: Settings) -> Settings {
        if let Some(v) = self.enable_notifications {
            s.enable_notifications = v;
        }
        if let Some(v) = self.show_badge {
            s.show_badge = v;
        }
        if let Some(v) = self.refresh_interval {
            s.refresh_interval = v;
        }
        if let Some(v) = self.show_snippets {
            s.show_snippets = v;
        }
        if let Some(v) = self.enable_folders {
            s.enable_folders = v;
        }
        s
    }
}

pub fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}
