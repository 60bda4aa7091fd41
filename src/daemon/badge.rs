use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

pub const LOADING_GLYPH: &str = "⏳";
pub const ERROR_GLYPH: &str = "!";
pub const TEXT_COLOR: [u8; 4] = [255, 255, 255, 255];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeColor {
    Alert,
    SetupWarning,
    Brand,
    Loading,
}

impl BadgeColor {
    pub fn hex(self) -> &'static str {
        match self {
            BadgeColor::Alert => "#EF4444",
            BadgeColor::SetupWarning => "#FFA500",
            BadgeColor::Brand => "#1178D2",
            BadgeColor::Loading => "#6B7280",
        }
    }

    pub fn rgba(self) -> [u8; 4] {
        match self {
            BadgeColor::Alert => [239, 68, 68, 255],
            BadgeColor::SetupWarning => [255, 165, 0, 255],
            BadgeColor::Brand => [17, 120, 210, 255],
            BadgeColor::Loading => [107, 114, 128, 255],
        }
    }
}

/// Last rendered text/color pair. Never read back from the surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeState {
    pub text: String,
    pub color: Option<BadgeColor>,
}

/// One write to the badge surface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeUpdate {
    pub text: String,
    pub background: Option<[u8; 4]>,
    pub text_color: Option<[u8; 4]>,
}

/// Where badges end up.
pub trait BadgeSurface: Send + Sync {
    fn apply(&self, update: &BadgeUpdate) -> Result<()>;

    fn supports_text_color(&self) -> bool {
        false
    }
}

/// Count shown on the badge: nothing for zero, capped at "99+".
pub fn badge_text(count: u64) -> String {
    match count {
        0 => String::new(),
        1..=99 => count.to_string(),
        _ => "99+".to_string(),
    }
}

pub struct BadgePresenter {
    surface: Box<dyn BadgeSurface>,
    last_good: Mutex<BadgeState>,
}

impl BadgePresenter {
    pub fn new(surface: Box<dyn BadgeSurface>) -> Self {
        Self {
            surface,
            last_good: Mutex::new(BadgeState::default()),
        }
    }

    /// Render and remember as the rollback target.
    pub fn render(&self, text: &str, color: Option<BadgeColor>) {
        self.paint(text, color);
        if let Ok(mut s) = self.last_good.lock() {
            *s = BadgeState {
                text: text.to_string(),
                color,
            };
        }
    }

    pub fn clear(&self) {
        self.render("", None);
    }

    /// Transient; never becomes the rollback target.
    pub fn show_loading(&self) {
        self.paint(LOADING_GLYPH, Some(BadgeColor::Loading));
    }

    /// Put the last known-good badge back after a failed poll.
    pub fn restore(&self) {
        let state = self.snapshot();
        self.render(&state.text, state.color);
    }

    pub fn snapshot(&self) -> BadgeState {
        self.last_good
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn paint(&self, text: &str, color: Option<BadgeColor>) {
        let update = BadgeUpdate {
            text: text.to_string(),
            background: color.map(BadgeColor::rgba),
            text_color: self.surface.supports_text_color().then_some(TEXT_COLOR),
        };
        if let Err(e) = self.surface.apply(&update) {
            log::warn!("Badge update failed: {e:#}");
        }
    }
}

/// Badge written as JSON to a file that status bars can watch.
///
/// Updates without a background keep the previous one, like a toolbar badge.
pub struct StatusFileBadge {
    path: PathBuf,
    current: Mutex<BadgeUpdate>,
}

impl StatusFileBadge {
    pub fn new(path: PathBuf) -> Self {
        let current = fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self {
            path,
            current: Mutex::new(current),
        }
    }
}

impl BadgeSurface for StatusFileBadge {
    fn apply(&self, update: &BadgeUpdate) -> Result<()> {
        let mut cur = self
            .current
            .lock()
            .map_err(|_| anyhow::anyhow!("badge state poisoned"))?;
        cur.text = update.text.clone();
        if update.background.is_some() {
            cur.background = update.background;
        }
        if update.text_color.is_some() {
            cur.text_color = update.text_color;
        }

        // write-then-rename so readers never see half a file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&*cur)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn supports_text_color(&self) -> bool {
        true
    }
}
