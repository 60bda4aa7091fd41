use anyhow::Result;
use notify_rust::Notification;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::unread::LastUnread;
use crate::store::repo::KeyValueStore;
use crate::store::state;

pub const NOTIFICATION_ID: &str = "new-mail-notify";
pub const NOTIFICATION_TITLE: &str = "New Mail";

pub trait Notifier: Send + Sync {
    /// Show a notification; a second call with the same `id` replaces the first.
    fn show(&self, id: &str, title: &str, body: &str) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Whether a change from `previous` to `current` deserves a notification.
pub fn should_notify(
    current: u64,
    previous: LastUnread,
    last_notify_ms: Option<i64>,
    now_ms: i64,
    window: Duration,
) -> bool {
    // never on the very first observation
    let Some(previous) = previous.count() else {
        return false;
    };
    if current <= previous {
        return false;
    }
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    match last_notify_ms {
        Some(last) => now_ms.saturating_sub(last) >= window_ms,
        None => true,
    }
}

pub struct NotificationGate {
    notifier: Box<dyn Notifier>,
    window: Duration,
}

impl NotificationGate {
    pub fn new(notifier: Box<dyn Notifier>, window: Duration) -> Self {
        Self { notifier, window }
    }

    /// Returns whether a notification went out.
    pub fn maybe_notify(
        &self,
        store: &dyn KeyValueStore,
        current: u64,
        previous: LastUnread,
        last_notify_ms: Option<i64>,
        now_ms: i64,
    ) -> Result<bool> {
        if !should_notify(current, previous, last_notify_ms, now_ms, self.window) {
            return Ok(false);
        }

        let body = format!("You have {current} unread messages.");
        if let Err(e) = self.notifier.show(NOTIFICATION_ID, NOTIFICATION_TITLE, &body) {
            log::warn!("Notification error: {e:#}");
        }
        state::set_last_notification_time(store, now_ms)?;
        log::info!("Notified: {current} unread");
        Ok(true)
    }
}

/// Desktop notifications through the session notification server.
#[derive(Default)]
pub struct DesktopNotifier {
    shown: Mutex<HashMap<String, u32>>,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn build(&self, id: &str, title: &str, body: &str) -> Notification {
        let mut n = Notification::new();
        n.appname("mailcheck")
            .summary(title)
            .body(body)
            .icon("mail-unread");

        #[cfg(all(unix, not(target_os = "macos")))]
        {
            use notify_rust::{Hint, Urgency};
            n.hint(Hint::Category("email.arrived".to_string()))
                .urgency(Urgency::Normal);
            // reuse the server id so the new one replaces the old
            if let Some(prev) = self.shown.lock().ok().and_then(|m| m.get(id).copied()) {
                n.id(prev);
            }
        }
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        let _ = id;

        n
    }
}

impl Notifier for DesktopNotifier {
    fn show(&self, id: &str, title: &str, body: &str) -> Result<()> {
        let handle = self.build(id, title, body).show()?;

        #[cfg(all(unix, not(target_os = "macos")))]
        if let Ok(mut m) = self.shown.lock() {
            m.insert(id.to_string(), handle.id());
        }
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        let _ = handle;

        Ok(())
    }
}
