use anyhow::Result;
use ratatui::widgets::ListState;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::domain::mail::MailItem;
use crate::domain::settings::Settings;
use crate::domain::unread::LastUnread;
use crate::mail::api_client::{LIST_LIMIT, MailBackend};
use crate::store::repo::KeyValueStore;
use crate::store::state;

pub const LIST_DEBOUNCE: Duration = Duration::from_millis(500);

/// Which screen the popup shows, derived purely from stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupView {
    Connect,
    AuthProblem { first_setup: bool },
    Inbox {
        account_email: Option<String>,
        unread_label: String,
    },
}

impl PopupView {
    pub fn title(&self) -> &'static str {
        match self {
            PopupView::Connect => "Connect your mail account",
            PopupView::AuthProblem { first_setup: true } => "Setup Incomplete",
            PopupView::AuthProblem { first_setup: false } => "Authentication Problem",
            PopupView::Inbox { .. } => "Inbox",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PopupView::Connect => "Sign in once to start counting unread mail.",
            PopupView::AuthProblem { first_setup: true } => {
                "Finish connecting your account to start checking mail."
            }
            PopupView::AuthProblem { first_setup: false } => {
                "Your session expired or access was revoked."
            }
            PopupView::Inbox { .. } => "",
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            PopupView::Connect => "c connect  q quit",
            PopupView::AuthProblem { .. } => "r retry  c re-connect  q quit",
            PopupView::Inbox { .. } => "j/k move  Enter open  r refresh  x disconnect  q quit",
        }
    }
}

pub fn popup_view(
    token: Option<&str>,
    auth_error: Option<bool>,
    last_unread: LastUnread,
    account_email: Option<String>,
) -> PopupView {
    if token.is_none() {
        return PopupView::Connect;
    }
    if auth_error == Some(true) {
        return PopupView::AuthProblem {
            first_setup: last_unread.is_first_setup(),
        };
    }
    let unread_label = match last_unread.count() {
        Some(n) => format!("{n} Unread"),
        None => "-- Unread".to_string(),
    };
    PopupView::Inbox {
        account_email,
        unread_label,
    }
}

/// Only links into the mail web client may be opened.
pub fn is_safe_link(link: &str, prefix: &str) -> bool {
    !prefix.is_empty() && link.starts_with(prefix)
}

#[derive(Debug, PartialEq, Eq)]
pub enum ListLoad {
    Loaded(usize),
    /// Another load is running or the last one was too recent.
    Skipped,
    NoToken,
    Failed(String),
}

/// Fetches the recent-mail list, one load at a time.
pub struct ListLoader {
    loading: AtomicBool,
    last_started: Mutex<Option<Instant>>,
    debounce: Duration,
}

impl Default for ListLoader {
    fn default() -> Self {
        Self::new(LIST_DEBOUNCE)
    }
}

impl ListLoader {
    pub fn new(debounce: Duration) -> Self {
        Self {
            loading: AtomicBool::new(false),
            last_started: Mutex::new(None),
            debounce,
        }
    }

    fn claim(&self, now: Instant) -> bool {
        let Ok(mut last) = self.last_started.lock() else {
            return false;
        };
        if let Some(prev) = *last
            && now.duration_since(prev) < self.debounce
        {
            return false;
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *last = Some(now);
        true
    }

    pub fn load(&self, store: &dyn KeyValueStore, backend: &dyn MailBackend) -> ListLoad {
        if !self.claim(Instant::now()) {
            return ListLoad::Skipped;
        }
        let outcome = Self::fetch(store, backend);
        self.loading.store(false, Ordering::SeqCst);
        outcome
    }

    fn fetch(store: &dyn KeyValueStore, backend: &dyn MailBackend) -> ListLoad {
        let token = match state::token(store) {
            Ok(Some(t)) => t,
            Ok(None) => return ListLoad::NoToken,
            Err(e) => return ListLoad::Failed(format!("{e:#}")),
        };

        let reply = match backend.fetch_list(&token, LIST_LIMIT) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("List load failed: {e}");
                return ListLoad::Failed(e.to_string());
            }
        };
        if !reply.is_success() {
            log::warn!("List load returned HTTP {}", reply.status);
            return ListLoad::Failed(format!("HTTP {}", reply.status));
        }

        let list = match reply.mail_list() {
            Ok(l) => l,
            Err(e) => return ListLoad::Failed(e.to_string()),
        };
        if let Err(e) = state::save_list(store, &list.items, list.account_email()) {
            return ListLoad::Failed(format!("{e:#}"));
        }
        ListLoad::Loaded(list.items.len())
    }
}

/// Everything the popup draws, refreshed from the store each tick.
pub struct PopupState {
    pub view: PopupView,
    pub settings: Settings,
    pub items: Vec<MailItem>,
    pub list_state: ListState,
    pub online: Option<bool>,
    pub status: Option<String>,
}

impl PopupState {
    pub fn new() -> Self {
        Self {
            view: PopupView::Connect,
            settings: Settings::default(),
            items: vec![],
            list_state: ListState::default(),
            online: None,
            status: None,
        }
    }

    pub fn reload(&mut self, store: &dyn KeyValueStore) -> Result<()> {
        let token = state::token(store)?;
        self.view = popup_view(
            token.as_deref(),
            state::auth_error(store)?,
            state::last_unread(store)?,
            state::account_email(store)?,
        );
        self.settings = state::load_settings(store)?;
        self.items = state::last_items(store)?;

        if self.items.is_empty() {
            self.list_state.select(None);
        } else {
            let idx = self.list_state.selected().unwrap_or(0);
            self.list_state.select(Some(idx.min(self.items.len() - 1)));
        }
        Ok(())
    }

    pub fn move_selection(&mut self, delta: i32) {
        if self.items.is_empty() {
            self.list_state.select(None);
            return;
        }
        let cur = self.list_state.selected().unwrap_or(0) as i32;
        let len = self.items.len() as i32;
        let next = (cur + delta).clamp(0, len - 1) as usize;
        self.list_state.select(Some(next));
    }

    pub fn selected(&self) -> Option<&MailItem> {
        self.items.get(self.list_state.selected()?)
    }
}

impl Default for PopupState {
    fn default() -> Self {
        Self::new()
    }
}
