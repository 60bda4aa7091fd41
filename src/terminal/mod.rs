pub mod events;
pub mod format;
pub mod state;
pub mod ui;

use anyhow::Result;
use ratatui::DefaultTerminal;
use ratatui::crossterm::event::{self, Event};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::ipc::{self, Action, Request};
use crate::mail::api_client::MailBackend;
use crate::store::repo::KeyValueStore;
use crate::terminal::events::{PopupAction, handle_key};
use crate::terminal::state::{ListLoad, ListLoader, PopupState, PopupView, is_safe_link};

const TICK: Duration = Duration::from_millis(250);

/// Why the popup closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopupExit {
    Quit,
    /// The user asked to (re)connect; the caller runs the browser login.
    Connect,
}

enum Background {
    Refreshed(Result<(), String>),
    Listed(ListLoad),
}

struct Popup {
    cfg: Config,
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn MailBackend>,
    loader: Arc<ListLoader>,
    tx: Sender<Background>,
}

impl Popup {
    fn spawn_list_load(&self) {
        let (store, backend, loader, tx) = (
            self.store.clone(),
            self.backend.clone(),
            self.loader.clone(),
            self.tx.clone(),
        );
        thread::spawn(move || {
            let outcome = loader.load(&*store, &*backend);
            let _ = tx.send(Background::Listed(outcome));
        });
    }

    fn spawn_refresh(&self) {
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = match ipc::send(&Request::action(Action::Refresh)) {
                Ok(resp) if resp.ok => Ok(()),
                Ok(resp) => Err(resp.error.unwrap_or_else(|| "refresh failed".into())),
                Err(e) => Err(format!("daemon not reachable: {e}")),
            };
            let _ = tx.send(Background::Refreshed(result));
        });
    }

    fn spawn_online_check(&self, tx: Sender<Option<bool>>) {
        let backend = self.backend.clone();
        thread::spawn(move || {
            let _ = tx.send(backend.online());
        });
    }

    fn apply(&self, state: &mut PopupState, msg: Background) {
        match msg {
            Background::Refreshed(Ok(())) => {
                state.status = None;
                self.spawn_list_load();
            }
            Background::Refreshed(Err(e)) => state.status = Some(e),
            Background::Listed(ListLoad::Failed(e)) => {
                state.status = Some(format!("Could not load messages: {e}"))
            }
            Background::Listed(_) => {}
        }
    }

    fn act(&self, state: &mut PopupState, action: PopupAction) -> Option<PopupExit> {
        match action {
            PopupAction::Quit => return Some(PopupExit::Quit),
            PopupAction::Connect => return Some(PopupExit::Connect),
            PopupAction::Move(d) => state.move_selection(d),
            PopupAction::Refresh => {
                state.status = Some("Refreshing...".into());
                self.spawn_refresh();
            }
            PopupAction::Open => {
                if let Some(link) = state.selected().and_then(|i| i.link.clone()) {
                    if is_safe_link(&link, &self.cfg.mail_web_url) {
                        if let Err(e) = open::that(&link) {
                            state.status = Some(format!("Could not open browser: {e}"));
                        }
                    } else {
                        log::warn!("Refusing to open untrusted link: {link}");
                        state.status = Some("Link blocked: not a mail link".into());
                    }
                }
            }
            PopupAction::Disconnect => {
                state.status = Some("Disconnecting...".into());
                if let Err(e) = crate::auth::connect::disconnect(&self.cfg) {
                    state.status = Some(format!("Disconnect failed: {e:#}"));
                }
            }
            PopupAction::None => {}
        }
        None
    }

    fn run(
        &self,
        mut terminal: DefaultTerminal,
        state: &mut PopupState,
        rx: &Receiver<Background>,
        online_rx: &Receiver<Option<bool>>,
    ) -> Result<PopupExit> {
        loop {
            state.reload(&*self.store)?;
            while let Ok(msg) = rx.try_recv() {
                self.apply(state, msg);
            }
            if let Ok(online) = online_rx.try_recv() {
                state.online = online;
            }

            terminal.draw(|f| ui::render(f, state))?;

            if event::poll(TICK)?
                && let Event::Key(key) = event::read()?
                && let Some(exit) = self.act(state, handle_key(key, &state.view))
            {
                return Ok(exit);
            }
        }
    }
}

/// Show the popup until the user quits or asks to connect.
pub fn run_popup(
    cfg: &Config,
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn MailBackend>,
) -> Result<PopupExit> {
    let (tx, rx) = mpsc::channel();
    let (online_tx, online_rx) = mpsc::channel();
    let popup = Popup {
        cfg: cfg.clone(),
        store,
        backend,
        loader: Arc::new(ListLoader::default()),
        tx,
    };

    let mut state = PopupState::new();
    state.reload(&*popup.store)?;
    if matches!(state.view, PopupView::Inbox { .. }) {
        popup.spawn_list_load();
    }
    popup.spawn_online_check(online_tx);

    let terminal = ratatui::init();
    let result = popup.run(terminal, &mut state, &rx, &online_rx);
    ratatui::restore();

    result
}
