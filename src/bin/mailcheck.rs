use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::sync::Arc;

use mailcheck::auth::connect::{Delivery, connect, disconnect};
use mailcheck::config::{Config, load_config, resolve_badge_path, resolve_db_path};
use mailcheck::daemon::badge::{BadgePresenter, StatusFileBadge};
use mailcheck::daemon::run_daemon;
use mailcheck::domain::settings::SettingsPatch;
use mailcheck::ipc::{self, Action, Request};
use mailcheck::mail::api_client::HttpBackend;
use mailcheck::store::sqlite::SqliteStore;
use mailcheck::store::state;
use mailcheck::terminal::{PopupExit, run_popup};

#[derive(Parser)]
#[command(name = "mailcheck")]
#[command(about = "Unread mail counter (daemon + popup)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: poll, badge, notify
    Daemon,

    /// Show the popup with recent unread mail
    Popup,

    /// Sign in through the browser and hand the token to the daemon
    Connect,

    /// Open the page where account access is revoked
    Disconnect,

    /// Ask the running daemon for a forced poll
    Refresh,

    /// Show or change settings
    Settings {
        #[command(subcommand)]
        cmd: SettingsCommand,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        enable_notifications: Option<bool>,
        #[arg(long)]
        show_badge: Option<bool>,
        /// Minutes between polls
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        refresh_interval: Option<u32>,
        #[arg(long)]
        show_snippets: Option<bool>,
        #[arg(long)]
        enable_folders: Option<bool>,
    },
}

fn open_store(cfg: &Config) -> Result<Arc<SqliteStore>> {
    let db_path = resolve_db_path(cfg)?;
    Ok(Arc::new(SqliteStore::open(&db_path)?))
}

/// Send to the daemon; a missing daemon only earns a warning.
fn notify_daemon(action: Action) {
    match ipc::send(&Request::action(action)) {
        Ok(resp) if resp.ok => {}
        Ok(resp) => log::warn!("Daemon replied: {}", resp.error.unwrap_or_default()),
        Err(e) => log::warn!("Daemon not reachable: {e}"),
    }
}

fn set_settings(cfg: &Config, store: &SqliteStore, patch: SettingsPatch) -> Result<()> {
    let settings = patch.apply(state::load_settings(store)?);
    state::save_settings(store, &settings)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);

    notify_daemon(Action::UpdateInterval {
        interval: settings.refresh_minutes(),
    });
    if settings.show_badge {
        notify_daemon(Action::Refresh);
    } else {
        BadgePresenter::new(Box::new(StatusFileBadge::new(resolve_badge_path(cfg)?))).clear();
    }
    Ok(())
}

fn run_connect(cfg: &Config, store: &SqliteStore) -> Result<()> {
    match connect(cfg, store)? {
        Delivery::Daemon => println!("Connected. The daemon is checking mail."),
        Delivery::Store => println!("Connected. Start `mailcheck daemon` to begin checking."),
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cfg = load_config().map_err(|e| anyhow!("Configuration error: {e}"))?;

    match cli.cmd {
        Command::Daemon => {
            let store = open_store(&cfg)?;
            let backend = Arc::new(HttpBackend::new(cfg.backend_url())?);
            run_daemon(&cfg, store, backend)
        }

        Command::Popup => {
            let store = open_store(&cfg)?;
            let backend = Arc::new(HttpBackend::new(cfg.backend_url())?);
            match run_popup(&cfg, store.clone(), backend)? {
                PopupExit::Quit => Ok(()),
                PopupExit::Connect => run_connect(&cfg, &store),
            }
        }

        Command::Connect => run_connect(&cfg, &*open_store(&cfg)?),

        Command::Disconnect => disconnect(&cfg),

        Command::Refresh => {
            let resp = ipc::send(&Request::action(Action::Refresh))
                .map_err(|e| anyhow!("Daemon not reachable: {e}"))?;
            if !resp.ok {
                return Err(anyhow!(
                    "Refresh failed: {}",
                    resp.error.unwrap_or_default()
                ));
            }
            let status = resp.status.unwrap_or_default();
            let store = open_store(&cfg)?;
            match state::last_unread(&*store)?.count() {
                Some(n) => println!("{status}: {n} unread"),
                None => println!("{status}: not polled yet"),
            }
            Ok(())
        }

        Command::Settings { cmd } => {
            let store = open_store(&cfg)?;
            match cmd {
                SettingsCommand::Show => {
                    let settings = state::load_settings(&*store)?;
                    println!("{}", serde_json::to_string_pretty(&settings)?);
                    Ok(())
                }
                SettingsCommand::Set {
                    enable_notifications,
                    show_badge,
                    refresh_interval,
                    show_snippets,
                    enable_folders,
                } => set_settings(
                    &cfg,
                    &store,
                    SettingsPatch {
                        enable_notifications,
                        show_badge,
                        refresh_interval,
                        show_snippets,
                        enable_folders,
                    },
                ),
            }
        }
    }
}
