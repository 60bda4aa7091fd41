pub mod alarm;
pub mod badge;
pub mod dispatch;
pub mod notifier;
pub mod scheduler;

use anyhow::Result;
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::Duration,
};

use crate::auth::session::ensure_session_id;
use crate::config::{Config, resolve_badge_path};
use crate::mail::api_client::MailBackend;
use crate::store::repo::KeyValueStore;
use crate::store::state;

use crate::daemon::alarm::{ALARM_NAME, AlarmScheduler, ThreadAlarms};
use crate::daemon::badge::{BadgePresenter, StatusFileBadge};
use crate::daemon::dispatch::Dispatcher;
use crate::daemon::notifier::{DesktopNotifier, NotificationGate, SystemClock};
use crate::daemon::scheduler::Scheduler;

/// First actions of a fresh daemon: make sure a session id exists, poll
/// right away, and resume the alarm if the last known auth state was good.
pub fn startup(scheduler: &Scheduler) -> Result<()> {
    ensure_session_id(scheduler.store())?;

    let outcome = scheduler.poll(true);
    log::info!("Startup poll: {outcome:?}");

    if state::auth_error(scheduler.store())? == Some(false) {
        let settings = state::load_settings(scheduler.store())?;
        scheduler.reschedule(settings.refresh_period());
    }
    Ok(())
}

fn run_ticks(scheduler: &Scheduler, ticks: &Receiver<String>, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        match ticks.recv_timeout(Duration::from_millis(500)) {
            Ok(name) if name == ALARM_NAME => {
                let outcome = scheduler.poll(false);
                log::debug!("Alarm poll: {outcome:?}");
            }
            Ok(other) => log::debug!("Ignoring alarm {other}"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Poll loop plus IPC server; returns on Ctrl-C.
pub fn run_daemon(
    cfg: &Config,
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn MailBackend>,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r2 = running.clone();
    ctrlc::set_handler(move || {
        r2.store(false, Ordering::SeqCst);
    })?;

    let (alarms, ticks) = ThreadAlarms::new();
    let alarms: Arc<dyn AlarmScheduler> = Arc::new(alarms);

    let badge = BadgePresenter::new(Box::new(StatusFileBadge::new(resolve_badge_path(cfg)?)));
    let gate = NotificationGate::new(Box::new(DesktopNotifier::new()), cfg.notification_window());

    let scheduler = Arc::new(Scheduler::new(
        store,
        backend,
        badge,
        gate,
        alarms,
        Arc::new(SystemClock),
        cfg.auth_retry_backoff(),
    ));

    #[cfg(unix)]
    {
        let path = crate::ipc::socket_path()?;
        let listener = crate::ipc::bind(&path)?;
        let dispatcher = Dispatcher::new(scheduler.clone(), cfg.backend_url());
        let handler = Arc::new(move |req| dispatcher.handle(req));
        std::thread::spawn(move || crate::ipc::serve(listener, handler));
        log::info!("Listening on {}", path.display());
    }
    #[cfg(not(unix))]
    log::warn!("IPC not supported on this platform; only timed polls will run");

    startup(&scheduler)?;
    run_ticks(&scheduler, &ticks, &running);

    #[cfg(unix)]
    {
        let _ = std::fs::remove_file(crate::ipc::socket_path()?);
    }
    log::info!("Daemon stopped");
    Ok(())
}
