//! Unread-count poller.
//!
//! One [`Scheduler`] per daemon. It owns the poll lock and the badge
//! rollback snapshot, and is the only writer of `lastUnread`/`authError`
//! during normal operation.
//!
//! A poll attempt runs `IDLE → LOADING → {SUCCESS, AUTH_FAILED, BACKEND_ERROR,
//! NETWORK_ERROR} → IDLE`. At most one attempt is `LOADING` at a time; a poll
//! requested meanwhile returns [`PollOutcome::Skipped`] without side effects.
//! The single auth retry releases the lock before backing off and re-entering.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::daemon::alarm::{ALARM_NAME, AlarmScheduler};
use crate::daemon::badge::{BadgeColor, BadgePresenter, ERROR_GLYPH, badge_text};
use crate::daemon::notifier::{Clock, NotificationGate};
use crate::domain::settings::Settings;
use crate::mail::api_client::MailBackend;
use crate::store::repo::KeyValueStore;
use crate::store::state;

/// Auth failures are retried this many times before being believed.
const MAX_AUTH_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Another poll held the lock.
    Skipped,
    /// No token stored.
    Unauthenticated,
    Success { unread: u64 },
    /// `confirmed` is false for a failure during first setup.
    AuthFailed { confirmed: bool },
    BackendError { status: u16 },
    /// Network failure, malformed body or storage error.
    Failed { reason: String },
}

enum Step {
    Done(PollOutcome),
    RetryAuth,
}

/// Holds the poll lock; releases it when dropped.
struct PollGuard<'a>(&'a AtomicBool);

impl<'a> PollGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PollGuard(flag))
    }
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    store: Arc<dyn KeyValueStore>,
    backend: Arc<dyn MailBackend>,
    badge: BadgePresenter,
    gate: NotificationGate,
    alarms: Arc<dyn AlarmScheduler>,
    clock: Arc<dyn Clock>,
    retry_backoff: Duration,
    poll_in_progress: AtomicBool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn MailBackend>,
        badge: BadgePresenter,
        gate: NotificationGate,
        alarms: Arc<dyn AlarmScheduler>,
        clock: Arc<dyn Clock>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            badge,
            gate,
            alarms,
            clock,
            retry_backoff,
            poll_in_progress: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        &*self.store
    }

    pub fn badge(&self) -> &BadgePresenter {
        &self.badge
    }

    pub fn is_polling(&self) -> bool {
        self.poll_in_progress.load(Ordering::Acquire)
    }

    /// Fetch the unread count and reconcile badge, store and notifications.
    /// `force` asks the backend to bypass its cache.
    pub fn poll(&self, force: bool) -> PollOutcome {
        self.poll_attempt(force, 0)
    }

    fn poll_attempt(&self, force: bool, retry_count: u32) -> PollOutcome {
        let Some(guard) = PollGuard::acquire(&self.poll_in_progress) else {
            log::debug!("Poll already in progress, skipping.");
            return PollOutcome::Skipped;
        };

        match self.run(force, retry_count) {
            Ok(Step::Done(outcome)) => outcome,
            Ok(Step::RetryAuth) => {
                drop(guard);
                log::info!("Auth error detected, retrying once...");
                thread::sleep(self.retry_backoff);
                self.poll_attempt(force, retry_count + 1)
            }
            Err(e) => {
                log::error!("Poll failed: {e:#}");
                self.badge.restore();
                PollOutcome::Failed {
                    reason: format!("{e:#}"),
                }
            }
        }
    }

    fn run(&self, force: bool, retry_count: u32) -> Result<Step> {
        let snapshot = state::load_poll_snapshot(&*self.store)?;
        let Some(token) = snapshot.token else {
            self.badge.clear();
            return Ok(Step::Done(PollOutcome::Unauthenticated));
        };

        if self.backend.online() == Some(true) {
            self.badge.show_loading();
        }

        let reply = self.backend.fetch_unread(&token, force)?;

        if reply.is_auth_failure() {
            let code = reply.error_code();
            if retry_count < MAX_AUTH_RETRIES {
                log::debug!("Got {} ({code}), will retry", reply.status);
                return Ok(Step::RetryAuth);
            }

            if snapshot.last_unread.is_first_setup() {
                // may still be settling on the backend; leave authError alone
                log::warn!("Auth failed during initial setup ({code})");
                self.badge.render(ERROR_GLYPH, Some(BadgeColor::SetupWarning));
                return Ok(Step::Done(PollOutcome::AuthFailed { confirmed: false }));
            }

            log::warn!("Auth failed: token revoked or expired ({code})");
            self.badge.render(ERROR_GLYPH, Some(BadgeColor::Alert));
            state::set_auth_error(&*self.store, true)?;
            return Ok(Step::Done(PollOutcome::AuthFailed { confirmed: true }));
        }

        if !reply.is_success() {
            log::error!("Backend error: {}", reply.status);
            self.badge.restore();
            return Ok(Step::Done(PollOutcome::BackendError {
                status: reply.status,
            }));
        }

        let unread = reply.unread_count()?;
        let settings = state::load_settings(&*self.store)?;

        if settings.show_badge {
            self.badge.render(&badge_text(unread), Some(BadgeColor::Brand));
        } else {
            self.badge.clear();
        }

        state::commit_poll_success(&*self.store, unread)?;

        // count is already committed; a gate failure must not undo the success
        if settings.enable_notifications
            && let Err(e) = self.gate.maybe_notify(
                &*self.store,
                unread,
                snapshot.last_unread,
                snapshot.last_notification_ms,
                self.clock.now_ms(),
            )
        {
            log::warn!("Could not record notification: {e:#}");
        }

        self.ensure_alarm(&settings);
        log::info!("Unread: {unread}");
        Ok(Step::Done(PollOutcome::Success { unread }))
    }

    /// Start the recurring poll unless it is already running.
    pub fn ensure_alarm(&self, settings: &Settings) {
        if !self.alarms.exists(ALARM_NAME) {
            self.alarms.create(ALARM_NAME, settings.refresh_period());
        }
    }

    /// (Re)create the recurring poll with an explicit period.
    pub fn reschedule(&self, period: Duration) {
        self.alarms.create(ALARM_NAME, period);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::daemon::alarm::tests::RecordingAlarms;
    use crate::daemon::badge::tests::RecordingSurface;
    use crate::daemon::badge::{BadgeState, LOADING_GLYPH};
    use crate::daemon::notifier::tests::{FixedClock, RecordingNotifier};
    use crate::domain::unread::LastUnread;
    use crate::mail::api_client::{HttpReply, PollError};
    use crate::store::sqlite::SqliteStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::mpsc;

    pub enum Scripted {
        Reply(HttpReply),
        NetworkDown,
    }

    /// A transport-level reqwest error, produced without touching the network.
    pub fn network_error() -> PollError {
        let err = reqwest::blocking::Client::new()
            .get("not a url")
            .send()
            .unwrap_err();
        PollError::Network(err)
    }

    /// Backend that answers from a script and records each call.
    #[derive(Default)]
    pub struct ScriptedBackend {
        pub script: Mutex<VecDeque<Scripted>>,
        pub calls: Mutex<Vec<(String, bool)>>,
        pub online: Option<bool>,
        /// When set, each `fetch_unread` waits for a message before answering.
        pub gate: Mutex<Option<mpsc::Receiver<()>>>,
        pub lists: Mutex<VecDeque<Scripted>>,
        pub list_calls: Mutex<Vec<u32>>,
    }

    impl ScriptedBackend {
        pub fn replying(replies: Vec<(u16, &str)>) -> Self {
            let script = replies
                .into_iter()
                .map(|(s, b)| Scripted::Reply(HttpReply::new(s, b)))
                .collect();
            Self {
                script: Mutex::new(script),
                ..Default::default()
            }
        }

        pub fn listing(replies: Vec<Scripted>) -> Self {
            Self {
                lists: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl MailBackend for ScriptedBackend {
        fn fetch_unread(&self, token: &str, force: bool) -> Result<HttpReply, PollError> {
            self.calls.lock().unwrap().push((token.to_string(), force));
            if let Some(rx) = self.gate.lock().unwrap().as_ref() {
                let _ = rx.recv();
            }
            match self.script.lock().unwrap().pop_front() {
                Some(Scripted::Reply(r)) => Ok(r),
                Some(Scripted::NetworkDown) | None => Err(network_error()),
            }
        }

        fn fetch_list(&self, _token: &str, limit: u32) -> Result<HttpReply, PollError> {
            self.list_calls.lock().unwrap().push(limit);
            match self.lists.lock().unwrap().pop_front() {
                Some(Scripted::Reply(r)) => Ok(r),
                Some(Scripted::NetworkDown) => Err(network_error()),
                None => Ok(HttpReply::new(200, r#"{"items": []}"#)),
            }
        }

        fn online(&self) -> Option<bool> {
            self.online
        }
    }

    pub struct Harness {
        pub scheduler: Arc<Scheduler>,
        pub store: Arc<SqliteStore>,
        pub backend: Arc<ScriptedBackend>,
        pub surface: RecordingSurface,
        pub notifier: RecordingNotifier,
        pub alarms: RecordingAlarms,
        pub clock: Arc<FixedClock>,
    }

    pub fn harness(backend: ScriptedBackend) -> Harness {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let backend = Arc::new(backend);
        let surface = RecordingSurface::default();
        let notifier = RecordingNotifier::default();
        let alarms = RecordingAlarms::default();
        let clock = Arc::new(FixedClock::at(1_700_000_000_000));

        let scheduler = Scheduler::new(
            store.clone(),
            backend.clone(),
            BadgePresenter::new(Box::new(surface.clone())),
            NotificationGate::new(Box::new(notifier.clone()), Duration::from_secs(60)),
            Arc::new(alarms.clone()),
            clock.clone(),
            Duration::ZERO,
        );

        Harness {
            scheduler: Arc::new(scheduler),
            store,
            backend,
            surface,
            notifier,
            alarms,
            clock,
        }
    }

    fn with_token(h: &Harness) {
        state::store_token(&*h.store, "test-token-0123456789abcdef").unwrap();
    }

    #[test]
    fn no_token_clears_badge_without_request() {
        let h = harness(ScriptedBackend::default());
        assert_eq!(h.scheduler.poll(false), PollOutcome::Unauthenticated);
        assert_eq!(h.backend.call_count(), 0);
        assert_eq!(h.surface.last().unwrap().text, "");
        assert!(!h.scheduler.is_polling());
    }

    #[test]
    fn success_updates_badge_state_and_alarm() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 42}"#)]));
        with_token(&h);
        state::set_auth_error(&*h.store, true).unwrap();

        assert_eq!(h.scheduler.poll(true), PollOutcome::Success { unread: 42 });

        let last = h.surface.last().unwrap();
        assert_eq!(last.text, "42");
        assert_eq!(last.background, Some(BadgeColor::Brand.rgba()));
        assert_eq!(state::last_unread(&*h.store).unwrap(), LastUnread::Count(42));
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(false));
        assert_eq!(
            h.alarms.created(),
            vec![(ALARM_NAME.to_string(), Duration::from_secs(300))]
        );
        assert_eq!(
            h.backend.calls.lock().unwrap()[0],
            ("test-token-0123456789abcdef".to_string(), true)
        );
        // first observation never notifies
        assert_eq!(h.notifier.count(), 0);
    }

    #[test]
    fn alarm_is_not_recreated_when_present() {
        let h = harness(ScriptedBackend::replying(vec![
            (200, r#"{"unread": 1}"#),
            (200, r#"{"unread": 1}"#),
        ]));
        with_token(&h);
        h.scheduler.poll(false);
        h.scheduler.poll(false);
        assert_eq!(h.alarms.created().len(), 1);
    }

    #[test]
    fn alarm_uses_configured_interval() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 1}"#)]));
        with_token(&h);
        h.store
            .set(&[(state::SETTINGS, json!({"refreshInterval": 15}))])
            .unwrap();
        h.scheduler.poll(false);
        assert_eq!(h.alarms.created()[0].1, Duration::from_secs(900));
    }

    #[test]
    fn large_count_is_capped_and_zero_is_empty() {
        let h = harness(ScriptedBackend::replying(vec![
            (200, r#"{"unread": 150}"#),
            (200, r#"{"unread": 0}"#),
        ]));
        with_token(&h);
        h.scheduler.poll(false);
        assert_eq!(h.surface.last().unwrap().text, "99+");
        h.scheduler.poll(false);
        assert_eq!(h.surface.last().unwrap().text, "");
    }

    #[test]
    fn hidden_badge_is_cleared_but_state_still_saved() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 9}"#)]));
        with_token(&h);
        h.store
            .set(&[(state::SETTINGS, json!({"showBadge": false}))])
            .unwrap();
        assert_eq!(h.scheduler.poll(false), PollOutcome::Success { unread: 9 });
        let last = h.surface.last().unwrap();
        assert_eq!(last.text, "");
        assert_eq!(last.background, None);
        assert_eq!(state::last_unread(&*h.store).unwrap(), LastUnread::Count(9));
    }

    #[test]
    fn confirmed_auth_failure_sets_flag() {
        let h = harness(ScriptedBackend::replying(vec![
            (401, r#"{"error": "re_auth_required"}"#),
            (401, r#"{"error": "re_auth_required"}"#),
        ]));
        with_token(&h);
        state::commit_poll_success(&*h.store, 4).unwrap();

        assert_eq!(
            h.scheduler.poll(false),
            PollOutcome::AuthFailed { confirmed: true }
        );
        assert_eq!(h.backend.call_count(), 2);
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(true));
        assert_eq!(state::last_unread(&*h.store).unwrap(), LastUnread::Count(4));
        assert_eq!(
            h.scheduler.badge().snapshot(),
            BadgeState {
                text: ERROR_GLYPH.into(),
                color: Some(BadgeColor::Alert)
            }
        );
        assert!(!h.scheduler.is_polling());
    }

    #[test]
    fn first_setup_auth_failure_is_soft() {
        let h = harness(ScriptedBackend::replying(vec![(403, ""), (403, "")]));
        with_token(&h);

        assert_eq!(
            h.scheduler.poll(false),
            PollOutcome::AuthFailed { confirmed: false }
        );
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(false));
        assert_eq!(
            state::last_unread(&*h.store).unwrap(),
            LastUnread::NotYetPolled
        );
        let last = h.surface.last().unwrap();
        assert_eq!(last.text, ERROR_GLYPH);
        assert_eq!(last.background, Some(BadgeColor::SetupWarning.rgba()));
    }

    #[test]
    fn auth_failure_absorbed_by_retry() {
        let h = harness(ScriptedBackend::replying(vec![
            (401, ""),
            (200, r#"{"unread": 2}"#),
        ]));
        with_token(&h);
        state::commit_poll_success(&*h.store, 2).unwrap();

        assert_eq!(h.scheduler.poll(true), PollOutcome::Success { unread: 2 });
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(false));
        // both attempts keep the caller's force flag
        assert!(h.backend.calls.lock().unwrap().iter().all(|(_, f)| *f));
    }

    #[test]
    fn backend_error_restores_badge_and_keeps_state() {
        let h = harness(ScriptedBackend {
            online: Some(true),
            ..ScriptedBackend::replying(vec![(200, r#"{"unread": 3}"#), (500, "oops")])
        });
        with_token(&h);

        h.scheduler.poll(false);
        let before = h.scheduler.badge().snapshot();

        assert_eq!(
            h.scheduler.poll(false),
            PollOutcome::BackendError { status: 500 }
        );
        let texts = h.surface.texts();
        // loading glyph shown during the request, then rolled back
        assert_eq!(texts[texts.len() - 2], LOADING_GLYPH);
        assert_eq!(texts[texts.len() - 1], "3");
        assert_eq!(h.scheduler.badge().snapshot(), before);
        assert_eq!(state::last_unread(&*h.store).unwrap(), LastUnread::Count(3));
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(false));
    }

    #[test]
    fn network_failure_restores_badge() {
        let h = harness(ScriptedBackend::default());
        with_token(&h);
        h.scheduler.badge().render("5", Some(BadgeColor::Brand));
        h.backend
            .script
            .lock()
            .unwrap()
            .push_back(Scripted::NetworkDown);

        match h.scheduler.poll(false) {
            PollOutcome::Failed { reason } => assert!(reason.starts_with("request failed")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.surface.last().unwrap().text, "5");
        assert_eq!(
            state::last_unread(&*h.store).unwrap(),
            LastUnread::NotYetPolled
        );
        assert!(!h.scheduler.is_polling());
    }

    #[test]
    fn missing_unread_field_is_treated_as_failure() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"items": []}"#)]));
        with_token(&h);
        state::commit_poll_success(&*h.store, 6).unwrap();
        state::set_auth_error(&*h.store, true).unwrap();

        assert!(matches!(
            h.scheduler.poll(false),
            PollOutcome::Failed { .. }
        ));
        assert_eq!(state::last_unread(&*h.store).unwrap(), LastUnread::Count(6));
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(true));
        assert!(h.alarms.created().is_empty());
    }

    #[test]
    fn rising_count_notifies_once_within_window() {
        let h = harness(ScriptedBackend::replying(vec![
            (200, r#"{"unread": 3}"#),
            (200, r#"{"unread": 5}"#),
            (200, r#"{"unread": 8}"#),
            (200, r#"{"unread": 9}"#),
        ]));
        with_token(&h);

        h.scheduler.poll(false);
        assert_eq!(h.notifier.count(), 0);

        h.scheduler.poll(false);
        assert_eq!(h.notifier.count(), 1);

        h.clock.advance(10_000);
        h.scheduler.poll(false);
        assert_eq!(h.notifier.count(), 1);

        h.clock.advance(60_000);
        h.scheduler.poll(false);
        assert_eq!(h.notifier.count(), 2);
    }

    #[test]
    fn falling_count_is_silent() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 3}"#)]));
        with_token(&h);
        state::commit_poll_success(&*h.store, 5).unwrap();
        h.scheduler.poll(false);
        assert_eq!(h.notifier.count(), 0);
    }

    #[test]
    fn notifications_can_be_disabled() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 10}"#)]));
        with_token(&h);
        state::commit_poll_success(&*h.store, 1).unwrap();
        h.store
            .set(&[(state::SETTINGS, json!({"enableNotifications": false}))])
            .unwrap();
        h.scheduler.poll(false);
        assert_eq!(h.notifier.count(), 0);
    }

    /// Store that refuses writes touching one key.
    struct RefusingStore {
        inner: SqliteStore,
        refused: &'static str,
    }

    impl KeyValueStore for RefusingStore {
        fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
            self.inner.get(key)
        }

        fn set(&self, entries: &[(&str, serde_json::Value)]) -> Result<()> {
            if entries.iter().any(|(k, _)| *k == self.refused) {
                anyhow::bail!("disk full");
            }
            self.inner.set(entries)
        }

        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn notification_time_write_failure_keeps_success() {
        let store = Arc::new(RefusingStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            refused: state::LAST_NOTIFICATION_TIME,
        });
        state::store_token(&*store, "test-token-0123456789abcdef").unwrap();
        state::commit_poll_success(&*store, 1).unwrap();

        let notifier = RecordingNotifier::default();
        let alarms = RecordingAlarms::default();
        let scheduler = Scheduler::new(
            store.clone(),
            Arc::new(ScriptedBackend::replying(vec![(200, r#"{"unread": 4}"#)])),
            BadgePresenter::new(Box::new(RecordingSurface::default())),
            NotificationGate::new(Box::new(notifier.clone()), Duration::from_secs(60)),
            Arc::new(alarms.clone()),
            Arc::new(FixedClock::at(1_700_000_000_000)),
            Duration::ZERO,
        );

        assert_eq!(scheduler.poll(false), PollOutcome::Success { unread: 4 });
        assert_eq!(notifier.count(), 1);
        assert_eq!(state::last_unread(&*store).unwrap(), LastUnread::Count(4));
        assert_eq!(state::auth_error(&*store).unwrap(), Some(false));
        // alarm setup still runs after the gate
        assert_eq!(alarms.created().len(), 1);
        assert!(!scheduler.is_polling());
    }

    #[test]
    fn concurrent_polls_are_dropped() {
        let (release, gate_rx) = mpsc::channel();
        let backend = ScriptedBackend::replying(vec![(200, r#"{"unread": 1}"#)]);
        *backend.gate.lock().unwrap() = Some(gate_rx);
        let h = harness(backend);
        with_token(&h);

        let s = h.scheduler.clone();
        let first = thread::spawn(move || s.poll(false));

        while h.backend.call_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(h.scheduler.is_polling());

        let others: Vec<_> = (0..8)
            .map(|_| {
                let s = h.scheduler.clone();
                thread::spawn(move || s.poll(true))
            })
            .collect();
        for t in others {
            assert_eq!(t.join().unwrap(), PollOutcome::Skipped);
        }

        release.send(()).unwrap();
        assert_eq!(first.join().unwrap(), PollOutcome::Success { unread: 1 });
        assert_eq!(h.backend.call_count(), 1);
        assert!(!h.scheduler.is_polling());
    }
}
