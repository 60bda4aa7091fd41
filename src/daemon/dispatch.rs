use std::sync::Arc;

use crate::daemon::scheduler::{PollOutcome, Scheduler};
use crate::domain::settings::minutes;
use crate::ipc::{Action, Message, Request, Response, Typed};
use crate::store::state;

/// Tokens shorter than this are not worth storing.
pub const MIN_TOKEN_LEN: usize = 20;

/// Routes inbound messages to the scheduler.
pub struct Dispatcher {
    scheduler: Arc<Scheduler>,
    backend_url: String,
}

impl Dispatcher {
    pub fn new(scheduler: Arc<Scheduler>, backend_url: impl Into<String>) -> Self {
        Self {
            scheduler,
            backend_url: backend_url.into(),
        }
    }

    pub fn handle(&self, req: Request) -> Response {
        match req.message {
            Message::Action(Action::Refresh) => {
                let outcome = self.scheduler.poll(true);
                log::debug!("refresh -> {outcome:?}");
                Response::status("refreshed")
            }

            Message::Action(Action::AuthSuccess) => {
                log::info!("Auth success received, restarting polling...");
                match state::load_settings(self.scheduler.store()) {
                    Ok(settings) => self.scheduler.reschedule(settings.refresh_period()),
                    Err(e) => {
                        log::error!("Could not read settings: {e:#}");
                        return Response::error("storage");
                    }
                }
                self.scheduler.poll(true);
                Response::status("polling_restarted")
            }

            Message::Action(Action::UpdateInterval { interval }) => {
                if interval == 0 {
                    return Response::error("invalid_interval");
                }
                log::info!("Updating alarm interval to: {interval}");
                self.scheduler.reschedule(minutes(interval));
                Response::ok()
            }

            Message::Typed(Typed::AuthToken { token }) => {
                self.accept_token(req.sender.as_deref(), &token)
            }
        }
    }

    fn accept_token(&self, sender: Option<&str>, token: &str) -> Response {
        if let Some(url) = sender
            && !url.starts_with(&self.backend_url)
        {
            log::warn!("Token rejected: invalid sender origin {url}");
            return Response::error("invalid_origin");
        }
        if token.len() < MIN_TOKEN_LEN {
            log::warn!("Token rejected: too short");
            return Response::error("invalid_token");
        }

        if let Err(e) = state::store_token(self.scheduler.store(), token) {
            log::error!("Failed to save token: {e:#}");
            return Response::error("storage");
        }

        match self.scheduler.poll(true) {
            PollOutcome::Failed { reason } => log::warn!("Poll after new token failed: {reason}"),
            other => log::debug!("poll after token -> {other:?}"),
        }
        Response::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::alarm::ALARM_NAME;
    use crate::daemon::scheduler::tests::{ScriptedBackend, harness};
    use crate::domain::unread::LastUnread;
    use crate::store::repo::KeyValueStore;
    use serde_json::json;
    use std::time::Duration;

    const BACKEND: &str = "https://api.mailchecker.workers.dev";
    const TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.payload.signature";

    fn token_msg(token: &str) -> Message {
        Message::Typed(Typed::AuthToken {
            token: token.to_string(),
        })
    }

    #[test]
    fn refresh_polls_with_force() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 2}"#)]));
        state::store_token(&*h.store, TOKEN).unwrap();
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);

        let resp = d.handle(Request::action(Action::Refresh));
        assert_eq!(resp, Response::status("refreshed"));
        assert!(h.backend.calls.lock().unwrap()[0].1);
        assert_eq!(state::last_unread(&*h.store).unwrap(), LastUnread::Count(2));
    }

    #[test]
    fn update_interval_reschedules() {
        let h = harness(ScriptedBackend::default());
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);

        assert_eq!(
            d.handle(Request::action(Action::UpdateInterval { interval: 10 })),
            Response::ok()
        );
        assert_eq!(
            h.alarms.created(),
            vec![(ALARM_NAME.to_string(), Duration::from_secs(600))]
        );
        assert_eq!(
            d.handle(Request::action(Action::UpdateInterval { interval: 0 })),
            Response::error("invalid_interval")
        );
        assert_eq!(h.alarms.created().len(), 1);
    }

    #[test]
    fn auth_success_creates_alarm_and_polls() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 0}"#)]));
        state::store_token(&*h.store, TOKEN).unwrap();
        h.store
            .set(&[(state::SETTINGS, json!({"refreshInterval": 2}))])
            .unwrap();
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);

        assert_eq!(
            d.handle(Request::action(Action::AuthSuccess)),
            Response::status("polling_restarted")
        );
        assert_eq!(h.alarms.created()[0], (ALARM_NAME.to_string(), Duration::from_secs(120)));
        assert_eq!(h.backend.call_count(), 1);
    }

    #[test]
    fn token_from_backend_is_stored_and_polled() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 1}"#)]));
        state::set_auth_error(&*h.store, true).unwrap();
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);

        let req = Request::from_sender(token_msg(TOKEN), format!("{BACKEND}/auth/callback"));
        assert_eq!(d.handle(req), Response::ok());
        assert_eq!(state::token(&*h.store).unwrap().as_deref(), Some(TOKEN));
        assert_eq!(state::auth_error(&*h.store).unwrap(), Some(false));
        assert_eq!(h.backend.calls.lock().unwrap()[0], (TOKEN.to_string(), true));
    }

    #[test]
    fn token_without_sender_is_accepted() {
        let h = harness(ScriptedBackend::replying(vec![(200, r#"{"unread": 1}"#)]));
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);
        assert_eq!(d.handle(Request::new(token_msg(TOKEN))), Response::ok());
        assert!(state::token(&*h.store).unwrap().is_some());
    }

    #[test]
    fn token_from_foreign_origin_is_rejected() {
        let h = harness(ScriptedBackend::default());
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);

        let req = Request::from_sender(token_msg(TOKEN), "https://evil.example.com/page");
        assert_eq!(d.handle(req), Response::error("invalid_origin"));
        assert_eq!(state::token(&*h.store).unwrap(), None);
        assert_eq!(h.backend.call_count(), 0);
    }

    #[test]
    fn short_token_is_rejected() {
        let h = harness(ScriptedBackend::default());
        let d = Dispatcher::new(h.scheduler.clone(), BACKEND);
        assert_eq!(
            d.handle(Request::new(token_msg("short"))),
            Response::error("invalid_token")
        );
        assert_eq!(state::token(&*h.store).unwrap(), None);
    }
}
