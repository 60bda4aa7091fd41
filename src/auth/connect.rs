use anyhow::{Result, anyhow};
use std::time::{Duration, Instant};
use tiny_http::{Header, Response, Server, StatusCode};
use url::Url;

use crate::auth::session::ensure_session_id;
use crate::config::Config;
use crate::daemon::dispatch::MIN_TOKEN_LEN;
use crate::ipc::{self, Message, Request, Typed};
use crate::store::repo::KeyValueStore;
use crate::store::state;

const CALLBACK_PATH: &str = "/callback";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(120);

/// What the loopback listener made of one request.
#[derive(Debug, PartialEq, Eq)]
pub enum Callback {
    Token(String),
    Rejected(&'static str),
    /// Not the callback path (favicon and friends).
    Ignored,
}

/// Where a received token ended up.
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Daemon,
    Store,
}

/// Backend URL that starts the provider login for this session.
pub fn auth_url(cfg: &Config, session_id: &str, redirect_uri: &str) -> Result<Url> {
    let raw = format!("{}{}", cfg.backend_url(), cfg.auth_path);
    let mut url = Url::parse(&raw).map_err(|e| anyhow!("Invalid auth url '{raw}': {e}"))?;
    url.query_pairs_mut()
        .append_pair("session_id", session_id)
        .append_pair("redirect_uri", redirect_uri);
    Ok(url)
}

/// Validate a request that hit the loopback listener.
///
/// `path_and_query` is what `tiny_http` reports, e.g. `/callback?token=...`.
pub fn parse_callback(path_and_query: &str, referer: Option<&str>, backend_url: &str) -> Callback {
    let Ok(url) = Url::parse(&format!("http://localhost{path_and_query}")) else {
        return Callback::Rejected("bad_request");
    };
    if url.path() != CALLBACK_PATH {
        return Callback::Ignored;
    }
    if let Some(r) = referer
        && !r.starts_with(backend_url)
    {
        log::error!("Invalid referrer: {r}");
        return Callback::Rejected("invalid_origin");
    }
    let token = url
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned());
    match token {
        Some(t) if t.len() >= MIN_TOKEN_LEN => Callback::Token(t),
        _ => {
            log::error!("Invalid or missing token");
            Callback::Rejected("invalid_token")
        }
    }
}

fn referer(request: &tiny_http::Request) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h: &&Header| h.field.equiv("Referer"))
        .map(|h| h.value.as_str().to_string())
}

/// Serve the loopback callback until a valid token arrives or time runs out.
pub fn wait_for_token(server: &Server, backend_url: &str, timeout: Duration) -> Result<String> {
    let wait_until = Instant::now() + timeout;

    while Instant::now() < wait_until {
        let Ok(Some(request)) = server.recv_timeout(Duration::from_millis(500)) else {
            continue;
        };

        let referer = referer(&request);
        match parse_callback(request.url(), referer.as_deref(), backend_url) {
            Callback::Token(token) => {
                let _ = request.respond(Response::from_string(
                    "Mail account connected. You can close this tab.",
                ));
                return Ok(token);
            }
            Callback::Rejected(reason) => {
                let resp = Response::from_string(format!("Rejected: {reason}"))
                    .with_status_code(StatusCode(400));
                let _ = request.respond(resp);
            }
            Callback::Ignored => {
                let resp = Response::from_string("Not found").with_status_code(StatusCode(404));
                let _ = request.respond(resp);
            }
        }
    }

    Err(anyhow!("No token received within timeout"))
}

/// Hand the token to a running daemon, or store it for the next start.
pub fn deliver_token(store: &dyn KeyValueStore, backend_url: &str, token: &str) -> Result<Delivery> {
    let req = Request::from_sender(
        Message::Typed(Typed::AuthToken {
            token: token.to_string(),
        }),
        backend_url,
    );
    match ipc::send(&req) {
        Ok(resp) if resp.ok => Ok(Delivery::Daemon),
        Ok(resp) => Err(anyhow!(
            "daemon rejected token: {}",
            resp.error.unwrap_or_default()
        )),
        Err(e) => {
            log::info!("Daemon not reachable ({e}); saving token directly");
            state::store_token(store, token)?;
            Ok(Delivery::Store)
        }
    }
}

/// Run the browser login and persist the resulting token.
pub fn connect(cfg: &Config, store: &dyn KeyValueStore) -> Result<Delivery> {
    let session_id = ensure_session_id(store)?;

    let server = Server::http(cfg.callback_addr.as_str())
        .map_err(|e| anyhow!("Failed to bind {}: {e}", cfg.callback_addr))?;
    let redirect = format!("http://{}{CALLBACK_PATH}", cfg.callback_addr);
    let url = auth_url(cfg, &session_id, &redirect)?;

    println!("Open this URL in your browser:\n{url}");
    // best-effort: don't fail if browser can't be opened
    if let Err(e) = open::that(url.as_str()) {
        eprintln!("Warning: could not open browser automatically: {e}");
    }

    let token = wait_for_token(&server, cfg.backend_url(), CALLBACK_TIMEOUT)?;
    log::info!("Token received");
    deliver_token(store, cfg.backend_url(), &token)
}

/// Open the provider page where the user revokes access.
pub fn disconnect(cfg: &Config) -> Result<()> {
    let url = cfg
        .revoke_url
        .as_deref()
        .ok_or_else(|| anyhow!("revoke_url not set in config"))?;
    open::that(url)?;
    println!(
        "Revoke access on the page that just opened. The daemon will notice on its next poll."
    );
    Ok(())
}
