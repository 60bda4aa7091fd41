use anyhow::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::net::ToSocketAddrs;
use std::time::Duration;
use url::Url;

use crate::domain::mail::MailList;

pub const LIST_LIMIT: u32 = 50;

/// Errors raised while interpreting a backend reply.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("invalid response format: {0}")]
    Protocol(String),

    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
}

/// Status and raw body of a backend call; classification is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == 401 || self.status == 403
    }

    /// `error` field of a JSON error body, `"unknown"` otherwise.
    pub fn error_code(&self) -> String {
        #[derive(Deserialize)]
        struct ErrorBody {
            error: Option<String>,
        }
        serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Unread count from a success body; a missing count is a protocol violation.
    pub fn unread_count(&self) -> Result<u64, PollError> {
        #[derive(Deserialize)]
        struct UnreadBody {
            unread: Option<serde_json::Value>,
        }
        let parsed: UnreadBody = serde_json::from_str(&self.body)
            .map_err(|e| PollError::Protocol(format!("unparseable body: {e}")))?;
        match parsed.unread {
            None | Some(serde_json::Value::Null) => {
                Err(PollError::Protocol("missing unread count".into()))
            }
            Some(v) => v
                .as_u64()
                .ok_or_else(|| PollError::Protocol(format!("unread is not a count: {v}"))),
        }
    }

    pub fn mail_list(&self) -> Result<MailList, PollError> {
        serde_json::from_str(&self.body)
            .map_err(|e| PollError::Protocol(format!("unparseable list: {e}")))
    }
}

/// The remote mail endpoint.
pub trait MailBackend: Send + Sync {
    fn fetch_unread(&self, token: &str, force: bool) -> Result<HttpReply, PollError>;

    fn fetch_list(&self, token: &str, limit: u32) -> Result<HttpReply, PollError>;

    /// `None` when connectivity can't be observed.
    fn online(&self) -> Option<bool> {
        None
    }
}

pub struct HttpBackend {
    base: Url,
    http: Client,
}

impl HttpBackend {
    pub fn new(backend_url: &str) -> Result<Self> {
        let base = Url::parse(backend_url)
            .map_err(|e| anyhow::anyhow!("Invalid backend_url '{backend_url}': {e}"))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { base, http })
    }

    fn endpoint(&self, path: &str) -> Result<Url, PollError> {
        let joined = format!("{}{}", self.base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|e| PollError::Protocol(format!("bad url {joined}: {e}")))
    }

    fn get(&self, url: Url, token: &str) -> Result<HttpReply, PollError> {
        log::debug!("GET {}", url.path());
        let res = self.http.get(url).bearer_auth(token).send()?;
        let status = res.status().as_u16();
        let body = res.text()?;
        Ok(HttpReply { status, body })
    }
}

impl MailBackend for HttpBackend {
    fn fetch_unread(&self, token: &str, force: bool) -> Result<HttpReply, PollError> {
        let mut url = self.endpoint("/mail/unread")?;
        if force {
            url.query_pairs_mut().append_pair("refresh", "true");
        }
        self.get(url, token)
    }

    fn fetch_list(&self, token: &str, limit: u32) -> Result<HttpReply, PollError> {
        let mut url = self.endpoint("/mail/unread/list")?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get(url, token)
    }

    fn online(&self) -> Option<bool> {
        let host = self.base.host_str()?;
        let port = self.base.port_or_known_default()?;
        Some(
            (host, port)
                .to_socket_addrs()
                .map(|mut addrs| addrs.next().is_some())
                .unwrap_or(false),
        )
    }
}
