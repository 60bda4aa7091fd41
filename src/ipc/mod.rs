use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

/// Largest frame either side will accept.
const MAX_FRAME: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
    #[serde(rename = "refresh")]
    Refresh,
    #[serde(rename = "auth_success")]
    AuthSuccess,
    #[serde(rename = "updateInterval")]
    UpdateInterval { interval: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Typed {
    #[serde(rename = "AUTH_TOKEN")]
    AuthToken { token: String },
}

/// Inbound message contract: `{action: ...}` or `{type: ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Action(Action),
    Typed(Typed),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub message: Message,
    /// URL of whoever relayed the message, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

impl Request {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            sender: None,
        }
    }

    pub fn action(action: Action) -> Self {
        Self::new(Message::Action(action))
    }

    pub fn from_sender(message: Message, sender: impl Into<String>) -> Self {
        Self {
            message,
            sender: Some(sender.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            ok: true,
            ..Default::default()
        }
    }

    pub fn status(status: &str) -> Self {
        Self {
            ok: true,
            status: Some(status.to_string()),
            error: None,
        }
    }

    pub fn error(error: &str) -> Self {
        Self {
            ok: false,
            status: None,
            error: Some(error.to_string()),
        }
    }
}

pub fn socket_path() -> Result<PathBuf> {
    Ok(crate::config::config_dir()?.join("daemon.sock"))
}

fn write_frame(w: &mut impl Write, data: &[u8]) -> Result<()> {
    // length-prefix
    w.write_all(&(data.len() as u32).to_be_bytes())?;
    w.write_all(data)?;
    w.flush()?;
    Ok(())
}

fn read_frame(r: &mut impl Read) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let n = u32::from_be_bytes(len_buf) as usize;
    if n > MAX_FRAME {
        anyhow::bail!("frame too large: {n} bytes");
    }
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Run one request/response exchange on an established stream.
pub fn exchange<S: Read + Write>(s: &mut S, req: &Request) -> Result<Response> {
    write_frame(s, &serde_json::to_vec(req)?)?;
    Ok(serde_json::from_slice(&read_frame(s)?)?)
}

/// Serve one request on an established stream.
pub fn handle_stream<S: Read + Write>(
    s: &mut S,
    handler: impl FnOnce(Request) -> Response,
) -> Result<()> {
    let raw = read_frame(s)?;
    let resp = match serde_json::from_slice::<Request>(&raw) {
        Ok(req) => handler(req),
        Err(e) => {
            log::warn!("Rejected IPC request: {e}");
            Response::error("bad_request")
        }
    };
    write_frame(s, &serde_json::to_vec(&resp)?)
}

#[cfg(unix)]
pub fn send(req: &Request) -> Result<Response> {
    let mut s = UnixStream::connect(socket_path()?)?;
    exchange(&mut s, req)
}

#[cfg(not(unix))]
pub fn send(_req: &Request) -> Result<Response> {
    Ok(Response::error("IPC not supported on this platform"))
}

/// Bind the daemon socket, replacing a stale one left by a previous run.
#[cfg(unix)]
pub fn bind(path: &std::path::Path) -> Result<UnixListener> {
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            anyhow::bail!("another daemon is listening on {}", path.display());
        }
        std::fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

/// Accept connections forever, one thread per connection.
#[cfg(unix)]
pub fn serve<F>(listener: UnixListener, handler: std::sync::Arc<F>)
where
    F: Fn(Request) -> Response + Send + Sync + 'static,
{
    for conn in listener.incoming() {
        let mut stream = match conn {
            Ok(s) => s,
            Err(e) => {
                log::warn!("IPC accept failed: {e}");
                continue;
            }
        };
        let handler = handler.clone();
        std::thread::spawn(move || {
            if let Err(e) = handle_stream(&mut stream, |req| (*handler)(req)) {
                log::warn!("IPC connection error: {e:#}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_inbound_contract() {
        let m: Message = serde_json::from_value(json!({"action": "refresh"})).unwrap();
        assert_eq!(m, Message::Action(Action::Refresh));

        let m: Message = serde_json::from_value(json!({"action": "auth_success"})).unwrap();
        assert_eq!(m, Message::Action(Action::AuthSuccess));

        let m: Message =
            serde_json::from_value(json!({"action": "updateInterval", "interval": 10})).unwrap();
        assert_eq!(m, Message::Action(Action::UpdateInterval { interval: 10 }));

        let m: Message =
            serde_json::from_value(json!({"type": "AUTH_TOKEN", "token": "abc"})).unwrap();
        assert_eq!(
            m,
            Message::Typed(Typed::AuthToken {
                token: "abc".into()
            })
        );

        assert!(serde_json::from_value::<Message>(json!({"action": "explode"})).is_err());
    }

    #[test]
    fn response_omits_empty_fields() {
        let v = serde_json::to_value(Response::status("refreshed")).unwrap();
        assert_eq!(v, json!({"ok": true, "status": "refreshed"}));
        let v = serde_json::to_value(Response::error("invalid_origin")).unwrap();
        assert_eq!(v, json!({"ok": false, "error": "invalid_origin"}));
    }

    #[cfg(unix)]
    #[test]
    fn exchange_over_socket_pair() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let t = std::thread::spawn(move || {
            handle_stream(&mut server, |req| {
                assert_eq!(req.sender.as_deref(), Some("https://backend.example"));
                Response::status("refreshed")
            })
            .unwrap();
        });
        let req = Request::from_sender(Message::Action(Action::Refresh), "https://backend.example");
        let resp = exchange(&mut client, &req).unwrap();
        assert_eq!(resp, Response::status("refreshed"));
        t.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn garbage_gets_bad_request() {
        let (mut client, mut server) = UnixStream::pair().unwrap();
        let t = std::thread::spawn(move || {
            handle_stream(&mut server, |_| Response::ok()).unwrap();
        });
        write_frame(&mut client, br#"{"message": {"action": "nope"}}"#).unwrap();
        let resp: Response = serde_json::from_slice(&read_frame(&mut client).unwrap()).unwrap();
        assert_eq!(resp, Response::error("bad_request"));
        t.join().unwrap();
    }
}
