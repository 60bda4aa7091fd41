use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One entry of the recent-mail list, as returned by the backend and cached
/// under `lastItems`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailItem {
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// epoch milliseconds
    #[serde(default, deserialize_with = "epoch_ms")]
    pub received_at: Option<i64>,
    #[serde(default)]
    pub link: Option<String>,
}

/// Accepts epoch milliseconds or an RFC 3339 string; anything else reads as
/// unknown so one odd item can't sink the whole list.
fn epoch_ms<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    Ok(match v {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| t.timestamp_millis())
        }),
        _ => None,
    })
}

impl MailItem {
    pub fn sender(&self) -> &str {
        self.from_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.from_email.as_deref())
            .unwrap_or("")
    }

    pub fn avatar_initial(&self) -> char {
        self.sender()
            .chars()
            .next()
            .unwrap_or('U')
            .to_ascii_uppercase()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MailList {
    #[serde(default)]
    pub items: Vec<MailItem>,
    #[serde(default)]
    pub account: Option<Account>,
}

impl MailList {
    pub fn account_email(&self) -> Option<&str> {
        self.account.as_ref().and_then(|a| a.email.as_deref())
    }
}
