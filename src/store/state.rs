//! Typed access to the persisted keys.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::domain::mail::MailItem;
use crate::domain::settings::Settings;
use crate::domain::unread::LastUnread;
use crate::store::repo::KeyValueStore;

pub const SESSION_ID: &str = "session_id";
pub const JWT: &str = "jwt";
pub const LAST_UNREAD: &str = "lastUnread";
pub const AUTH_ERROR: &str = "authError";
pub const LAST_NOTIFICATION_TIME: &str = "lastNotificationTime";
pub const SETTINGS: &str = "settings";
pub const ACCOUNT_EMAIL: &str = "accountEmail";
pub const LAST_ITEMS: &str = "lastItems";

/// What a poll needs from the store before talking to the backend.
#[derive(Debug, Clone, Default)]
pub struct PollSnapshot {
    pub token: Option<String>,
    pub last_unread: LastUnread,
    pub last_notification_ms: Option<i64>,
}

fn get_as<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value> {
    Ok(serde_json::to_value(v)?)
}

pub fn load_poll_snapshot(store: &dyn KeyValueStore) -> Result<PollSnapshot> {
    let token = get_as::<String>(store, JWT)?.filter(|t| !t.is_empty());
    let last_unread = LastUnread::from_json(store.get(LAST_UNREAD)?.as_ref());
    let last_notification_ms = get_as::<i64>(store, LAST_NOTIFICATION_TIME)?;
    Ok(PollSnapshot {
        token,
        last_unread,
        last_notification_ms,
    })
}

pub fn token(store: &dyn KeyValueStore) -> Result<Option<String>> {
    Ok(get_as::<String>(store, JWT)?.filter(|t| !t.is_empty()))
}

pub fn last_unread(store: &dyn KeyValueStore) -> Result<LastUnread> {
    Ok(LastUnread::from_json(store.get(LAST_UNREAD)?.as_ref()))
}

/// `None` when the flag was never written.
pub fn auth_error(store: &dyn KeyValueStore) -> Result<Option<bool>> {
    get_as::<bool>(store, AUTH_ERROR)
}

pub fn set_auth_error(store: &dyn KeyValueStore, value: bool) -> Result<()> {
    store.set(&[(AUTH_ERROR, json!(value))])
}

/// Count and cleared error flag go out together.
pub fn commit_poll_success(store: &dyn KeyValueStore, unread: u64) -> Result<()> {
    store.set(&[(LAST_UNREAD, json!(unread)), (AUTH_ERROR, json!(false))])
}

/// Fresh token from the auth callback; clears any previous auth error.
pub fn store_token(store: &dyn KeyValueStore, token: &str) -> Result<()> {
    store.set(&[(JWT, json!(token)), (AUTH_ERROR, json!(false))])
}

pub fn set_last_notification_time(store: &dyn KeyValueStore, now_ms: i64) -> Result<()> {
    store.set(&[(LAST_NOTIFICATION_TIME, json!(now_ms))])
}

/// Stored settings with defaults for anything missing.
pub fn load_settings(store: &dyn KeyValueStore) -> Result<Settings> {
    Ok(get_as::<Settings>(store, SETTINGS)?.unwrap_or_default())
}

pub fn save_settings(store: &dyn KeyValueStore, settings: &Settings) -> Result<()> {
    store.set(&[(SETTINGS, to_value(settings)?)])
}

pub fn session_id(store: &dyn KeyValueStore) -> Result<Option<String>> {
    get_as::<String>(store, SESSION_ID)
}

pub fn set_session_id(store: &dyn KeyValueStore, id: &str) -> Result<()> {
    store.set(&[(SESSION_ID, json!(id))])
}

pub fn account_email(store: &dyn KeyValueStore) -> Result<Option<String>> {
    get_as::<String>(store, ACCOUNT_EMAIL)
}

pub fn last_items(store: &dyn KeyValueStore) -> Result<Vec<MailItem>> {
    Ok(get_as::<Vec<MailItem>>(store, LAST_ITEMS)?.unwrap_or_default())
}

pub fn save_list(
    store: &dyn KeyValueStore,
    items: &[MailItem],
    account_email: Option<&str>,
) -> Result<()> {
    store.set(&[
        (LAST_ITEMS, to_value(&items)?),
        (ACCOUNT_EMAIL, to_value(&account_email)?),
    ])
}
