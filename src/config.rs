use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const APP_DIR: &str = "mailcheck";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub auth_path: String,
    /// Only item links starting with this prefix are opened from the popup.
    pub mail_web_url: String,
    pub revoke_url: Option<String>,
    pub callback_addr: String,
    pub db_path: Option<String>,
    pub badge_path: Option<String>,
    pub notification_rate_limit_secs: u64,
    pub auth_retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "https://api.mailchecker.workers.dev".to_string(),
            auth_path: "/auth/zoho".to_string(),
            mail_web_url: "https://mail.zoho.".to_string(),
            revoke_url: Some("https://accounts.zoho.in/home#sessions/userconnectedapps".to_string()),
            callback_addr: "127.0.0.1:8765".to_string(),
            db_path: None,
            badge_path: None,
            notification_rate_limit_secs: 60,
            auth_retry_backoff_ms: 2000,
        }
    }
}

impl Config {
    pub fn backend_url(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    pub fn notification_window(&self) -> Duration {
        Duration::from_secs(self.notification_rate_limit_secs)
    }

    pub fn auth_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.auth_retry_backoff_ms)
    }
}

pub fn config_dir() -> Result<PathBuf> {
    let p = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("no config dir available"))?
        .join(APP_DIR);
    fs::create_dir_all(&p)?;
    Ok(p)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let path = config_path()?;
    if !path.exists() {
        // write a template with the defaults so users have something to edit
        let sample = Config::default();
        fs::write(&path, toml::to_string_pretty(&sample)?)?;
        log::info!("Created template config at {}", path.display());
        return Ok(sample);
    }
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

pub fn resolve_db_path(cfg: &Config) -> Result<PathBuf> {
    match &cfg.db_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join("state.db")),
    }
}

pub fn resolve_badge_path(cfg: &Config) -> Result<PathBuf> {
    match &cfg.badge_path {
        Some(p) => Ok(PathBuf::from(p)),
        None => Ok(config_dir()?.join("badge.json")),
    }
}
