use anyhow::Result;
use serde_json::Value;

/// Durable string-keyed storage shared by the daemon, the popup and the CLI.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes every entry before returning.
    fn set(&self, entries: &[(&str, Value)]) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}
