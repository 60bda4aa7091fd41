use anyhow::Result;

use crate::store::repo::KeyValueStore;
use crate::store::state;

/// Session id correlating an auth flow with the backend. Generated on first
/// use and never replaced.
pub fn ensure_session_id(store: &dyn KeyValueStore) -> Result<String> {
    if let Some(id) = state::session_id(store)?.filter(|s| !s.is_empty()) {
        log::debug!("Existing session ID: {id}");
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    state::set_session_id(store, &id)?;
    log::info!("Session ID generated: {id}");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    #[test]
    fn generated_once() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = ensure_session_id(&store).unwrap();
        assert_eq!(first.len(), 36);
        let second = ensure_session_id(&store).unwrap();
        assert_eq!(first, second);
    }
}
