use serde_json::Value;

/// Last successfully observed unread count.
///
/// `NotYetPolled` marks a token that has never completed a poll, which is what
/// separates a first setup from a token that stopped working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastUnread {
    #[default]
    NotYetPolled,
    Count(u64),
}

impl LastUnread {
    pub fn is_first_setup(self) -> bool {
        matches!(self, LastUnread::NotYetPolled)
    }

    pub fn count(self) -> Option<u64> {
        match self {
            LastUnread::NotYetPolled => None,
            LastUnread::Count(n) => Some(n),
        }
    }

    pub fn from_json(v: Option<&Value>) -> Self {
        match v.and_then(Value::as_u64) {
            Some(n) => LastUnread::Count(n),
            None => LastUnread::NotYetPolled,
        }
    }
}

impl From<Option<u64>> for LastUnread {
    fn from(v: Option<u64>) -> Self {
        v.map_or(LastUnread::NotYetPolled, LastUnread::Count)
    }
}
