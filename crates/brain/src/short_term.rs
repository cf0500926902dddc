//! Ephemeral per-conversation memories ("it", "the list").

use std::{collections::HashMap, sync::Mutex, time::Duration};

use tokio::time::Instant;

/// Who a short-term memory belongs to. An empty `user` means it is shared
/// by everyone in the channel; an empty `thread` means channel-wide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MemoryScope {
    pub user: String,
    pub channel: String,
    pub thread: String,
}

impl MemoryScope {
    pub fn user(user: &str, channel: &str) -> Self {
        Self {
            user: user.to_string(),
            channel: channel.to_string(),
            thread: String::new(),
        }
    }

    pub fn shared(channel: &str) -> Self {
        Self::user("", channel)
    }

    #[must_use]
    pub fn in_thread(mut self, thread: &str) -> Self {
        self.thread = thread.to_string();
        self
    }
}

struct Entry {
    value: String,
    touched: Instant,
}

pub struct ShortTermMemory {
    ttl: Duration,
    entries: Mutex<HashMap<(MemoryScope, String), Entry>>,
}

impl ShortTermMemory {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 60);

    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn remember(&self, scope: &MemoryScope, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((scope.clone(), key.to_string()), Entry {
            value: value.to_string(),
            touched: Instant::now(),
        });
    }

    /// The current value, if it has been used within the TTL. Reading
    /// refreshes the idle timer.
    pub fn recall(&self, scope: &MemoryScope, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let ttl = self.ttl;
        entries.retain(|_, e| now.duration_since(e.touched) <= ttl);
        let entry = entries.get_mut(&(scope.clone(), key.to_string()))?;
        entry.touched = now;
        Some(entry.value.clone())
    }

    pub fn forget(&self, scope: &MemoryScope, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(scope.clone(), key.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
