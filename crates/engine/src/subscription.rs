use std::{collections::HashMap, sync::Mutex, time::Duration};

use {tokio::time::Instant, tracing::debug};

use crate::prompt::ReplyKey;

struct Subscriber {
    plugin: String,
    since: Instant,
}

/// Conversations reserved by a plugin. Messages in a subscribed
/// (user, channel, thread) go to the plugin as `subscribed` instead of being
/// matched against commands. A subscription lapses `timeout` after it was
/// taken.
#[derive(Default)]
pub struct SubscriptionTable {
    subs: Mutex<HashMap<ReplyKey, Subscriber>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn expire(subs: &mut HashMap<ReplyKey, Subscriber>, timeout: Duration) {
        subs.retain(|key, sub| {
            let live = sub.since.elapsed() < timeout;
            if !live {
                debug!(
                    plugin = %sub.plugin,
                    user = %key.user_id,
                    channel = %key.channel_id,
                    thread = %key.thread_id,
                    "subscription expired"
                );
            }
            live
        });
    }

    /// False if the conversation is already subscribed.
    pub fn subscribe(&self, key: ReplyKey, plugin: &str, timeout: Duration) -> bool {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire(&mut subs, timeout);
        if subs.contains_key(&key) {
            return false;
        }
        debug!(
            plugin,
            user = %key.user_id,
            channel = %key.channel_id,
            thread = %key.thread_id,
            "subscribed"
        );
        subs.insert(key, Subscriber {
            plugin: plugin.to_string(),
            since: Instant::now(),
        });
        true
    }

    /// Idempotent.
    pub fn unsubscribe(&self, key: &ReplyKey, plugin: &str) {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        if subs.get(key).is_some_and(|s| s.plugin == plugin) {
            subs.remove(key);
        }
    }

    pub fn subscriber(&self, key: &ReplyKey, timeout: Duration) -> Option<String> {
        let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
        Self::expire(&mut subs, timeout);
        subs.get(key).map(|s| s.plugin.clone())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.subs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
