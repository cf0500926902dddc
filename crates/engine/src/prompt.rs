//! Pending prompts waiting for a reply.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use {regex::Regex, tokio::sync::oneshot, warren_common::RetVal};

/// Whose reply a prompt is waiting for. Also keys subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyKey {
    pub user_id: String,
    pub channel_id: String,
    pub thread_id: String,
}

impl ReplyKey {
    pub fn new(user_id: &str, channel_id: &str, thread_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
            thread_id: thread_id.to_string(),
        }
    }
}

#[derive(Default)]
pub struct PromptTable {
    waiting: Mutex<HashMap<ReplyKey, oneshot::Sender<String>>>,
}

/// A registered prompt. Dropping it withdraws the prompt.
pub struct PendingReply<'a> {
    table: &'a PromptTable,
    key: ReplyKey,
    rx: Option<oneshot::Receiver<String>>,
}

impl PromptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when someone is already waiting on `key`.
    pub fn register(&self, key: ReplyKey) -> Option<PendingReply<'_>> {
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        if waiting.get(&key).is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waiting.insert(key.clone(), tx);
        Some(PendingReply {
            table: self,
            key,
            rx: Some(rx),
        })
    }

    /// Hand `text` to whoever waits on `key`. Returns false if nobody was.
    pub fn deliver(&self, key: &ReplyKey, text: &str) -> bool {
        let tx = {
            let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
            waiting.remove(key)
        };
        match tx {
            Some(tx) => tx.send(text.to_string()).is_ok(),
            None => false,
        }
    }

    pub fn is_waiting(&self, key: &ReplyKey) -> bool {
        let waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        waiting.get(key).is_some_and(|tx| !tx.is_closed())
    }

    /// Interrupt every waiting prompt.
    pub fn clear(&self) {
        self.waiting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    fn withdraw(&self, key: &ReplyKey) {
        let mut waiting = self.waiting.lock().unwrap_or_else(|e| e.into_inner());
        if waiting.get(key).is_some_and(|tx| tx.is_closed()) {
            waiting.remove(key);
        }
    }
}

impl PendingReply<'_> {
    /// Wait for the reply and judge it against `regex`.
    pub async fn wait(mut self, regex: &Regex, timeout: Duration) -> Result<String, RetVal> {
        let Some(rx) = self.rx.take() else {
            return Err(RetVal::Interrupted);
        };
        let reply = match tokio::time::timeout(timeout, rx).await {
            Err(_) => return Err(RetVal::TimeoutExpired),
            Ok(Err(_)) => return Err(RetVal::Interrupted),
            Ok(Ok(text)) => text,
        };
        match reply.trim() {
            "=" => Err(RetVal::UseDefaultValue),
            "-" => Err(RetVal::Interrupted),
            _ if regex.is_match(&reply) => Ok(reply.trim().to_string()),
            _ => Err(RetVal::ReplyNotMatched),
        }
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        // Close our end first so `withdraw` only removes this prompt.
        drop(self.rx.take());
        self.table.withdraw(&self.key);
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::matcher::stock_reply};

    fn key() -> ReplyKey {
        ReplyKey::new("u0001", "general", "")
    }

    #[tokio::test]
    async fn reply_is_matched() {
        let table = PromptTable::new();
        let pending = table.register(key()).unwrap();
        assert!(table.register(key()).is_none());
        assert!(table.deliver(&key(), " yes "));
        let yes_no = stock_reply("YesNo").unwrap();
        assert_eq!(pending.wait(&yes_no, Duration::from_secs(1)).await, Ok("yes".into()));
        assert!(!table.is_waiting(&key()));
    }

    #[tokio::test]
    async fn special_replies() {
        let table = PromptTable::new();
        let re = stock_reply("YesNo").unwrap();
        for (text, want) in [
            ("=", RetVal::UseDefaultValue),
            ("-", RetVal::Interrupted),
            ("perhaps", RetVal::ReplyNotMatched),
        ] {
            let pending = table.register(key()).unwrap();
            table.deliver(&key(), text);
            assert_eq!(pending.wait(&re, Duration::from_secs(1)).await, Err(want));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_withdraws_the_prompt() {
        let table = PromptTable::new();
        let re = stock_reply("YesNo").unwrap();
        let pending = table.register(key()).unwrap();
        assert_eq!(
            pending.wait(&re, Duration::from_secs(60)).await,
            Err(RetVal::TimeoutExpired)
        );
        assert!(!table.deliver(&key(), "yes"));
        assert!(table.register(key()).is_some());
    }

    #[tokio::test]
    async fn clear_interrupts() {
        let table = PromptTable::new();
        let re = stock_reply("YesNo").unwrap();
        let pending = table.register(key()).unwrap();
        table.clear();
        assert_eq!(
            pending.wait(&re, Duration::from_secs(1)).await,
            Err(RetVal::Interrupted)
        );
    }
}
