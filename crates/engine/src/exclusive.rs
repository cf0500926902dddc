//! Exclusive-run tags: at most one pipeline per tag at a time.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use {
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    /// Held elsewhere and the caller chose not to queue.
    Busy,
    /// The robot began shutting down while waiting.
    Stopped,
}

struct Holder {
    pipeline: String,
    released: Arc<Notify>,
}

#[derive(Default)]
pub struct ExclusiveTable {
    tags: Mutex<HashMap<String, Holder>>,
}

impl ExclusiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `tag` for `pipeline`. Re-acquiring a tag already held by the
    /// same pipeline succeeds immediately.
    pub async fn acquire(
        &self,
        tag: &str,
        pipeline: &str,
        queue: bool,
        stop: &CancellationToken,
    ) -> Acquire {
        loop {
            let released = {
                let mut tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
                match tags.get(tag) {
                    None => {
                        tags.insert(tag.to_string(), Holder {
                            pipeline: pipeline.to_string(),
                            released: Arc::new(Notify::new()),
                        });
                        return Acquire::Acquired;
                    },
                    Some(h) if h.pipeline == pipeline => return Acquire::Acquired,
                    Some(_) if !queue => return Acquire::Busy,
                    Some(h) => Arc::clone(&h.released),
                }
            };
            debug!(tag, pipeline, "queued for exclusive tag");
            let notified = released.notified();
            tokio::pin!(notified);
            // Register before re-checking so a release in between is not lost.
            notified.as_mut().enable();
            if !self.held_by_other(tag, pipeline) {
                continue;
            }
            tokio::select! {
                () = stop.cancelled() => return Acquire::Stopped,
                () = &mut notified => {},
            }
        }
    }

    fn held_by_other(&self, tag: &str, pipeline: &str) -> bool {
        let tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        tags.get(tag).is_some_and(|h| h.pipeline != pipeline)
    }

    /// Release every tag `pipeline` holds.
    pub fn release_all(&self, pipeline: &str) {
        let mut tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        tags.retain(|tag, h| {
            if h.pipeline == pipeline {
                debug!(tag, pipeline, "released exclusive tag");
                h.released.notify_waiters();
                false
            } else {
                true
            }
        });
    }

    pub fn holder(&self, tag: &str) -> Option<String> {
        let tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        tags.get(tag).map(|h| h.pipeline.clone())
    }

    /// Drop all entries, waking any waiters.
    pub fn clear(&self) {
        let mut tags = self.tags.lock().unwrap_or_else(|e| e.into_inner());
        for h in tags.values() {
            h.released.notify_waiters();
        }
        tags.clear();
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[tokio::test]
    async fn second_pipeline_queues_or_aborts() {
        let table = Arc::new(ExclusiveTable::new());
        let stop = CancellationToken::new();
        assert_eq!(table.acquire("deploy", "p1", false, &stop).await, Acquire::Acquired);
        assert_eq!(table.acquire("deploy", "p1", false, &stop).await, Acquire::Acquired);
        assert_eq!(table.acquire("deploy", "p2", false, &stop).await, Acquire::Busy);

        let waiter = {
            let table = Arc::clone(&table);
            let stop = stop.clone();
            tokio::spawn(async move { table.acquire("deploy", "p2", true, &stop).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        table.release_all("p1");
        assert_eq!(waiter.await.unwrap(), Acquire::Acquired);
        assert_eq!(table.holder("deploy").as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn shutdown_cancels_waiters() {
        let table = Arc::new(ExclusiveTable::new());
        let stop = CancellationToken::new();
        table.acquire("t", "p1", true, &stop).await;
        let waiter = {
            let table = Arc::clone(&table);
            let stop = stop.clone();
            tokio::spawn(async move { table.acquire("t", "p2", true, &stop).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        assert_eq!(waiter.await.unwrap(), Acquire::Stopped);
        table.clear();
        assert!(table.holder("t").is_none());
    }
}
