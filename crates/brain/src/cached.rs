//! Write-behind cache in front of a slow back-end.
//!
//! Reads are served from a local cache once a key has been seen. Writes
//! update the cache and queue the key for a background flusher; when the
//! queue is full the write goes straight to the back-end instead.
//!
//! Back-end writes for one key take turns on a per-key lock and always send
//! the newest cached value, so an older value can never land after a newer
//! one. Each entry carries a version; a key stays dirty until the version it
//! was written at catches up, and dirty keys are written again at shutdown.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{
        sync::{
            Mutex as AsyncMutex,
            mpsc::{self, error::TrySendError},
        },
        task::JoinHandle,
    },
    tracing::{debug, warn},
};

use crate::{Result, store::SimpleBrain};

pub const DEFAULT_QUEUE_SIZE: usize = 64;

const FLUSH_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

struct Entry {
    /// `None` marks a pending delete.
    value: Option<Vec<u8>>,
    version: u64,
    flushed: u64,
}

#[derive(Default)]
struct CacheState {
    entries: Mutex<HashMap<String, Entry>>,
    writers: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CacheState {
    fn set(&self, key: &str, value: Option<Vec<u8>>) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.version += 1;
            },
            None => {
                entries.insert(key.to_string(), Entry {
                    value,
                    version: 1,
                    flushed: 0,
                });
            },
        }
    }

    fn cached(&self, key: &str) -> Option<Option<Vec<u8>>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.value.clone())
    }

    /// Remember a value read from the back-end, unless a write got there first.
    fn fill(&self, key: &str, value: Option<Vec<u8>>) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(key.to_string())
            .or_insert(Entry {
                value,
                version: 0,
                flushed: 0,
            })
            .value
            .clone()
    }

    fn dirty(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(_, e)| e.flushed < e.version)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn writer(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(writers.entry(key.to_string()).or_default())
    }

    /// Write the newest cached value of `key` if the back-end lacks it.
    async fn flush(&self, inner: &dyn SimpleBrain, key: &str) -> Result<()> {
        let writer = self.writer(key);
        let _turn = writer.lock().await;
        let (value, version) = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(e) if e.flushed < e.version => (e.value.clone(), e.version),
                _ => return Ok(()),
            }
        };
        match &value {
            Some(value) => inner.store(key, value).await?,
            None => inner.delete(key).await?,
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(key) {
            entry.flushed = entry.flushed.max(version);
        }
        Ok(())
    }
}

pub struct CachedBrain {
    inner: Arc<dyn SimpleBrain>,
    state: Arc<CacheState>,
    queue: Mutex<Option<mpsc::Sender<String>>>,
    flusher: AsyncMutex<Option<JoinHandle<()>>>,
}

impl CachedBrain {
    /// Wrap `inner`. Must be called from within a tokio runtime.
    pub fn new(inner: Arc<dyn SimpleBrain>, queue_size: usize) -> Self {
        let state = Arc::new(CacheState::default());
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let flusher = tokio::spawn(flush_loop(Arc::clone(&inner), Arc::clone(&state), rx));
        Self {
            inner,
            state,
            queue: Mutex::new(Some(tx)),
            flusher: AsyncMutex::new(Some(flusher)),
        }
    }

    /// Queue `key` for the flusher, or write it synchronously if the queue is
    /// full or already closed.
    async fn enqueue(&self, key: &str) -> Result<()> {
        let sent = {
            let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            match queue.as_ref() {
                Some(tx) => match tx.try_send(key.to_string()) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        debug!(key, "write-behind queue full, writing synchronously");
                        false
                    },
                    Err(TrySendError::Closed(_)) => false,
                },
                None => false,
            }
        };
        if sent {
            return Ok(());
        }
        self.state.flush(self.inner.as_ref(), key).await
    }
}

async fn flush_loop(
    inner: Arc<dyn SimpleBrain>,
    state: Arc<CacheState>,
    mut rx: mpsc::Receiver<String>,
) {
    while let Some(key) = rx.recv().await {
        let mut attempt = 0;
        while let Err(e) = state.flush(inner.as_ref(), &key).await {
            attempt += 1;
            if attempt >= FLUSH_ATTEMPTS {
                warn!(key, error = %e, "write-behind flush failed, keeping key for shutdown");
                break;
            }
            debug!(key, attempt, error = %e, "write-behind flush failed, retrying");
            tokio::time::sleep(RETRY_DELAY * attempt).await;
        }
    }
    debug!("write-behind flusher drained");
}

#[async_trait]
impl SimpleBrain for CachedBrain {
    async fn store(&self, key: &str, value: &[u8]) -> Result<()> {
        self.state.set(key, Some(value.to_vec()));
        self.enqueue(key).await
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.state.cached(key) {
            return Ok(value);
        }
        let value = self.inner.retrieve(key).await?;
        Ok(self.state.fill(key, value))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = self.inner.list().await?;
        let entries = self.state.entries.lock().unwrap_or_else(|e| e.into_inner());
        for (key, entry) in entries.iter() {
            match entry.value {
                Some(_) if !keys.contains(key) => keys.push(key.clone()),
                None => keys.retain(|k| k != key),
                Some(_) => {},
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.set(key, None);
        self.enqueue(key).await
    }

    async fn shutdown(&self) -> Result<()> {
        // Dropping the sender lets the flusher drain and exit.
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = self.flusher.lock().await.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "write-behind flusher ended abnormally");
        }
        let mut failed = None;
        for key in self.state.dirty() {
            if let Err(e) = self.state.flush(self.inner.as_ref(), &key).await {
                warn!(key, error = %e, "final write-behind flush failed");
                failed.get_or_insert(e);
            }
        }
        self.inner.shutdown().await?;
        failed.map_or(Ok(()), Err)
    }
}
