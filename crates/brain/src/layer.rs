//! Lock discipline and JSON encoding over a [`SimpleBrain`].
//!
//! A read-write checkout hands out an unguessable token that owns the key
//! until it is checked in, used for an update, or expires. Contending
//! checkouts queue on a per-key [`Notify`] and take over as soon as the
//! holder releases or its lock lapses.

use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex},
    time::Duration,
};

use {
    regex::Regex,
    serde::{Serialize, de::DeserializeOwned},
    tokio::{sync::Notify, time::Instant},
    tracing::{debug, trace, warn},
};

use crate::{
    Error, Result,
    short_term::ShortTermMemory,
    store::SimpleBrain,
};

pub const DEFAULT_LOCK_EXPIRY: Duration = Duration::from_secs(180);

static KEY_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*$").ok());

/// Whether `key` is acceptable as a datum key.
pub fn valid_key(key: &str) -> bool {
    KEY_RE.as_ref().is_some_and(|re| re.is_match(key))
}

struct Holder {
    token: String,
    expires: Instant,
}

struct KeyLock {
    holder: Option<Holder>,
    waiters: usize,
    notify: Arc<Notify>,
}

impl KeyLock {
    fn new() -> Self {
        Self {
            holder: None,
            waiters: 0,
            notify: Arc::new(Notify::new()),
        }
    }

    fn held_by(&self, token: &str, now: Instant) -> bool {
        self.holder
            .as_ref()
            .is_some_and(|h| h.token == token && h.expires > now)
    }
}

/// Counts one waiter on `key` until dropped, including when the waiting
/// future is cancelled.
struct Waiting<'a> {
    locks: &'a Mutex<HashMap<String, KeyLock>>,
    key: &'a str,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lock) = locks.get_mut(self.key) {
            lock.waiters = lock.waiters.saturating_sub(1);
            if lock.waiters == 0 && lock.holder.is_none() {
                locks.remove(self.key);
            }
        }
    }
}

/// Result of a checkout. `token` is empty for read-only checkouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout<T> {
    pub token: String,
    pub value: Option<T>,
}

impl<T> Checkout<T> {
    pub fn exists(&self) -> bool {
        self.value.is_some()
    }
}

pub struct Brain {
    backend: Arc<dyn SimpleBrain>,
    locks: Mutex<HashMap<String, KeyLock>>,
    lock_expiry: Duration,
    acquire_timeout: Duration,
    short_term: ShortTermMemory,
}

impl Brain {
    pub fn new(backend: Arc<dyn SimpleBrain>) -> Self {
        Self::with_timeouts(backend, DEFAULT_LOCK_EXPIRY, ShortTermMemory::DEFAULT_TTL)
    }

    /// `lock_expiry` bounds how long a token owns a key; waiters give up after
    /// twice that.
    pub fn with_timeouts(
        backend: Arc<dyn SimpleBrain>,
        lock_expiry: Duration,
        short_term_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
            lock_expiry,
            acquire_timeout: lock_expiry * 2,
            short_term: ShortTermMemory::new(short_term_ttl),
        }
    }

    pub fn short_term(&self) -> &ShortTermMemory {
        &self.short_term
    }

    pub fn backend(&self) -> &Arc<dyn SimpleBrain> {
        &self.backend
    }

    fn check_key(key: &str) -> Result<()> {
        if valid_key(key) {
            Ok(())
        } else {
            warn!(key, "invalid datum key");
            Err(Error::invalid_key(key))
        }
    }

    // ── Raw bytes ───────────────────────────────────────────────────────────

    /// Fetch `key`, taking its lock first when `rw` is set.
    pub async fn checkout_bytes(&self, key: &str, rw: bool) -> Result<Checkout<Vec<u8>>> {
        Self::check_key(key)?;
        let token = if rw {
            self.acquire(key).await?
        } else {
            String::new()
        };
        match self.backend.retrieve(key).await {
            Ok(value) => {
                trace!(key, rw, exists = value.is_some(), "datum checkout");
                Ok(Checkout { token, value })
            },
            Err(e) => {
                if rw {
                    self.release(key, &token);
                }
                Err(e)
            },
        }
    }

    /// Write `value` if `token` still owns `key`, then release the lock.
    pub async fn update_bytes(&self, key: &str, token: &str, value: &[u8]) -> Result<()> {
        Self::check_key(key)?;
        {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            match locks.get_mut(key) {
                Some(lock) if lock.held_by(token, now) => {
                    // Keep ownership for the duration of the write.
                    if let Some(holder) = lock.holder.as_mut() {
                        holder.expires = now + self.lock_expiry;
                    }
                },
                _ => {
                    debug!(key, "update with expired or foreign token");
                    return Err(Error::lock_expired(key));
                },
            }
        }
        let stored = self.backend.store(key, value).await;
        self.release(key, token);
        stored
    }

    // ── JSON ────────────────────────────────────────────────────────────────

    pub async fn checkout_datum<T: DeserializeOwned>(
        &self,
        key: &str,
        rw: bool,
    ) -> Result<Checkout<T>> {
        let raw = self.checkout_bytes(key, rw).await?;
        let value = match raw.value {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(key, error = %e, "datum is not valid JSON for the requested type");
                    if rw {
                        self.release(key, &raw.token);
                    }
                    return Err(e.into());
                },
            },
            None => None,
        };
        Ok(Checkout {
            token: raw.token,
            value,
        })
    }

    pub async fn update_datum<T: Serialize + ?Sized>(
        &self,
        key: &str,
        token: &str,
        value: &T,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.update_bytes(key, token, &bytes).await
    }

    /// Release a lock without writing. Unknown or stale tokens are ignored.
    pub fn checkin(&self, key: &str, token: &str) {
        if token.is_empty() {
            return;
        }
        self.release(key, token);
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        Self::check_key(key)?;
        self.backend.delete(key).await
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.backend.list().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.backend.shutdown().await
    }

    // ── Lock table ──────────────────────────────────────────────────────────

    async fn acquire(&self, key: &str) -> Result<String> {
        let deadline = Instant::now() + self.acquire_timeout;
        loop {
            let (notify, wake_at) = {
                let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
                let now = Instant::now();
                let lock = locks.entry(key.to_string()).or_insert_with(KeyLock::new);
                let free = lock.holder.as_ref().is_none_or(|h| h.expires <= now);
                if free {
                    if lock.holder.is_some() {
                        debug!(key, "taking over expired datum lock");
                    }
                    let token = uuid::Uuid::new_v4().to_string();
                    lock.holder = Some(Holder {
                        token: token.clone(),
                        expires: now + self.lock_expiry,
                    });
                    return Ok(token);
                }
                if now >= deadline {
                    return Err(Error::LockTimeout {
                        key: key.to_string(),
                    });
                }
                lock.waiters += 1;
                let expires = lock.holder.as_ref().map_or(deadline, |h| h.expires);
                (Arc::clone(&lock.notify), expires.min(deadline))
            };

            let _waiting = Waiting {
                locks: &self.locks,
                key,
            };
            tokio::select! {
                () = notify.notified() => {},
                () = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }

    fn release(&self, key: &str, token: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let Some(lock) = locks.get_mut(key) else {
            return;
        };
        if lock.holder.as_ref().is_none_or(|h| h.token != token) {
            return;
        }
        lock.holder = None;
        if lock.waiters > 0 {
            lock.notify.notify_one();
        } else {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::store_memory::MemBrain,
        rstest::rstest,
        serde::Deserialize,
        std::sync::atomic::{AtomicBool, Ordering},
    };

    fn brain() -> Arc<Brain> {
        Arc::new(Brain::new(Arc::new(MemBrain::new())))
    }

    #[rstest]
    #[case("lists:listmap", true)]
    #[case("bot:histories", true)]
    #[case("a.b-c_d", true)]
    #[case("", false)]
    #[case(":leading", false)]
    #[case("has space", false)]
    #[case("slash/key", false)]
    fn key_validation(#[case] key: &str, #[case] ok: bool) {
        assert_eq!(valid_key(key), ok);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Memories {
        items: Vec<String>,
        count: u32,
    }

    #[tokio::test]
    async fn json_round_trip() {
        let brain = brain();
        let first = brain.checkout_datum::<Memories>("memory:memories", true).await.unwrap();
        assert!(!first.exists());
        assert!(!first.token.is_empty());

        let v = Memories {
            items: vec!["The Alamo".into()],
            count: 1,
        };
        brain
            .update_datum("memory:memories", &first.token, &v)
            .await
            .unwrap();

        let again = brain.checkout_datum::<Memories>("memory:memories", false).await.unwrap();
        assert_eq!(again.value, Some(v));
        assert!(again.token.is_empty());
        assert_eq!(brain.lock_entries(), 0);
    }

    #[tokio::test]
    async fn foreign_token_does_not_write() {
        let brain = brain();
        let co = brain.checkout_bytes("k", true).await.unwrap();
        let err = brain.update_bytes("k", "not-the-token", b"x").await.unwrap_err();
        assert!(matches!(err, Error::LockExpired { .. }));
        assert!(brain.backend().retrieve("k").await.unwrap().is_none());
        brain.checkin("k", &co.token);
        assert_eq!(brain.lock_entries(), 0);
    }

    #[tokio::test]
    async fn update_without_checkout_fails() {
        let brain = brain();
        let err = brain.update_bytes("k", "", b"x").await.unwrap_err();
        assert_eq!(err.retval(), warren_common::RetVal::DatumLockExpired);
    }

    #[tokio::test]
    async fn invalid_key_rejected() {
        let brain = brain();
        let err = brain.checkout_bytes("bad key", false).await.unwrap_err();
        assert_eq!(err.retval(), warren_common::RetVal::InvalidDatumKey);
    }

    #[tokio::test]
    async fn second_rw_checkout_waits_for_update() {
        let brain = brain();
        let first = brain.checkout_bytes("k", true).await.unwrap();
        let updated = Arc::new(AtomicBool::new(false));

        let waiter = {
            let brain = Arc::clone(&brain);
            let updated = Arc::clone(&updated);
            tokio::spawn(async move {
                let co = brain.checkout_bytes("k", true).await.unwrap();
                assert!(updated.load(Ordering::SeqCst));
                assert_eq!(co.value, Some(b"first".to_vec()));
                brain.checkin("k", &co.token);
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        updated.store(true, Ordering::SeqCst);
        brain.update_bytes("k", &first.token, b"first").await.unwrap();
        waiter.await.unwrap();
        assert_eq!(brain.lock_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_is_taken_over() {
        let brain = Arc::new(Brain::with_timeouts(
            Arc::new(MemBrain::new()),
            Duration::from_secs(2),
            Duration::from_secs(60),
        ));
        let stale = brain.checkout_bytes("k", true).await.unwrap();

        // Blocks until the first lock lapses.
        let fresh = brain.checkout_bytes("k", true).await.unwrap();
        assert_ne!(stale.token, fresh.token);

        let err = brain.update_bytes("k", &stale.token, b"old").await.unwrap_err();
        assert!(matches!(err, Error::LockExpired { .. }));
        brain.update_bytes("k", &fresh.token, b"new").await.unwrap();
        assert_eq!(
            brain.backend().retrieve("k").await.unwrap(),
            Some(b"new".to_vec())
        );
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_pin_the_lock() {
        let brain = brain();
        let held = brain.checkout_bytes("k", true).await.unwrap();

        let gave_up =
            tokio::time::timeout(Duration::from_millis(50), brain.checkout_bytes("k", true)).await;
        assert!(gave_up.is_err());

        brain.checkin("k", &held.token);
        assert_eq!(brain.lock_entries(), 0);
    }

    #[tokio::test]
    async fn malformed_datum_releases_lock() {
        let brain = brain();
        brain.backend().store("k", b"not json").await.unwrap();
        let err = brain.checkout_datum::<Memories>("k", true).await.unwrap_err();
        assert_eq!(err.retval(), warren_common::RetVal::DataFormatError);
        assert_eq!(brain.lock_entries(), 0);
    }
}
