//! Remembered elevations, per user.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use {tokio::time::Instant, warren_config::ElevationMode};

#[derive(Clone, Copy)]
struct Window {
    first: Instant,
    last: Instant,
}

pub struct ElevationCache {
    users: Mutex<HashMap<String, Window>>,
}

impl Default for ElevationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ElevationCache {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `user` is still elevated. In idle mode a hit extends the
    /// window.
    pub fn check(&self, user: &str, timeout: Duration, mode: ElevationMode) -> bool {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let Some(w) = users.get_mut(user) else {
            return false;
        };
        let valid = match mode {
            ElevationMode::Idle => now.duration_since(w.last) < timeout,
            ElevationMode::Absolute => now.duration_since(w.first) < timeout,
        };
        if valid {
            w.last = now;
        } else {
            users.remove(user);
        }
        valid
    }

    pub fn record(&self, user: &str) {
        let mut users = self.users.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        users
            .entry(user.to_string())
            .and_modify(|w| w.last = now)
            .or_insert(Window {
                first: now,
                last: now,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn idle_window_slides() {
        let cache = ElevationCache::new();
        assert!(!cache.check("u1", HOUR, ElevationMode::Idle));
        cache.record("u1");
        tokio::time::advance(HOUR / 2).await;
        assert!(cache.check("u1", HOUR, ElevationMode::Idle));
        tokio::time::advance(HOUR * 3 / 4).await;
        // 75 minutes since first, 45 since last use
        assert!(cache.check("u1", HOUR, ElevationMode::Idle));
        tokio::time::advance(HOUR * 2).await;
        assert!(!cache.check("u1", HOUR, ElevationMode::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_window_is_fixed() {
        let cache = ElevationCache::new();
        cache.record("u1");
        tokio::time::advance(HOUR / 2).await;
        assert!(cache.check("u1", HOUR, ElevationMode::Absolute));
        tokio::time::advance(HOUR * 3 / 4).await;
        assert!(!cache.check("u1", HOUR, ElevationMode::Absolute));
    }
}
