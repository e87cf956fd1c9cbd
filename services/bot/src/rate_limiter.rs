//! Per-user fixed-window request admission.
//!
//! Each user gets `requests` admitted calls per `window`, counted from their
//! first call in the window. Expired windows are dropped by a background
//! sweeper so memory tracks only recently active users.

use crate::session::{spawn_sweeper, UserId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Admission counter for one user's current window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserLimit {
    pub count: u32,
    pub reset_time: Instant,
}

pub struct RateLimiter {
    limits: Arc<RwLock<HashMap<UserId, UserLimit>>>,
    requests: u32,
    window: Duration,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Create a limiter and start its sweeper. Must be called inside a tokio runtime.
    pub fn new(requests: u32, window: Duration, cleanup_interval: Duration) -> Self {
        let limits: Arc<RwLock<HashMap<UserId, UserLimit>>> = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let swept = limits.clone();
        let sweeper = spawn_sweeper("rate_limiter", cleanup_interval, shutdown.clone(), move || {
            let now = Instant::now();
            let mut limits = swept.write();
            let before = limits.len();
            limits.retain(|_, limit| now < limit.reset_time);
            before - limits.len()
        });

        Self {
            limits,
            requests,
            window,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Admit or reject one request from `user_id`
    pub fn allow(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut limits = self.limits.write();

        match limits.get_mut(&user_id) {
            Some(limit) if now < limit.reset_time => {
                if limit.count >= self.requests {
                    return false;
                }
                limit.count += 1;
                true
            }
            _ => {
                limits.insert(
                    user_id,
                    UserLimit {
                        count: 1,
                        reset_time: now + self.window,
                    },
                );
                true
            }
        }
    }

    /// Current window of `user_id`, if tracked
    pub fn limit(&self, user_id: UserId) -> Option<UserLimit> {
        self.limits.read().get(&user_id).copied()
    }

    /// Number of tracked users
    pub fn len(&self) -> usize {
        self.limits.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every user's window
    pub fn reset(&self) {
        self.limits.write().clear();
        info!("Rate limiter state cleared");
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("Rate limiter sweeper stopped");
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_window_admits_exactly_requests() {
        let limiter = RateLimiter::new(20, MINUTE, 5 * MINUTE);

        for i in 0..20 {
            assert!(limiter.allow(1), "call {} should be admitted", i + 1);
        }
        assert!(!limiter.allow(1));
        assert_eq!(limiter.limit(1).unwrap().count, 20);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow(1));
        assert_eq!(limiter.limit(1).unwrap().count, 1);
        limiter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_until_window_rolls_over() {
        let limiter = RateLimiter::new(2, MINUTE, 5 * MINUTE);
        assert!(limiter.allow(1));
        assert!(limiter.allow(1));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.allow(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow(1));
        limiter.stop().await;
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let limiter = RateLimiter::new(1, MINUTE, 5 * MINUTE);
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));
        assert!(limiter.allow(2));
        limiter.stop().await;
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let limiter = RateLimiter::new(1, MINUTE, 5 * MINUTE);
        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));

        limiter.reset();
        assert!(limiter.is_empty());
        assert!(limiter.allow(1));
        limiter.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_expired_windows() {
        let limiter = RateLimiter::new(5, MINUTE, 5 * MINUTE);
        limiter.allow(1);
        tokio::time::advance(Duration::from_secs(4 * 60 + 30)).await;
        limiter.allow(2);

        tokio::time::advance(Duration::from_secs(31)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert!(limiter.limit(1).is_none());
        assert!(limiter.limit(2).is_some());
        limiter.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(50, MINUTE, 5 * MINUTE));

        let mut handles = Vec::new();
        for _ in 0..200 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.allow(7) }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 50);
        limiter.stop().await;
    }
}
