//! Concurrent per-user session registry with idle expiry.
//!
//! One [`SessionStore`] instance backs each flow. The map is guarded by a
//! single reader/writer lock; readers receive owned snapshots so no handler
//! ever holds a reference into the store. A background sweeper removes idle
//! sessions every `cleanup_interval` until [`SessionStore::stop`] is awaited.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Chat platform user identifier
pub type UserId = i64;

/// State kept per user between events
pub trait Session: Clone + Send + Sync + 'static {
    fn last_activity(&self) -> Instant;

    fn touch(&mut self, now: Instant);

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity()) > timeout
    }
}

/// Keyed session registry shared by concurrent event handlers
pub struct SessionStore<S: Session> {
    name: &'static str,
    sessions: Arc<RwLock<HashMap<UserId, S>>>,
    timeout: Duration,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Session> SessionStore<S> {
    /// Create a store and start its sweeper. Must be called inside a tokio runtime.
    pub fn new(name: &'static str, timeout: Duration, cleanup_interval: Duration) -> Self {
        let sessions: Arc<RwLock<HashMap<UserId, S>>> = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let swept = sessions.clone();
        let sweeper = spawn_sweeper(name, cleanup_interval, shutdown.clone(), move || {
            let removed = sweep_expired(&swept, timeout, Instant::now());
            let active = swept.read().len();
            metrics::gauge!("bot.sessions.active", "store" => name).set(active as f64);
            removed
        });

        Self {
            name,
            sessions,
            timeout,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Snapshot of the user's session, if present and not idle past the timeout
    pub fn get(&self, user_id: UserId) -> Option<S> {
        let now = Instant::now();
        let sessions = self.sessions.read();
        sessions
            .get(&user_id)
            .filter(|s| !s.is_expired(now, self.timeout))
            .cloned()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        self.sessions
            .read()
            .get(&user_id)
            .is_some_and(|s| !s.is_expired(now, self.timeout))
    }

    /// Create or replace the user's session, stamping its activity time
    pub fn set(&self, user_id: UserId, mut session: S) {
        session.touch(Instant::now());
        self.sessions.write().insert(user_id, session);
    }

    /// Apply `f` to the stored session under the write lock.
    ///
    /// Returns `None` without calling `f` when the user has no live session.
    pub fn mutate<R>(&self, user_id: UserId, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();

        let expired = sessions.get(&user_id)?.is_expired(now, self.timeout);
        if expired {
            sessions.remove(&user_id);
            return None;
        }

        let session = sessions.get_mut(&user_id)?;
        let result = f(session);
        session.touch(now);
        Some(result)
    }

    /// Remove and return the user's live session if `accept` approves it
    pub fn take_if(&self, user_id: UserId, accept: impl FnOnce(&S) -> bool) -> Option<S> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();

        let session = sessions.get(&user_id)?;
        if session.is_expired(now, self.timeout) {
            sessions.remove(&user_id);
            return None;
        }
        if !accept(session) {
            return None;
        }
        sessions.remove(&user_id)
    }

    pub fn clear(&self, user_id: UserId) {
        self.sessions.write().remove(&user_id);
    }

    /// Number of stored sessions, including idle ones not yet swept
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove idle sessions now; returns how many were removed
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.sessions, self.timeout, Instant::now())
    }

    /// Stop the sweeper and wait for it to exit
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!(store = self.name, "Session sweeper stopped");
        }
    }
}

impl<S: Session> Drop for SessionStore<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn sweep_expired<S: Session>(
    sessions: &RwLock<HashMap<UserId, S>>,
    timeout: Duration,
    now: Instant,
) -> usize {
    let mut sessions = sessions.write();
    let before = sessions.len();
    sessions.retain(|_, s| !s.is_expired(now, timeout));
    before - sessions.len()
}

/// Run `sweep` every `period` until `shutdown` is cancelled.
pub(crate) fn spawn_sweeper<F>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    sweep: F,
) -> JoinHandle<()>
where
    F: Fn() -> usize + Send + 'static,
{
    // Schedule from construction, not from the task's first poll
    let start = Instant::now() + period;
    tokio::spawn(async move {
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = sweep();
                    if removed > 0 {
                        debug!(store = name, removed, "Swept expired entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        hits: u32,
        last_activity: Instant,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                hits: 0,
                last_activity: Instant::now(),
            }
        }
    }

    impl Session for Counter {
        fn last_activity(&self) -> Instant {
            self.last_activity
        }

        fn touch(&mut self, now: Instant) {
            self.last_activity = now;
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(30 * 60);
    const CLEANUP: Duration = Duration::from_secs(10 * 60);

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_get_returns_snapshot() {
        let store = SessionStore::new("test", TIMEOUT, CLEANUP);
        store.set(1, Counter::new());

        let mut copy = store.get(1).unwrap();
        copy.hits = 99;

        assert_eq!(store.get(1).unwrap().hits, 0);
        assert!(store.get(2).is_none());
        store.stop().await;
    }

    #[tokio::test]
    async fn test_mutate_only_when_present() {
        let store = SessionStore::new("test", TIMEOUT, CLEANUP);
        assert_eq!(store.mutate(1, |s: &mut Counter| s.hits += 1), None);

        store.set(1, Counter::new());
        assert_eq!(store.mutate(1, |s| {
            s.hits += 1;
            s.hits
        }), Some(1));
        assert_eq!(store.get(1).unwrap().hits, 1);

        store.clear(1);
        store.clear(1);
        assert!(!store.contains(1));
        store.stop().await;
    }

    #[tokio::test]
    async fn test_take_if_removes_only_accepted() {
        let store = SessionStore::new("test", TIMEOUT, CLEANUP);
        store.set(1, Counter::new());

        assert!(store.take_if(1, |s| s.hits > 0).is_none());
        assert!(store.contains(1));

        assert!(store.take_if(1, |s| s.hits == 0).is_some());
        assert!(!store.contains(1));
        assert!(store.take_if(1, |_| true).is_none());
        store.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_are_serialized() {
        let store = Arc::new(SessionStore::new("test", TIMEOUT, CLEANUP));
        store.set(1, Counter::new());
        store.set(2, Counter::new());

        let mut handles = Vec::new();
        for i in 0..200 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mutate(1 + (i % 2), |s| s.hits += 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get(1).unwrap().hits, 100);
        assert_eq!(store.get(2).unwrap().hits, 100);
        store.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_hidden_before_sweep() {
        let store = SessionStore::new("test", TIMEOUT, Duration::from_secs(24 * 3600));
        store.set(1, Counter::new());

        tokio::time::advance(TIMEOUT + Duration::from_secs(1)).await;

        assert!(store.get(1).is_none());
        assert!(store.mutate(1, |s| s.hits += 1).is_none());
        store.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_idle_sessions() {
        let store = SessionStore::new("test", TIMEOUT, CLEANUP);
        store.set(1, Counter::new());

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        store.set(2, Counter::new());

        // First sweep past the timeout of session 1 runs at t=40m
        tokio::time::advance(Duration::from_secs(21 * 60)).await;
        settle().await;

        assert_eq!(store.len(), 1);
        assert!(store.contains(2));
        store.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_schedule_starts_at_construction() {
        let store = SessionStore::new("test", Duration::from_secs(60), CLEANUP);
        store.set(1, Counter::new());

        // Clock moves before the sweeper task has been polled
        tokio::time::advance(Duration::from_secs(9 * 60)).await;
        store.set(2, Counter::new());

        // First sweep is due at t=10m
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(store.len(), 1);
        assert!(store.contains(2));
        store.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_extends_lifetime() {
        let store = SessionStore::new("test", TIMEOUT, CLEANUP);
        store.set(1, Counter::new());

        tokio::time::advance(Duration::from_secs(25 * 60)).await;
        store.mutate(1, |s| s.hits += 1);
        tokio::time::advance(Duration::from_secs(25 * 60)).await;

        assert_eq!(store.sweep(), 0);
        assert!(store.contains(1));
        store.stop().await;
    }

    #[tokio::test]
    async fn test_stop_terminates_sweeper() {
        let store: SessionStore<Counter> = SessionStore::new("test", TIMEOUT, CLEANUP);
        store.stop().await;
        assert!(store.sweeper.lock().is_none());
        // Second stop is a no-op
        store.stop().await;
    }
}
