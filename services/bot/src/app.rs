//! Wiring and lifecycle of the bot core.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::rate_limiter::RateLimiter;
use crate::search::SearchFlow;
use crate::service::PhotoService;
use crate::storage::Storage;
use crate::transport::{InboundEvent, Transport};
use crate::upload::UploadFlow;
use crate::validator::Validator;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Snapshot of in-memory state, served by the admin API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub active_uploads: usize,
    pub active_searches: usize,
    pub tracked_rate_limit_users: usize,
}

pub struct App {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    rate_limiter: Arc<RateLimiter>,
    upload: Arc<UploadFlow>,
    search: Arc<SearchFlow>,
    tracker: TaskTracker,
}

impl App {
    /// Build every component. Must be called inside a tokio runtime.
    pub fn new(config: Config, storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Self {
        let tracker = TaskTracker::new();

        let service = Arc::new(PhotoService::new(
            storage,
            Arc::new(Validator::new(config.limits.clone())),
            config.query_timeout(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.requests,
            config.rate_limit_window(),
            config.rate_limit_cleanup_interval(),
        ));
        let upload = Arc::new(UploadFlow::new(
            &config,
            service.clone(),
            transport.clone(),
            tracker.clone(),
        ));
        let search = Arc::new(SearchFlow::new(&config, service.clone(), transport.clone()));

        let dispatcher = Arc::new(Dispatcher::new(
            rate_limiter.clone(),
            service,
            upload.clone(),
            search.clone(),
            transport,
        ));

        Self {
            config,
            dispatcher,
            rate_limiter,
            upload,
            search,
            tracker,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active_uploads: self.upload.active_sessions(),
            active_searches: self.search.active_sessions(),
            tracked_rate_limit_users: self.rate_limiter.len(),
        }
    }

    /// Spawn a handler per event until shutdown or until the channel closes
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>, shutdown: CancellationToken) {
        info!("Event loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting events");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        info!("Event channel closed");
                        break;
                    };
                    let dispatcher = self.dispatcher.clone();
                    self.tracker.spawn(async move {
                        dispatcher.dispatch(event).await;
                    });
                }
            }
        }
    }

    /// Stop background sweeps and wait for in-flight handlers.
    ///
    /// Returns `false` when the grace period ran out; stragglers are left running.
    pub async fn shutdown(&self) -> bool {
        self.rate_limiter.stop().await;
        self.upload.stop().await;
        self.search.stop().await;

        self.tracker.close();
        let grace = self.config.shutdown_timeout();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("All event handlers finished");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "Shutdown timeout exceeded, abandoning event handlers"
                );
                false
            }
        }
    }
}
