//! Search flow: one tag in, the user's matching photos out.

use crate::config::Config;
use crate::messages::{deliver, Reply};
use crate::model::Photo;
use crate::service::{PhotoService, ServiceError};
use crate::session::{Session, SessionStore, UserId};
use crate::transport::{OutboundPhoto, Transport};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Photos per grouped message
pub const ALBUM_SIZE: usize = 10;

/// Marks a user as expected to send a tag
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSession {
    last_activity: Instant,
}

impl SearchSession {
    pub fn new() -> Self {
        Self {
            last_activity: Instant::now(),
        }
    }
}

impl Default for SearchSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for SearchSession {
    fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }
}

pub struct SearchFlow {
    store: SessionStore<SearchSession>,
    service: Arc<PhotoService>,
    transport: Arc<dyn Transport>,
}

impl SearchFlow {
    pub fn new(config: &Config, service: Arc<PhotoService>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store: SessionStore::new(
                "search",
                config.session_timeout(),
                config.session_cleanup_interval(),
            ),
            service,
            transport,
        }
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.store.contains(user_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.store.len()
    }

    pub async fn start(&self, user_id: UserId) {
        self.store.set(user_id, SearchSession::new());
        info!(user_id, "Search started");
        deliver(self.transport.as_ref(), user_id, Reply::search_prompt()).await;
    }

    /// Run the search for `tag`; `false` when the user has no search session
    pub async fn receive_tag(&self, user_id: UserId, tag: &str) -> bool {
        if self.store.take_if(user_id, |_| true).is_none() {
            return false;
        }

        metrics::counter!("bot.search.queries").increment(1);

        let photos = match self.service.search_by_tag(user_id, tag).await {
            Ok(photos) => photos,
            Err(e) => {
                let reply = match &e {
                    ServiceError::Validation(reason) => Reply::invalid_tag(reason),
                    ServiceError::NotFound(_) => Reply::search_user_not_found(),
                    ServiceError::Storage(_) => Reply::search_error(),
                };
                debug!(user_id, error = %e, "Search failed");
                self.reply(user_id, reply).await;
                return true;
            }
        };

        if photos.is_empty() {
            self.reply(user_id, Reply::search_no_results()).await;
            return true;
        }

        self.reply(user_id, Reply::search_results(photos.len())).await;
        self.send_photos(user_id, &photos).await;
        self.reply(user_id, Reply::search_completed()).await;
        true
    }

    /// Deliver in albums, falling back to single photos when an album is refused
    async fn send_photos(&self, user_id: UserId, photos: &[Photo]) {
        let outbound: Vec<OutboundPhoto> = photos
            .iter()
            .map(|p| OutboundPhoto {
                file_id: p.file_id.clone(),
                caption: p.description.clone(),
            })
            .collect();

        for batch in outbound.chunks(ALBUM_SIZE) {
            let Err(e) = self.transport.send_album(user_id, batch).await else {
                continue;
            };

            warn!(user_id, batch_size = batch.len(), error = %e, "Album delivery failed, sending one by one");
            metrics::counter!("bot.search.album_fallbacks").increment(1);

            for photo in batch {
                if let Err(e) = self.transport.send_photo(user_id, photo).await {
                    warn!(user_id, file_id = %photo.file_id, error = %e, "Failed to send photo");
                }
            }
        }
    }

    pub async fn stop(&self) {
        self.store.stop().await;
    }

    async fn reply(&self, user_id: UserId, reply: Reply) {
        deliver(self.transport.as_ref(), user_id, reply).await;
    }
}
