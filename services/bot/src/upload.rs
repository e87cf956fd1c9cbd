//! Upload flow: collect photos, then save them with or without a description.
//!
//! ```text
//! start ──► AwaitingPhoto ──finish──► AwaitingDescription ──skip / text──► (cleared)
//!              │  ▲                           │
//!              └──┘ receive_photo             └── too long: stays, user retries
//! ```
//!
//! Photos arriving as one media group share a single acknowledgment: each one
//! marks a response as owed, and a debounce task sends it once the group has
//! gone quiet and the session still matches.

use crate::config::Config;
use crate::messages::{deliver, Reply};
use crate::service::{PhotoService, SaveOutcome};
use crate::session::{Session, SessionStore, UserId};
use crate::transport::{IncomingPhoto, Transport};
use crate::validator::{sanitize, ValidationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    AwaitingPhoto,
    AwaitingDescription,
}

/// A collected photo, as reported by the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPhoto {
    pub file_id: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
}

impl From<&IncomingPhoto> for UploadedPhoto {
    fn from(photo: &IncomingPhoto) -> Self {
        Self {
            file_id: photo.file_id.clone(),
            file_size: photo.file_size,
            width: photo.width,
            height: photo.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub state: UploadState,
    /// In receipt order
    pub photos: Vec<UploadedPhoto>,
    pub last_media_group: Option<String>,
    pub pending_response: bool,
    last_activity: Instant,
}

impl UploadSession {
    pub fn new() -> Self {
        Self {
            state: UploadState::AwaitingPhoto,
            photos: Vec::new(),
            last_media_group: None,
            pending_response: false,
            last_activity: Instant::now(),
        }
    }

    fn contains(&self, file_id: &str) -> bool {
        self.photos.iter().any(|p| p.file_id == file_id)
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for UploadSession {
    fn last_activity(&self) -> Instant {
        self.last_activity
    }

    fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }
}

/// Outcome of appending a photo under the store lock
enum Append {
    Added { media_group: Option<String> },
    Duplicate,
    LimitReached,
    WrongState,
}

pub struct UploadFlow {
    store: Arc<SessionStore<UploadSession>>,
    service: Arc<PhotoService>,
    transport: Arc<dyn Transport>,
    tracker: TaskTracker,
    debounce: Duration,
}

impl UploadFlow {
    /// `tracker` owns the media-group debounce tasks so shutdown can wait for them
    pub fn new(
        config: &Config,
        service: Arc<PhotoService>,
        transport: Arc<dyn Transport>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            store: Arc::new(SessionStore::new(
                "upload",
                config.session_timeout(),
                config.session_cleanup_interval(),
            )),
            service,
            transport,
            tracker,
            debounce: config.media_group_debounce(),
        }
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.store.contains(user_id)
    }

    pub fn session(&self, user_id: UserId) -> Option<UploadSession> {
        self.store.get(user_id)
    }

    pub fn active_sessions(&self) -> usize {
        self.store.len()
    }

    /// Begin a fresh upload, discarding any previous one
    pub async fn start(&self, user_id: UserId) {
        self.store.set(user_id, UploadSession::new());
        info!(user_id, "Upload started");
        deliver(self.transport.as_ref(), user_id, Reply::upload_prompt()).await;
    }

    /// Collect one photo; ignored unless the user is in `AwaitingPhoto`
    pub async fn receive_photo(&self, user_id: UserId, photo: &IncomingPhoto) {
        let Some(session) = self.store.get(user_id) else {
            debug!(user_id, "Photo without upload session");
            return;
        };
        if session.state != UploadState::AwaitingPhoto {
            debug!(user_id, "Photo received while awaiting description");
            return;
        }

        metrics::counter!("bot.upload.photos_received").increment(1);
        let limits = self.service.validator().limits();

        if let Err(e) = self.service.validator().validate_file_size(photo.file_size) {
            info!(user_id, file_size = photo.file_size, error = %e, "Photo size rejected");
            let reply = match e {
                ValidationError::FileTooLarge { max } => Reply::photo_too_large(max),
                other => Reply::invalid_photo(other),
            };
            self.reply(user_id, reply).await;
            return;
        }

        if session.contains(&photo.file_id) {
            info!(user_id, file_id = %photo.file_id, "Photo already in session");
            self.reply(user_id, Reply::photo_already_exists()).await;
            return;
        }

        match self.service.photo_exists(&photo.file_id).await {
            Ok(false) => {}
            Ok(true) => {
                info!(user_id, file_id = %photo.file_id, "Photo already stored");
                self.reply(user_id, Reply::photo_already_exists()).await;
                return;
            }
            Err(e) => {
                warn!(user_id, file_id = %photo.file_id, error = %e, "Photo check failed, cancelling upload");
                self.store.clear(user_id);
                self.reply(user_id, Reply::photo_check_error()).await;
                return;
            }
        }

        // The session may have changed while storage was consulted
        let max_photos = limits.max_photos_per_session;
        let appended = self.store.mutate(user_id, |s| {
            if s.state != UploadState::AwaitingPhoto {
                return Append::WrongState;
            }
            if s.contains(&photo.file_id) {
                return Append::Duplicate;
            }
            if s.photos.len() >= max_photos {
                return Append::LimitReached;
            }

            s.photos.push(UploadedPhoto::from(photo));
            if let Some(group) = &photo.media_group_id {
                s.last_media_group = Some(group.clone());
                s.pending_response = true;
            }
            Append::Added {
                media_group: photo.media_group_id.clone(),
            }
        });

        match appended {
            None | Some(Append::WrongState) => {}
            Some(Append::Duplicate) => self.reply(user_id, Reply::photo_already_exists()).await,
            Some(Append::LimitReached) => {
                info!(user_id, max_photos, "Photo limit reached");
                self.reply(user_id, Reply::photo_limit_reached(max_photos)).await;
            }
            Some(Append::Added { media_group: None }) => {
                debug!(user_id, file_id = %photo.file_id, "Photo added");
                self.reply(user_id, Reply::photo_added()).await;
            }
            Some(Append::Added {
                media_group: Some(group),
            }) => {
                debug!(user_id, file_id = %photo.file_id, media_group = %group, "Grouped photo added");
                self.schedule_group_ack(user_id, group);
            }
        }
    }

    /// Acknowledge a media group once it has been quiet for the debounce window
    fn schedule_group_ack(&self, user_id: UserId, group: String) {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let debounce = self.debounce;

        self.tracker.spawn(async move {
            tokio::time::sleep(debounce).await;

            let owed = store
                .mutate(user_id, |s| {
                    let owed = s.pending_response && s.last_media_group.as_deref() == Some(group.as_str());
                    if owed {
                        s.pending_response = false;
                    }
                    owed
                })
                .unwrap_or(false);

            if owed {
                deliver(transport.as_ref(), user_id, Reply::photo_added()).await;
            }
        });
    }

    /// Stop collecting and ask whether to add a description
    pub async fn finish(&self, user_id: UserId) {
        let collected = self
            .store
            .mutate(user_id, |s| {
                if s.photos.is_empty() {
                    return None;
                }
                s.state = UploadState::AwaitingDescription;
                s.pending_response = false;
                Some(s.photos.len())
            })
            .flatten();

        match collected {
            Some(count) => {
                info!(user_id, count, "Upload finished, awaiting description");
                self.reply(user_id, Reply::description_choice(count)).await;
            }
            None => {
                self.store.clear(user_id);
                self.reply(user_id, Reply::nothing_to_save()).await;
            }
        }
    }

    /// Prompt for description text; `false` when not awaiting one
    pub async fn add_description_prompt(&self, user_id: UserId) -> bool {
        if !self.awaiting_description(user_id) {
            return false;
        }
        self.reply(user_id, Reply::enter_description()).await;
        true
    }

    /// Save every collected photo without a description; `false` when not awaiting one
    pub async fn skip_description(&self, user_id: UserId) -> bool {
        let Some(session) = self.take_for_saving(user_id) else {
            return false;
        };

        let mut saved = 0usize;
        for photo in &session.photos {
            match self.service.upload_photo(user_id, photo).await {
                Ok(SaveOutcome::Created(_)) => saved += 1,
                Ok(SaveOutcome::AlreadyExists(_)) => {}
                Err(e) => warn!(user_id, file_id = %photo.file_id, error = %e, "Failed to save photo"),
            }
        }

        self.report_saved(user_id, session.photos.len(), saved, false).await;
        true
    }

    /// Treat text as the description of the collected photos.
    ///
    /// Returns `false` when the user is not awaiting a description, so the
    /// caller can route the text elsewhere.
    pub async fn receive_text(&self, user_id: UserId, text: &str) -> bool {
        if !self.awaiting_description(user_id) {
            return false;
        }
        if text.starts_with('/') {
            debug!(user_id, "Command ignored while awaiting description");
            return true;
        }

        let validator = self.service.validator();
        let description = sanitize(text);
        let max_len = validator.limits().max_description_len;
        if description.chars().count() > max_len {
            info!(user_id, max_len, "Description too long");
            self.reply(user_id, Reply::description_too_long(max_len)).await;
            return true;
        }

        let tags = match validator.validate_and_parse_tags(&description) {
            Ok(tags) => tags,
            Err(e) => {
                info!(user_id, error = %e, "Invalid description");
                self.reply(user_id, Reply::invalid_description(e)).await;
                return true;
            }
        };

        let Some(session) = self.take_for_saving(user_id) else {
            return true;
        };

        let mut saved = 0usize;
        for photo in &session.photos {
            match self
                .service
                .save_photo_with_description(user_id, photo, &description, &tags)
                .await
            {
                Ok(_) => saved += 1,
                Err(e) => warn!(user_id, file_id = %photo.file_id, error = %e, "Failed to save photo with description"),
            }
        }

        self.report_saved(user_id, session.photos.len(), saved, true).await;
        true
    }

    /// Stop the session sweeper
    pub async fn stop(&self) {
        self.store.stop().await;
    }

    fn awaiting_description(&self, user_id: UserId) -> bool {
        self.store
            .get(user_id)
            .is_some_and(|s| s.state == UploadState::AwaitingDescription)
    }

    fn take_for_saving(&self, user_id: UserId) -> Option<UploadSession> {
        self.store
            .take_if(user_id, |s| s.state == UploadState::AwaitingDescription)
    }

    async fn report_saved(&self, user_id: UserId, collected: usize, saved: usize, described: bool) {
        metrics::counter!("bot.upload.photos_saved").increment(saved as u64);
        info!(user_id, collected, saved, described, "Upload saved");

        let reply = match (saved, described) {
            (0, _) => Reply::save_error(),
            (n, true) => Reply::photos_saved_with_description(n),
            (n, false) => Reply::photos_saved(n),
        };
        self.reply(user_id, reply).await;
    }

    async fn reply(&self, user_id: UserId, reply: Reply) {
        deliver(self.transport.as_ref(), user_id, reply).await;
    }
}
