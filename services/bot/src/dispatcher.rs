//! Routes inbound events to commands and flows.

use crate::messages::{deliver, Button, Menu, Reply, MSG_HELP, MSG_INFO, MSG_RATE_LIMITED};
use crate::rate_limiter::RateLimiter;
use crate::search::SearchFlow;
use crate::service::{PhotoService, Registration};
use crate::session::UserId;
use crate::transport::{EventKind, IncomingPhoto, InboundEvent, Sender, Transport};
use crate::upload::UploadFlow;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct Dispatcher {
    rate_limiter: Arc<RateLimiter>,
    service: Arc<PhotoService>,
    upload: Arc<UploadFlow>,
    search: Arc<SearchFlow>,
    transport: Arc<dyn Transport>,
}

impl Dispatcher {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        service: Arc<PhotoService>,
        upload: Arc<UploadFlow>,
        search: Arc<SearchFlow>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            rate_limiter,
            service,
            upload,
            search,
            transport,
        }
    }

    /// Handle one event end to end
    #[instrument(skip(self, event), fields(user_id = event.user_id()))]
    pub async fn dispatch(&self, event: InboundEvent) {
        metrics::counter!("bot.events.received").increment(1);
        let user_id = event.user_id();

        if !self.rate_limiter.allow(user_id) {
            warn!(user_id, "Rate limit exceeded");
            metrics::counter!("bot.rate_limit.rejected").increment(1);
            if let Err(e) = self.transport.send_text(user_id, MSG_RATE_LIMITED, None).await {
                warn!(user_id, error = %e, "Failed to send rate limit notice");
            }
            return;
        }

        match event.kind {
            EventKind::Command(command) => self.handle_command(&event.sender, &command).await,
            EventKind::Text(text) => self.handle_text(user_id, &text).await,
            EventKind::Photo(photo) => self.handle_photo(user_id, &photo).await,
        }
    }

    async fn handle_command(&self, sender: &Sender, command: &str) {
        match command {
            "/start" => self.register(sender).await,
            "/help" => self.reply(sender.id, Reply::new("ℹ️", MSG_HELP).with_menu(Menu::Main)).await,
            "/info" => self.reply(sender.id, Reply::new("🏷️", MSG_INFO).with_menu(Menu::Main)).await,
            other => debug!(user_id = sender.id, command = other, "Unknown command ignored"),
        }
    }

    async fn register(&self, sender: &Sender) {
        let reply = match self.service.register_user(sender.id, &sender.username).await {
            Ok(Registration::Created(_)) => Reply::welcome_new(),
            Ok(Registration::Existing(_)) => Reply::welcome_back(),
            Err(e) => {
                warn!(user_id = sender.id, error = %e, "Registration failed");
                Reply::register_error()
            }
        };
        self.reply(sender.id, reply).await;
    }

    async fn handle_text(&self, user_id: UserId, text: &str) {
        if let Some(button) = Button::from_label(text) {
            debug!(user_id, ?button, "Button pressed");
            let handled = match button {
                Button::UploadPhoto => {
                    self.upload.start(user_id).await;
                    true
                }
                Button::SearchPhoto => {
                    self.search.start(user_id).await;
                    true
                }
                Button::FinishUpload => {
                    self.upload.finish(user_id).await;
                    true
                }
                Button::AddDescription => self.upload.add_description_prompt(user_id).await,
                Button::SkipDescription => self.upload.skip_description(user_id).await,
            };
            if !handled {
                self.reply(user_id, Reply::use_buttons()).await;
            }
            return;
        }

        if text.starts_with('/') {
            debug!(user_id, "Command-like text ignored");
            return;
        }

        // An upload in progress owns all text, even while collecting photos
        if self.upload.is_active(user_id) {
            if !self.upload.receive_text(user_id, text).await {
                debug!(user_id, "Text ignored while collecting photos");
            }
            return;
        }
        if self.search.receive_tag(user_id, text).await {
            return;
        }

        info!(user_id, "Text outside of any flow");
        self.reply(user_id, Reply::use_buttons()).await;
    }

    async fn handle_photo(&self, user_id: UserId, photo: &IncomingPhoto) {
        if self.upload.is_active(user_id) {
            self.upload.receive_photo(user_id, photo).await;
        } else {
            self.reply(user_id, Reply::use_buttons()).await;
        }
    }

    async fn reply(&self, user_id: UserId, reply: Reply) {
        deliver(self.transport.as_ref(), user_id, reply).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryStorage;
    use crate::transport::testing::{RecordingTransport, Sent};
    use crate::validator::Validator;
    use std::time::Duration;
    use tokio_util::task::TaskTracker;

    const USER: UserId = 42;

    struct Harness {
        dispatcher: Dispatcher,
        storage: Arc<MemoryStorage>,
        transport: Arc<RecordingTransport>,
        upload: Arc<UploadFlow>,
        search: Arc<SearchFlow>,
    }

    fn harness(requests: u32) -> Harness {
        let config = Config::with_token("test");
        let storage = Arc::new(MemoryStorage::new());
        let transport = Arc::new(RecordingTransport::new());
        let service = Arc::new(PhotoService::new(
            storage.clone(),
            Arc::new(Validator::new(config.limits.clone())),
            config.query_timeout(),
        ));
        let upload = Arc::new(UploadFlow::new(
            &config,
            service.clone(),
            transport.clone(),
            TaskTracker::new(),
        ));
        let search = Arc::new(SearchFlow::new(&config, service.clone(), transport.clone()));
        let limiter = Arc::new(RateLimiter::new(
            requests,
            Duration::from_secs(60),
            Duration::from_secs(300),
        ));

        Harness {
            dispatcher: Dispatcher::new(limiter, service, upload.clone(), search.clone(), transport.clone()),
            storage,
            transport,
            upload,
            search,
        }
    }

    fn event(kind: EventKind) -> InboundEvent {
        InboundEvent {
            sender: Sender {
                id: USER,
                username: "alice".to_string(),
            },
            kind,
        }
    }

    fn text(t: &str) -> InboundEvent {
        event(EventKind::Text(t.to_string()))
    }

    fn command(c: &str) -> InboundEvent {
        event(EventKind::Command(c.to_string()))
    }

    fn photo(file_id: &str) -> InboundEvent {
        event(EventKind::Photo(IncomingPhoto {
            file_id: file_id.to_string(),
            file_size: 1000,
            width: 640,
            height: 480,
            media_group_id: None,
        }))
    }

    impl Harness {
        fn upload_button() -> InboundEvent {
            text(Button::UploadPhoto.label())
        }

        fn last_text(&self) -> String {
            self.transport.texts().last().cloned().unwrap_or_default()
        }

        async fn stop(&self) {
            self.upload.stop().await;
            self.search.stop().await;
        }
    }

    #[tokio::test]
    async fn test_rate_limited_event_gets_notice_only() {
        let h = harness(2);
        h.dispatcher.dispatch(command("/help")).await;
        h.dispatcher.dispatch(command("/help")).await;
        h.transport.clear();

        h.dispatcher.dispatch(Harness::upload_button()).await;

        assert_eq!(
            h.transport.sent(),
            vec![Sent::Text {
                user_id: USER,
                text: MSG_RATE_LIMITED.to_string(),
                menu: None
            }]
        );
        assert!(!h.upload.is_active(USER));
        h.stop().await;
    }

    #[tokio::test]
    async fn test_start_registers_once() {
        let h = harness(100);
        h.dispatcher.dispatch(command("/start")).await;
        assert_eq!(h.last_text(), Reply::welcome_new().text);

        h.dispatcher.dispatch(command("/start")).await;
        assert_eq!(h.last_text(), Reply::welcome_back().text);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_help_and_unknown_commands() {
        let h = harness(100);
        h.dispatcher.dispatch(command("/help")).await;
        assert_eq!(h.last_text(), MSG_HELP);

        h.transport.clear();
        h.dispatcher.dispatch(command("/unknown")).await;
        assert!(h.transport.sent().is_empty());
        h.stop().await;
    }

    #[tokio::test]
    async fn test_text_and_photo_outside_flows() {
        let h = harness(100);
        h.dispatcher.dispatch(text("hello")).await;
        assert_eq!(h.last_text(), Reply::use_buttons().text);

        h.transport.clear();
        h.dispatcher.dispatch(photo("a")).await;
        assert_eq!(h.last_text(), Reply::use_buttons().text);

        h.transport.clear();
        h.dispatcher.dispatch(text(Button::SkipDescription.label())).await;
        assert_eq!(h.last_text(), Reply::use_buttons().text);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_upload_through_buttons() {
        let h = harness(100);
        h.dispatcher.dispatch(command("/start")).await;
        h.dispatcher.dispatch(Harness::upload_button()).await;
        h.dispatcher.dispatch(photo("a")).await;
        h.dispatcher.dispatch(text(Button::FinishUpload.label())).await;
        h.dispatcher.dispatch(text(Button::AddDescription.label())).await;
        assert_eq!(h.last_text(), Reply::enter_description().text);

        h.dispatcher.dispatch(text("mountains")).await;

        assert_eq!(h.storage.photos()[0].tags, vec!["mountains".to_string()]);
        assert_eq!(h.last_text(), Reply::photos_saved_with_description(1).text);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_search_through_buttons() {
        let h = harness(100);
        h.dispatcher.dispatch(command("/start")).await;
        h.dispatcher.dispatch(Harness::upload_button()).await;
        h.dispatcher.dispatch(photo("a")).await;
        h.dispatcher.dispatch(text(Button::FinishUpload.label())).await;
        h.dispatcher.dispatch(text("river")).await;

        h.dispatcher.dispatch(text(Button::SearchPhoto.label())).await;
        h.dispatcher.dispatch(text("river")).await;

        assert_eq!(h.last_text(), Reply::search_completed().text);
        assert!(!h.search.is_active(USER));

        // Session is gone, so the same text is no longer a query
        h.dispatcher.dispatch(text("river")).await;
        assert_eq!(h.last_text(), Reply::use_buttons().text);
        h.stop().await;
    }

    #[tokio::test]
    async fn test_upload_text_takes_precedence_over_search() {
        let h = harness(100);
        h.dispatcher.dispatch(command("/start")).await;
        h.dispatcher.dispatch(text(Button::SearchPhoto.label())).await;
        h.dispatcher.dispatch(Harness::upload_button()).await;
        h.dispatcher.dispatch(photo("a")).await;
        h.dispatcher.dispatch(text(Button::FinishUpload.label())).await;

        h.dispatcher.dispatch(text("lake")).await;

        assert_eq!(h.storage.photo_count(), 1);
        assert!(h.search.is_active(USER));
        h.stop().await;
    }

    #[tokio::test]
    async fn test_text_during_photo_collection_keeps_search_open() {
        let h = harness(100);
        h.dispatcher.dispatch(command("/start")).await;
        h.dispatcher.dispatch(text(Button::SearchPhoto.label())).await;
        h.dispatcher.dispatch(Harness::upload_button()).await;
        h.transport.clear();

        h.dispatcher.dispatch(text("lake")).await;

        assert!(h.transport.sent().is_empty());
        assert!(h.search.is_active(USER));
        assert!(h.upload.is_active(USER));
        h.stop().await;
    }
}
