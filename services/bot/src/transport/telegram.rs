//! Telegram Bot API adapter.
//!
//! [`TelegramClient`] implements [`Transport`] over the HTTP Bot API and
//! [`UpdatePoller`] long-polls `getUpdates`, turning updates into
//! [`InboundEvent`]s on a channel.

use super::{EventKind, IncomingPhoto, InboundEvent, OutboundPhoto, Sender, Transport, TransportError};
use crate::config::TelegramConfig;
use crate::messages::Menu;
use crate::session::UserId;
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    from: Option<TelegramUser>,
    text: Option<String>,
    photo: Option<Vec<PhotoSize>>,
    media_group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    first_name: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
    width: i32,
    height: i32,
    file_size: Option<i64>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct KeyboardButton {
    text: &'static str,
}

#[derive(Debug, Serialize)]
struct ReplyKeyboardMarkup {
    keyboard: Vec<Vec<KeyboardButton>>,
    resize_keyboard: bool,
}

impl From<Menu> for ReplyKeyboardMarkup {
    fn from(menu: Menu) -> Self {
        Self {
            keyboard: menu
                .rows()
                .into_iter()
                .map(|row| row.into_iter().map(|text| KeyboardButton { text }).collect())
                .collect(),
            resize_keyboard: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: UserId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<ReplyKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct SendPhoto<'a> {
    chat_id: UserId,
    photo: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    caption: &'a str,
}

#[derive(Debug, Serialize)]
struct InputMediaPhoto<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    caption: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMediaGroup<'a> {
    chat_id: UserId,
    media: Vec<InputMediaPhoto<'a>>,
}

/// HTTP client for the Telegram Bot API
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TransportError> {
        // Long polls hold the request open for the poll timeout
        let timeout = Duration::from_secs(config.request_timeout_secs + config.poll_timeout_secs);
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.token),
        })
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response: ApiResponse<R> = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .json(params)
            .send()
            .await?
            .json()
            .await?;

        if !response.ok {
            return Err(TransportError::Api {
                code: response.error_code.unwrap_or_default(),
                description: response.description.unwrap_or_default(),
            });
        }

        response
            .result
            .ok_or_else(|| TransportError::Decode(format!("{method}: ok response without result")))
    }

    async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, TransportError> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: timeout_secs,
                allowed_updates: &["message"],
            },
        )
        .await
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_text(&self, user_id: UserId, text: &str, menu: Option<Menu>) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id: user_id,
                    text,
                    reply_markup: menu.map(Into::into),
                },
            )
            .await?;
        Ok(())
    }

    async fn send_photo(&self, user_id: UserId, photo: &OutboundPhoto) -> Result<(), TransportError> {
        let _: serde_json::Value = self
            .call(
                "sendPhoto",
                &SendPhoto {
                    chat_id: user_id,
                    photo: &photo.file_id,
                    caption: &photo.caption,
                },
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, photos), fields(count = photos.len()))]
    async fn send_album(&self, user_id: UserId, photos: &[OutboundPhoto]) -> Result<(), TransportError> {
        let media = photos
            .iter()
            .map(|p| InputMediaPhoto {
                kind: "photo",
                media: &p.file_id,
                caption: &p.caption,
            })
            .collect();

        let _: serde_json::Value = self
            .call("sendMediaGroup", &SendMediaGroup { chat_id: user_id, media })
            .await?;
        Ok(())
    }
}

/// Convert a Telegram message into an inbound event; `None` for anything the bot ignores
fn to_event(message: Message) -> Option<InboundEvent> {
    let from = message.from?;
    let sender = Sender {
        id: from.id,
        username: from.username.unwrap_or(from.first_name),
    };

    if let Some(sizes) = message.photo {
        // Sizes are ordered smallest first
        let largest = sizes.into_iter().last()?;
        return Some(InboundEvent {
            sender,
            kind: EventKind::Photo(IncomingPhoto {
                file_id: largest.file_id,
                file_size: largest.file_size.unwrap_or_default(),
                width: largest.width,
                height: largest.height,
                media_group_id: message.media_group_id,
            }),
        });
    }

    let text = message.text?;
    let kind = if text.starts_with('/') {
        let command = text.split_whitespace().next().unwrap_or_default();
        let command = command.split('@').next().unwrap_or_default();
        EventKind::Command(command.to_string())
    } else {
        EventKind::Text(text)
    };

    Some(InboundEvent { sender, kind })
}

/// Long-polls `getUpdates` and forwards events until cancelled
pub struct UpdatePoller {
    client: Arc<TelegramClient>,
    poll_timeout_secs: u64,
}

impl UpdatePoller {
    pub fn new(client: Arc<TelegramClient>, poll_timeout_secs: u64) -> Self {
        Self {
            client,
            poll_timeout_secs,
        }
    }

    /// Poll until `shutdown` is cancelled or the receiving side is dropped
    pub async fn run(&self, events: mpsc::Sender<InboundEvent>, shutdown: CancellationToken) {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..Default::default()
        };
        let mut offset = 0i64;

        info!("Starting update polling loop");

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.client.get_updates(offset, self.poll_timeout_secs) => result,
            };

            match result {
                Ok(updates) => {
                    backoff.reset();
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let Some(event) = update.message.and_then(to_event) else {
                            continue;
                        };
                        debug!(user_id = event.user_id(), "Received event");
                        if events.send(event).await.is_err() {
                            info!("Event receiver dropped, stopping poller");
                            return;
                        }
                    }
                }
                Err(e) => {
                    let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                    warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Failed to fetch updates");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("Update polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_update(json: serde_json::Value) -> Option<InboundEvent> {
        let update: Update = serde_json::from_value(json).unwrap();
        update.message.and_then(to_event)
    }

    #[test]
    fn test_photo_update_uses_largest_size() {
        let event = parse_update(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 1,
                "from": {"id": 42, "is_bot": false, "first_name": "Alice", "username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "media_group_id": "grp-1",
                "photo": [
                    {"file_id": "small", "file_unique_id": "s", "width": 90, "height": 60, "file_size": 1200},
                    {"file_id": "large", "file_unique_id": "l", "width": 1280, "height": 853, "file_size": 98000}
                ]
            }
        }))
        .unwrap();

        assert_eq!(event.user_id(), 42);
        assert_eq!(event.sender.username, "alice");
        assert_eq!(
            event.kind,
            EventKind::Photo(IncomingPhoto {
                file_id: "large".to_string(),
                file_size: 98000,
                width: 1280,
                height: 853,
                media_group_id: Some("grp-1".to_string()),
            })
        );
    }

    #[test]
    fn test_command_strips_bot_name_and_arguments() {
        let event = parse_update(serde_json::json!({
            "update_id": 11,
            "message": {
                "message_id": 2,
                "from": {"id": 7, "is_bot": false, "first_name": "Bob"},
                "chat": {"id": 7, "type": "private"},
                "text": "/start@phototag_bot hello"
            }
        }))
        .unwrap();

        assert_eq!(event.sender.username, "Bob");
        assert_eq!(event.kind, EventKind::Command("/start".to_string()));
    }

    #[test]
    fn test_plain_text_and_ignored_updates() {
        let event = parse_update(serde_json::json!({
            "update_id": 12,
            "message": {
                "message_id": 3,
                "from": {"id": 7, "is_bot": false, "first_name": "Bob"},
                "chat": {"id": 7, "type": "private"},
                "text": "sunset"
            }
        }))
        .unwrap();
        assert_eq!(event.kind, EventKind::Text("sunset".to_string()));

        // Sticker-only message: neither text nor photo
        assert!(parse_update(serde_json::json!({
            "update_id": 13,
            "message": {
                "message_id": 4,
                "from": {"id": 7, "is_bot": false, "first_name": "Bob"},
                "chat": {"id": 7, "type": "private"}
            }
        }))
        .is_none());
    }

    #[test]
    fn test_keyboard_markup_serialization() {
        let markup: ReplyKeyboardMarkup = Menu::Description.into();
        assert_eq!(
            serde_json::to_value(&markup).unwrap(),
            serde_json::json!({
                "keyboard": [[{"text": "Add description"}, {"text": "Continue"}]],
                "resize_keyboard": true
            })
        );
    }

    #[test]
    fn test_media_group_omits_empty_captions() {
        let photos = [
            OutboundPhoto {
                file_id: "a".to_string(),
                caption: String::new(),
            },
            OutboundPhoto {
                file_id: "b".to_string(),
                caption: "beach".to_string(),
            },
        ];
        let request = SendMediaGroup {
            chat_id: 1,
            media: photos
                .iter()
                .map(|p| InputMediaPhoto {
                    kind: "photo",
                    media: &p.file_id,
                    caption: &p.caption,
                })
                .collect(),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "chat_id": 1,
                "media": [
                    {"type": "photo", "media": "a"},
                    {"type": "photo", "media": "b", "caption": "beach"}
                ]
            })
        );
    }

    #[test]
    fn test_api_error_response() {
        let response: ApiResponse<serde_json::Value> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 5"
        }))
        .unwrap();
        assert!(!response.ok);
        assert_eq!(response.error_code, Some(429));
        assert!(response.result.is_none());
    }
}
