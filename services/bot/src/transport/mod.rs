//! Chat transport: inbound events and outbound replies.

mod telegram;

pub use telegram::{TelegramClient, UpdatePoller};

use crate::messages::Menu;
use crate::session::UserId;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while talking to the chat platform
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Who sent an inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub username: String,
}

/// A photo as delivered by the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingPhoto {
    pub file_id: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    /// Set when the photo is part of an album sent in one go
    pub media_group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Slash command without the arguments, e.g. `/start`
    Command(String),
    Text(String),
    Photo(IncomingPhoto),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub sender: Sender,
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn user_id(&self) -> UserId {
        self.sender.id
    }
}

/// A stored photo to deliver back to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPhoto {
    pub file_id: String,
    pub caption: String,
}

/// Outbound side of the chat platform
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, user_id: UserId, text: &str, menu: Option<Menu>) -> Result<(), TransportError>;

    async fn send_photo(&self, user_id: UserId, photo: &OutboundPhoto) -> Result<(), TransportError>;

    /// Deliver up to ten photos as one grouped message
    async fn send_album(&self, user_id: UserId, photos: &[OutboundPhoto]) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Something a [`RecordingTransport`] was asked to send
    #[derive(Debug, Clone, PartialEq)]
    pub enum Sent {
        Text {
            user_id: UserId,
            text: String,
            menu: Option<Menu>,
        },
        Photo {
            user_id: UserId,
            file_id: String,
        },
        Album {
            user_id: UserId,
            file_ids: Vec<String>,
        },
    }

    /// Transport fake that records every outbound call
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        fail_albums: bool,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_albums() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_albums: true,
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().clone()
        }

        pub fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter_map(|s| match s {
                    Sent::Text { text, .. } => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }

        pub fn clear(&self) {
            self.sent.lock().clear();
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_text(&self, user_id: UserId, text: &str, menu: Option<Menu>) -> Result<(), TransportError> {
            self.sent.lock().push(Sent::Text {
                user_id,
                text: text.to_string(),
                menu,
            });
            Ok(())
        }

        async fn send_photo(&self, user_id: UserId, photo: &OutboundPhoto) -> Result<(), TransportError> {
            self.sent.lock().push(Sent::Photo {
                user_id,
                file_id: photo.file_id.clone(),
            });
            Ok(())
        }

        async fn send_album(&self, user_id: UserId, photos: &[OutboundPhoto]) -> Result<(), TransportError> {
            if self.fail_albums {
                return Err(TransportError::Api {
                    code: 400,
                    description: "Bad Request: album rejected".to_string(),
                });
            }
            self.sent.lock().push(Sent::Album {
                user_id,
                file_ids: photos.iter().map(|p| p.file_id.clone()).collect(),
            });
            Ok(())
        }
    }
}
