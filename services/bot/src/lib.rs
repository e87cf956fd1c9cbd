//! Phototag Bot - chat bot backend for tagging photos and finding them by tag
//!
//! Users upload one or more photos, optionally describe them (each word of the
//! description becomes a tag), and later search their own photos by a single
//! tag. The crate provides:
//!
//! - Per-user rate limiting in front of every event
//! - A generic in-memory session store with idle expiry
//! - Upload and search flows built as small state machines over that store
//! - Postgres and in-memory photo storage
//! - A Telegram Bot API transport and an admin HTTP API
//!
//! # Architecture
//!
//! ```text
//! UpdatePoller -> mpsc -> App::run -> Dispatcher -> RateLimiter
//!                                         |
//!                             +-----------+-----------+
//!                             v                       v
//!                        UploadFlow              SearchFlow
//!                             |                       |
//!                             +---> PhotoService <----+
//!                                        |
//!                                     Storage
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use phototag_bot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let transport = Arc::new(TelegramClient::new(&config.telegram)?);
//!     let app = App::new(config, Arc::new(MemoryStorage::new()), transport);
//!
//!     let (_tx, rx) = tokio::sync::mpsc::channel(64);
//!     app.run(rx, CancellationToken::new()).await;
//!     app.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod app;
pub mod config;
pub mod dispatcher;
pub mod messages;
pub mod model;
pub mod rate_limiter;
pub mod search;
pub mod service;
pub mod session;
pub mod storage;
pub mod transport;
pub mod upload;
pub mod validator;

// Re-export main types
pub use app::{App, Stats};
pub use config::{Config, ConfigError, StorageBackend};
pub use dispatcher::Dispatcher;
pub use rate_limiter::{RateLimiter, UserLimit};
pub use search::{SearchFlow, SearchSession, ALBUM_SIZE};
pub use service::{PhotoService, Registration, SaveOutcome, ServiceError};
pub use session::{Session, SessionStore, UserId};
pub use storage::{MemoryStorage, PgStorage, Storage, StorageError};
pub use transport::{InboundEvent, TelegramClient, Transport, TransportError, UpdatePoller};
pub use upload::{UploadFlow, UploadSession, UploadState, UploadedPhoto};
pub use validator::{ValidationError, Validator};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::app::App;
    pub use crate::config::Config;
    pub use crate::storage::{MemoryStorage, PgStorage, Storage};
    pub use crate::transport::{TelegramClient, Transport, UpdatePoller};
    pub use tokio_util::sync::CancellationToken;
}
