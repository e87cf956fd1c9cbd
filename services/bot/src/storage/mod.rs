//! Persistent storage of users and photos.
//!
//! The flows only see the [`Storage`] trait. "Not found" is reported as
//! `Ok(None)` (or an empty result), never as an error.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

use crate::model::{NewPhoto, NewUser, Photo, User};
use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage operation timed out")]
    Timeout,
}

/// Storage operations consumed by the upload and search flows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError>;

    /// Look up a user by chat platform ID
    async fn get_user_by_external_id(&self, external_id: i64) -> Result<Option<User>, StorageError>;

    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo, StorageError>;

    /// Look up a photo by chat platform file ID, across all owners
    async fn get_photo_by_file_id(&self, file_id: &str) -> Result<Option<Photo>, StorageError>;

    /// Replace a photo's description and tags. Missing photo is `NotFound`.
    async fn update_photo_description(
        &self,
        photo_id: i64,
        description: String,
        tags: Vec<String>,
    ) -> Result<(), StorageError>;

    /// Photos of `owner_id` carrying `tag`, newest first
    async fn search_photos_by_tag(&self, owner_id: i64, tag: &str) -> Result<Vec<Photo>, StorageError>;
}
