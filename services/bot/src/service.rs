//! Photo service: registration, saving and searching on top of [`Storage`].
//!
//! Every storage call is bounded by the configured query timeout so a slow
//! backend fails fast instead of pinning an event handler.

use crate::model::{NewPhoto, NewUser, Photo, User};
use crate::storage::{Storage, StorageError};
use crate::upload::UploadedPhoto;
use crate::validator::{sanitize, ValidationError, Validator};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors surfaced to the flows, mirroring how they are reported to users
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Result of a `/start` registration
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    Existing(User),
    Created(User),
}

/// Result of saving a photo without description
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Created(Photo),
    AlreadyExists(Photo),
}

impl SaveOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, SaveOutcome::Created(_))
    }
}

pub struct PhotoService {
    storage: Arc<dyn Storage>,
    validator: Arc<Validator>,
    query_timeout: Duration,
}

impl PhotoService {
    pub fn new(storage: Arc<dyn Storage>, validator: Arc<Validator>, query_timeout: Duration) -> Self {
        Self {
            storage,
            validator,
            query_timeout,
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Run a storage call under the query timeout
    async fn bounded<T, F>(&self, call: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        tokio::time::timeout(self.query_timeout, call)
            .await
            .map_err(|_| StorageError::Timeout)?
    }

    pub async fn register_user(&self, external_id: i64, username: &str) -> Result<Registration, ServiceError> {
        let username = sanitize(username);
        if let Err(e) = self.validator.validate_username(&username) {
            warn!(user_id = external_id, username = %username, error = %e, "Invalid username");
            return Err(e.into());
        }

        let existing = self
            .bounded(self.storage.get_user_by_external_id(external_id))
            .await
            .map_err(|e| {
                error!(user_id = external_id, error = %e, "Failed to get user");
                e
            })?;

        if let Some(user) = existing {
            info!(user_id = external_id, username = %username, "User already registered");
            return Ok(Registration::Existing(user));
        }

        let user = self
            .bounded(self.storage.create_user(NewUser {
                external_id,
                username: username.clone(),
            }))
            .await
            .map_err(|e| {
                error!(user_id = external_id, username = %username, error = %e, "Failed to create user");
                e
            })?;

        info!(user_id = external_id, username = %username, storage_id = user.id, "User registered");
        Ok(Registration::Created(user))
    }

    /// Whether any user has already stored this file
    pub async fn photo_exists(&self, file_id: &str) -> Result<bool, ServiceError> {
        let photo = self
            .bounded(self.storage.get_photo_by_file_id(file_id))
            .await
            .map_err(|e| {
                error!(file_id, error = %e, "Failed to check photo existence");
                e
            })?;
        Ok(photo.is_some())
    }

    async fn owner(&self, external_id: i64) -> Result<User, ServiceError> {
        let user = self
            .bounded(self.storage.get_user_by_external_id(external_id))
            .await
            .map_err(|e| {
                error!(user_id = external_id, error = %e, "Failed to get user");
                e
            })?;

        user.ok_or_else(|| {
            warn!(user_id = external_id, "User not found");
            ServiceError::NotFound(format!("user {external_id}"))
        })
    }

    /// Save a photo without description
    pub async fn upload_photo(&self, external_id: i64, photo: &UploadedPhoto) -> Result<SaveOutcome, ServiceError> {
        self.save(external_id, photo, String::new(), Vec::new()).await
    }

    /// Save a photo with a description; tags must already be validated
    pub async fn save_photo_with_description(
        &self,
        external_id: i64,
        photo: &UploadedPhoto,
        description: &str,
        tags: &[String],
    ) -> Result<SaveOutcome, ServiceError> {
        self.save(external_id, photo, sanitize(description), tags.to_vec())
            .await
    }

    async fn save(
        &self,
        external_id: i64,
        photo: &UploadedPhoto,
        description: String,
        tags: Vec<String>,
    ) -> Result<SaveOutcome, ServiceError> {
        self.validator.validate_file_size(photo.file_size)?;

        let existing = self
            .bounded(self.storage.get_photo_by_file_id(&photo.file_id))
            .await
            .map_err(|e| {
                error!(user_id = external_id, file_id = %photo.file_id, error = %e, "Failed to check existing photo");
                e
            })?;
        if let Some(existing) = existing {
            info!(user_id = external_id, file_id = %photo.file_id, "Photo already exists");
            return Ok(SaveOutcome::AlreadyExists(existing));
        }

        let owner = self.owner(external_id).await?;
        let tags_count = tags.len();

        let created = self
            .bounded(self.storage.create_photo(NewPhoto {
                owner_id: owner.id,
                file_id: photo.file_id.clone(),
                file_size: photo.file_size,
                width: photo.width,
                height: photo.height,
                description,
                tags,
            }))
            .await
            .map_err(|e| {
                error!(user_id = external_id, file_id = %photo.file_id, error = %e, "Failed to create photo");
                e
            })?;

        info!(
            user_id = external_id,
            photo_id = created.id,
            tags_count,
            "Photo saved"
        );
        Ok(SaveOutcome::Created(created))
    }

    /// Replace the description and tags of an already stored photo
    pub async fn add_description(&self, photo_id: i64, description: &str) -> Result<(), ServiceError> {
        let tags = self.validator.validate_and_parse_tags(description).map_err(|e| {
            warn!(photo_id, error = %e, "Invalid description or tags");
            e
        })?;
        let tags_count = tags.len();

        self.bounded(
            self.storage
                .update_photo_description(photo_id, sanitize(description), tags),
        )
        .await
        .map_err(|e| {
            error!(photo_id, error = %e, "Failed to update photo description");
            match e {
                StorageError::NotFound(what) => ServiceError::NotFound(what),
                other => ServiceError::Storage(other),
            }
        })?;

        info!(photo_id, tags_count, "Photo description updated");
        Ok(())
    }

    /// Photos of the user tagged with `tag`, newest first
    pub async fn search_by_tag(&self, external_id: i64, tag: &str) -> Result<Vec<Photo>, ServiceError> {
        let tag = sanitize(tag);
        if let Err(e) = self.validator.validate_tag(&tag) {
            warn!(user_id = external_id, tag = %tag, error = %e, "Invalid search tag");
            return Err(e.into());
        }

        let owner = self.owner(external_id).await?;

        let photos = self
            .bounded(self.storage.search_photos_by_tag(owner.id, &tag))
            .await
            .map_err(|e| {
                error!(user_id = external_id, tag = %tag, error = %e, "Failed to search photos by tag");
                e
            })?;

        info!(user_id = external_id, tag = %tag, results_count = photos.len(), "Photos searched by tag");
        Ok(photos)
    }
}
