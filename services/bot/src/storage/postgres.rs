use super::{Storage, StorageError};
use crate::config::StorageConfig;
use crate::model::{NewPhoto, NewUser, Photo, User};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// PostgreSQL-backed storage for users and photos
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Create a new storage backend with a connection pool
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .context("storage.url is required for the postgres backend")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connected to PostgreSQL database"
        );

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }
}

#[async_trait]
impl Storage for PgStorage {
    #[instrument(skip(self, user), fields(external_id = user.external_id))]
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let created = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (external_id, username, created_at)
            VALUES ($1, $2, NOW())
            RETURNING id, external_id, username, created_at
            "#,
        )
        .bind(user.external_id)
        .bind(&user.username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "db: failed to create user");
            e
        })?;

        debug!(user_id = created.id, "User created");
        Ok(created)
    }

    async fn get_user_by_external_id(&self, external_id: i64) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, external_id, username, created_at
            FROM users
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(external_id, error = %e, "db: failed to get user by external id");
            e
        })?;

        Ok(user)
    }

    #[instrument(skip(self, photo), fields(owner_id = photo.owner_id, file_id = %photo.file_id))]
    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo, StorageError> {
        let created = sqlx::query_as::<_, Photo>(
            r#"
            INSERT INTO photos (
                owner_id, file_id, file_size, width, height,
                description, tags, created_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, NOW()
            )
            RETURNING id, owner_id, file_id, file_size, width, height,
                      description, tags, created_at
            "#,
        )
        .bind(photo.owner_id)
        .bind(&photo.file_id)
        .bind(photo.file_size)
        .bind(photo.width)
        .bind(photo.height)
        .bind(&photo.description)
        .bind(&photo.tags)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "db: failed to create photo");
            e
        })?;

        debug!(photo_id = created.id, tags_count = created.tags.len(), "Photo created");
        Ok(created)
    }

    async fn get_photo_by_file_id(&self, file_id: &str) -> Result<Option<Photo>, StorageError> {
        let photo = sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, owner_id, file_id, file_size, width, height,
                   description, tags, created_at
            FROM photos
            WHERE file_id = $1
            "#,
        )
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(file_id, error = %e, "db: failed to get photo by file id");
            e
        })?;

        Ok(photo)
    }

    #[instrument(skip(self, description, tags))]
    async fn update_photo_description(
        &self,
        photo_id: i64,
        description: String,
        tags: Vec<String>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET description = $1, tags = $2
            WHERE id = $3
            "#,
        )
        .bind(&description)
        .bind(&tags)
        .bind(photo_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(photo_id, "db: photo not found for update");
            return Err(StorageError::NotFound(format!("photo with id {photo_id}")));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn search_photos_by_tag(&self, owner_id: i64, tag: &str) -> Result<Vec<Photo>, StorageError> {
        let photos = sqlx::query_as::<_, Photo>(
            r#"
            SELECT id, owner_id, file_id, file_size, width, height,
                   description, tags, created_at
            FROM photos
            WHERE owner_id = $1 AND tags @> ARRAY[$2]::text[]
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(owner_id)
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "db: failed to search photos by tag");
            e
        })?;

        Ok(photos)
    }
}
