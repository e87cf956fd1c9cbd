//! Persistent records shared by the storage backends and the flows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered bot user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Storage identifier
    pub id: i64,
    /// Chat platform user ID
    pub external_id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// User to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub external_id: i64,
    pub username: String,
}

/// A stored photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Photo {
    /// Storage identifier
    pub id: i64,
    /// Owning user's storage identifier
    pub owner_id: i64,
    /// Chat platform file identifier
    pub file_id: String,
    /// File size in bytes
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    /// Free-text description, empty when the photo was saved without one
    pub description: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Photo to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhoto {
    pub owner_id: i64,
    pub file_id: String,
    pub file_size: i64,
    pub width: i32,
    pub height: i32,
    pub description: String,
    pub tags: Vec<String>,
}
