use super::{Storage, StorageError};
use crate::model::{NewPhoto, NewUser, Photo, User};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    photos: Vec<Photo>,
    next_user_id: i64,
    next_photo_id: i64,
}

/// In-process storage backend for local runs and tests
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn photo_count(&self) -> usize {
        self.tables.read().photos.len()
    }

    /// All stored photos in insertion order
    pub fn photos(&self) -> Vec<Photo> {
        self.tables.read().photos.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_user(&self, user: NewUser) -> Result<User, StorageError> {
        let mut tables = self.tables.write();
        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            external_id: user.external_id,
            username: user.username,
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_external_id(&self, external_id: i64) -> Result<Option<User>, StorageError> {
        Ok(self
            .tables
            .read()
            .users
            .iter()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn create_photo(&self, photo: NewPhoto) -> Result<Photo, StorageError> {
        let mut tables = self.tables.write();
        tables.next_photo_id += 1;
        let photo = Photo {
            id: tables.next_photo_id,
            owner_id: photo.owner_id,
            file_id: photo.file_id,
            file_size: photo.file_size,
            width: photo.width,
            height: photo.height,
            description: photo.description,
            tags: photo.tags,
            created_at: Utc::now(),
        };
        tables.photos.push(photo.clone());
        Ok(photo)
    }

    async fn get_photo_by_file_id(&self, file_id: &str) -> Result<Option<Photo>, StorageError> {
        Ok(self
            .tables
            .read()
            .photos
            .iter()
            .find(|p| p.file_id == file_id)
            .cloned())
    }

    async fn update_photo_description(
        &self,
        photo_id: i64,
        description: String,
        tags: Vec<String>,
    ) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let photo = tables
            .photos
            .iter_mut()
            .find(|p| p.id == photo_id)
            .ok_or_else(|| StorageError::NotFound(format!("photo with id {photo_id}")))?;
        photo.description = description;
        photo.tags = tags;
        Ok(())
    }

    async fn search_photos_by_tag(&self, owner_id: i64, tag: &str) -> Result<Vec<Photo>, StorageError> {
        let tables = self.tables.read();
        // Insertion order is creation order; ids break ties on equal timestamps
        let mut photos: Vec<Photo> = tables
            .photos
            .iter()
            .filter(|p| p.owner_id == owner_id && p.tags.iter().any(|t| t == tag))
            .cloned()
            .collect();
        photos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(photos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_photo(owner_id: i64, file_id: &str, tags: &[&str]) -> NewPhoto {
        NewPhoto {
            owner_id,
            file_id: file_id.to_string(),
            file_size: 1000,
            width: 800,
            height: 600,
            description: tags.join(" "),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_user_lookup() {
        let storage = MemoryStorage::new();
        assert!(storage.get_user_by_external_id(42).await.unwrap().is_none());

        let user = storage
            .create_user(NewUser {
                external_id: 42,
                username: "alice".to_string(),
            })
            .await
            .unwrap();

        let found = storage.get_user_by_external_id(42).await.unwrap().unwrap();
        assert_eq!(found, user);
    }

    #[tokio::test]
    async fn test_search_is_owner_scoped_and_newest_first() {
        let storage = MemoryStorage::new();
        storage.create_photo(new_photo(1, "a", &["sunset"])).await.unwrap();
        storage.create_photo(new_photo(2, "b", &["sunset"])).await.unwrap();
        storage.create_photo(new_photo(1, "c", &["sunset", "sea"])).await.unwrap();
        storage.create_photo(new_photo(1, "d", &["sea"])).await.unwrap();

        let found = storage.search_photos_by_tag(1, "sunset").await.unwrap();
        let ids: Vec<_> = found.iter().map(|p| p.file_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_update_missing_photo() {
        let storage = MemoryStorage::new();
        let err = storage
            .update_photo_description(7, "x".to_string(), vec!["x".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
