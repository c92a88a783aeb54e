use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tessera_storage::{PEOPLE_COLLECTION, PeopleStorage, PersonRecord, StorageError};

/// Key: (app id, auth id).
type AuthKey = (String, String);

/// In-memory `people` collection indexed by the linked auth id.
#[derive(Debug, Default)]
pub struct InMemoryPeopleStorage {
    people: DashMap<AuthKey, PersonRecord>,
}

impl InMemoryPeopleStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored people.
    pub fn len(&self) -> usize {
        self.people.len()
    }

    /// Returns `true` if no people are stored.
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }
}

#[async_trait]
impl PeopleStorage for InMemoryPeopleStorage {
    async fn find_by_auth_id(
        &self,
        app_id: &str,
        auth_id: &str,
    ) -> Result<Option<PersonRecord>, StorageError> {
        let key = (app_id.to_string(), auth_id.to_string());
        Ok(self.people.get(&key).map(|entry| entry.value().clone()))
    }

    async fn create(&self, person: PersonRecord) -> Result<PersonRecord, StorageError> {
        if person.id.is_empty() || person.auth_id.is_empty() {
            return Err(StorageError::invalid_record("person id and authId are required"));
        }

        let key = (person.app_id.clone(), person.auth_id.clone());
        match self.people.entry(key) {
            Entry::Occupied(_) => {
                Err(StorageError::already_exists(PEOPLE_COLLECTION, &person.id))
            }
            Entry::Vacant(slot) => {
                tracing::debug!(app_id = %person.app_id, id = %person.id, "Person created");
                slot.insert(person.clone());
                Ok(person)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_is_scoped_to_app() {
        let storage = InMemoryPeopleStorage::new();
        storage
            .create(PersonRecord::new("p-1", "app-1", "u1"))
            .await
            .unwrap();
        storage
            .create(PersonRecord::new("p-2", "app-2", "u1"))
            .await
            .unwrap();

        let found = storage.find_by_auth_id("app-1", "u1").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some("p-1".to_string()));

        let found = storage.find_by_auth_id("app-2", "u1").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some("p-2".to_string()));

        assert!(storage.find_by_auth_id("app-3", "u1").await.unwrap().is_none());
        assert_eq!(storage.len(), 2);
    }

    #[tokio::test]
    async fn test_one_person_per_auth_id() {
        let storage = InMemoryPeopleStorage::new();
        storage
            .create(PersonRecord::new("p-1", "app-1", "u1"))
            .await
            .unwrap();

        let err = storage
            .create(PersonRecord::new("p-9", "app-1", "u1"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_invalid_person_rejected() {
        let storage = InMemoryPeopleStorage::new();
        let err = storage
            .create(PersonRecord::new("p-1", "app-1", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
        assert!(storage.is_empty());
    }
}
