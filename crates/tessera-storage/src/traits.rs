//! Storage traits consumed by the access-control layer.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::PersonRecord;

/// Lookup of person records linked to authenticated users.
///
/// Every lookup is scoped to a single app; a person in one app is never
/// visible from another.
///
/// # Example
///
/// ```ignore
/// use tessera_storage::{PeopleStorage, StorageError};
///
/// async fn person_id(storage: &dyn PeopleStorage, app: &str, user: &str) -> Result<String, StorageError> {
///     storage
///         .find_by_auth_id(app, user)
///         .await?
///         .map(|p| p.id)
///         .ok_or_else(|| StorageError::not_found("people", user))
/// }
/// ```
#[async_trait]
pub trait PeopleStorage: Send + Sync {
    /// Finds the person linked to `auth_id` within `app_id`.
    ///
    /// Returns `None` if no person is linked.
    ///
    /// # Errors
    ///
    /// Returns an error only for infrastructure issues, not for missing records.
    async fn find_by_auth_id(
        &self,
        app_id: &str,
        auth_id: &str,
    ) -> Result<Option<PersonRecord>, StorageError>;

    /// Stores a new person record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if the app already has a person
    /// linked to the same `auth_id`.
    async fn create(&self, person: PersonRecord) -> Result<PersonRecord, StorageError>;
}
