//! Policy storage trait.
//!
//! Defines the interface for policy persistence. Implementations are
//! provided by storage backends (see `tessera-db-memory`).

use std::sync::Arc;

use async_trait::async_trait;
use tessera_storage::StorageResult;

use crate::resources::Policy;

/// Storage operations for [`Policy`] resources.
///
/// # Example
///
/// ```ignore
/// use tessera_policy::storage::PolicyStorage;
///
/// async fn example(storage: &impl PolicyStorage) {
///     let policies = storage.list_active("app-1").await?;
///     for policy in policies {
///         println!("Policy: {} (priority: {})", policy.name, policy.priority);
///     }
/// }
/// ```
#[async_trait]
pub trait PolicyStorage: Send + Sync {
    /// Get a policy by its ID.
    ///
    /// Returns `None` if the policy doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn get(&self, id: &str) -> StorageResult<Option<Policy>>;

    /// List the active policies of an app.
    ///
    /// Results are sorted by priority (ascending - lower priority evaluated
    /// first).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list_active(&self, app_id: &str) -> StorageResult<Vec<Policy>>;

    /// Create or replace a policy.
    ///
    /// The policy is validated before it is stored. An ID is generated if
    /// the policy has none.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the storage operation fails.
    async fn upsert(&self, policy: Policy) -> StorageResult<Policy>;

    /// Delete a policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy doesn't exist or the storage operation
    /// fails.
    async fn delete(&self, id: &str) -> StorageResult<()>;
}

/// Type alias for a shared policy storage trait object.
pub type DynPolicyStorage = Arc<dyn PolicyStorage>;
