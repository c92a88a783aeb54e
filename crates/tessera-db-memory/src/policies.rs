use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tessera_policy::{Policy, PolicyStorage};
use tessera_storage::{StorageError, StorageResult};

const POLICIES_COLLECTION: &str = "policies";

/// In-memory policy store keyed by policy id.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStorage {
    policies: DashMap<String, Policy>,
}

impl InMemoryPolicyStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored policies, active or not.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if no policies are stored.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[async_trait]
impl PolicyStorage for InMemoryPolicyStorage {
    async fn get(&self, id: &str) -> StorageResult<Option<Policy>> {
        Ok(self.policies.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_active(&self, app_id: &str) -> StorageResult<Vec<Policy>> {
        let mut policies: Vec<Policy> = self
            .policies
            .iter()
            .filter(|entry| entry.active && entry.app_id == app_id)
            .map(|entry| entry.value().clone())
            .collect();

        // Ties keep a stable order so enforcement is deterministic.
        policies.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(policies)
    }

    async fn upsert(&self, mut policy: Policy) -> StorageResult<Policy> {
        policy
            .validate()
            .map_err(|e| StorageError::invalid_record(e.to_string()))?;

        if policy.id.is_empty() {
            policy.id = uuid::Uuid::new_v4().to_string();
        }

        tracing::debug!(
            id = %policy.id,
            app_id = %policy.app_id,
            priority = policy.priority,
            "Policy stored"
        );
        self.policies.insert(policy.id.clone(), policy.clone());
        Ok(policy)
    }

    async fn delete(&self, id: &str) -> StorageResult<()> {
        self.policies
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(POLICIES_COLLECTION, id))
    }
}
