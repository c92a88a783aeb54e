//! In-memory storage backend for the Tessera data platform.
//!
//! This crate provides in-memory implementations of the storage traits the
//! access-control layer depends on, using `dashmap` for concurrent access.
//! It is meant for tests, local development and single-node deployments.
//!
//! # Example
//!
//! ```ignore
//! use tessera_db_memory::{InMemoryPeopleStorage, InMemoryPolicyStorage};
//! use tessera_policy::{AccessControlConfig, AccessControlEngine, EnvironmentResolver};
//!
//! let people = InMemoryPeopleStorage::shared();
//! let engine = AccessControlEngine::new(
//!     EnvironmentResolver::new(people.clone()),
//!     AccessControlConfig::default(),
//! );
//! ```

pub mod people;
pub mod policies;

pub use people::InMemoryPeopleStorage;
pub use policies::InMemoryPolicyStorage;
