//! # tessera-storage
//!
//! Storage abstraction layer for the Tessera data platform.
//!
//! This crate defines the traits and types that the access-control layer
//! needs from persistence. It does not contain any implementations - those
//! are provided by separate crates (see `tessera-db-memory`).
//!
//! ## Overview
//!
//! The main trait is [`PeopleStorage`], used to resolve the person record
//! linked to the authenticated user of an app.

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::PeopleStorage;
pub use types::{PEOPLE_COLLECTION, PersonRecord};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared people storage trait object.
pub type DynPeopleStorage = std::sync::Arc<dyn PeopleStorage>;
