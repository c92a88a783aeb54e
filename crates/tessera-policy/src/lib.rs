//! # tessera-policy
//!
//! Access-control policy evaluation and query merging for the Tessera data
//! platform.
//!
//! This crate provides:
//! - An operator evaluator for policy conditions
//! - Request-scoped environment resolution (`env.personId`, `env.authUserId`)
//! - Translation of the `@`-prefixed policy query DSL into native queries
//! - Accumulation of every matched policy into one access-control query
//! - Merging of that query into the caller's query with conflict detection
//!
//! ## Overview
//!
//! For each request the policy-matching layer supplies the matched policies
//! in priority order. [`AccessControlEngine::enforce`] accumulates them into
//! `RequestContext::access_control_query` and narrows the caller's query so
//! it never reaches data outside what the policies allow.
//!
//! ## Modules
//!
//! - [`operators`] - Comparison operator evaluation
//! - [`environment`] - Environment map and reference resolution
//! - [`translate`] - Policy query DSL to native query translation
//! - [`accumulate`] - Folding matched policies into one query
//! - [`merge`] - Merging the access-control query into the caller's query
//! - [`engine`] - End-to-end enforcement
//! - [`resources`] - Policy resource definitions
//! - [`cache`] - Per-app policy cache
//! - [`storage`] - Policy storage trait
//! - [`config`] - Access-control configuration
//! - [`http`] - HTTP error responses

pub mod accumulate;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod environment;
pub mod error;
pub mod http;
pub mod merge;
pub mod operators;
pub mod resources;
pub mod storage;
pub mod translate;

pub use accumulate::{AccumulationReport, PolicyAccumulator, RuleRef, SkipReason, SkippedRule};
pub use cache::{PolicyCache, PolicyCacheStats};
pub use config::{
    AccessControlConfig, ConflictMode, PolicyCacheConfig, RuleErrorMode, UnresolvedEnvMode,
};
pub use context::{AuthUser, MatchedPolicy, QueryRule, RequestBody, RequestContext};
pub use engine::{AccessControlEngine, Enforcement};
pub use environment::{EnvBindings, Environment, EnvironmentResolver};
pub use error::{ErrorCategory, PolicyError, TranslateError};
pub use merge::{ConflictLocation, MergeConflict, MergeOutcome, merge_into_request_query};
pub use operators::{ComparisonOperator, evaluate};
pub use resources::{Condition, Endpoint, Policy, Projection, RuleSet, ValidationError};
pub use storage::{DynPolicyStorage, PolicyStorage};
pub use translate::{translate, translate_query};

/// Type alias for access-control results.
pub type PolicyResult<T> = Result<T, PolicyError>;
