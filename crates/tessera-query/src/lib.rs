//! # tessera-query
//!
//! Native query document model for the Tessera data platform.
//!
//! Both the policy query DSL (`@`-prefixed operators) and the native query
//! grammar (`$`-prefixed operators) share one tree shape: keys mapped to a
//! literal operand, a nested constraint, or a logical group of sub-queries.
//! This crate models that shape as [`Query`] / [`QueryNode`] so the
//! access-control layer can pattern-match on it instead of inspecting raw JSON.
//!
//! ## Modules
//!
//! - [`node`] - The query tree and its JSON conversion
//! - [`operator`] - Logical operators and operator-key helpers
//! - [`error`] - Query construction errors

pub mod error;
pub mod node;
pub mod operator;

pub use error::{QueryError, json_type_name};
pub use node::{Query, QueryNode};
pub use operator::{
    LogicalOperator, NATIVE_SIGIL, POLICY_SIGIL, is_operator_key, normalize_key, operator_name,
};

/// Type alias for query construction results.
pub type QueryResult<T> = Result<T, QueryError>;
