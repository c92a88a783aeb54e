//! Access-control error types.
//!
//! This module defines the errors raised while translating policy queries,
//! resolving environment references and merging the access-control query
//! into a caller's query.

use std::fmt;

use tessera_query::QueryError;
use tessera_storage::StorageError;

use crate::merge::MergeConflict;

// =============================================================================
// Translation Errors
// =============================================================================

/// Errors raised while translating a policy query fragment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    /// The key uses an operator sigil but names no known operator.
    #[error("Unknown operator '{key}'")]
    UnknownOperator {
        /// The key as written in the policy.
        key: String,
    },

    /// A field key holds an array; only logical operators may.
    #[error("Array value under '{key}' is not a logical operator")]
    UnsupportedArrayClause {
        /// The offending field key.
        key: String,
    },

    /// A comparison operator appears with a literal operand but no enclosing field.
    #[error("Operator '{key}' is not attached to a field")]
    OperatorWithoutField {
        /// The operator key.
        key: String,
    },

    /// An operator was given a logical group as its operand.
    #[error("Operator '{key}' cannot take a logical group as operand")]
    InvalidOperand {
        /// The operator key.
        key: String,
    },

    /// The fragment is not a well-formed query document.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl TranslateError {
    /// Creates a new `UnknownOperator` error.
    #[must_use]
    pub fn unknown_operator(key: impl Into<String>) -> Self {
        Self::UnknownOperator { key: key.into() }
    }

    /// Creates a new `UnsupportedArrayClause` error.
    #[must_use]
    pub fn unsupported_array(key: impl Into<String>) -> Self {
        Self::UnsupportedArrayClause { key: key.into() }
    }
}

// =============================================================================
// Policy Errors
// =============================================================================

/// Errors that can occur while producing or applying the access-control query.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// A policy's query could not be translated.
    #[error("Policy '{policy}' could not be translated: {source}")]
    Translation {
        /// Name of the policy whose rule failed.
        policy: String,
        /// The underlying translation failure.
        #[source]
        source: TranslateError,
    },

    /// The identity linkage needed by an environment reference is broken.
    #[error(
        "Environment resolution failed for user '{auth_user_id}' in app '{app_id}': {message}"
    )]
    EnvironmentResolution {
        /// The app (tenant) being evaluated.
        app_id: String,
        /// The authenticated user whose linkage failed.
        auth_user_id: String,
        /// Description of the failure.
        message: String,
    },

    /// An environment reference resolved to nothing and the configuration
    /// does not allow a `null` substitute.
    #[error("Unresolved environment reference '{reference}'")]
    UnresolvedEnvironment {
        /// The reference as written in the policy.
        reference: String,
    },

    /// The caller's query contradicts the access-control query.
    #[error("Caller query conflicts with access policy on: {}", conflict_fields(.conflicts))]
    PolicyConflict {
        /// Every conflict detected during the merge.
        conflicts: Vec<MergeConflict>,
    },

    /// The caller's query is not a well-formed query document.
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// The access-control query holds an array under a non-logical key.
    #[error("Invalid access-control clause '{key}': arrays are only allowed under logical operators")]
    InvalidClause {
        /// The offending key.
        key: String,
    },

    /// A storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The access-control configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

fn conflict_fields(conflicts: &[MergeConflict]) -> String {
    conflicts
        .iter()
        .map(|c| c.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl PolicyError {
    /// Creates a new `Translation` error.
    #[must_use]
    pub fn translation(policy: impl Into<String>, source: TranslateError) -> Self {
        Self::Translation {
            policy: policy.into(),
            source,
        }
    }

    /// Creates a new `EnvironmentResolution` error.
    #[must_use]
    pub fn environment_resolution(
        app_id: impl Into<String>,
        auth_user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::EnvironmentResolution {
            app_id: app_id.into(),
            auth_user_id: auth_user_id.into(),
            message: message.into(),
        }
    }

    /// Creates a new `PolicyConflict` error.
    #[must_use]
    pub fn conflict(conflicts: Vec<MergeConflict>) -> Self {
        Self::PolicyConflict { conflicts }
    }

    /// Creates a new `InvalidClause` error.
    #[must_use]
    pub fn invalid_clause(key: impl Into<String>) -> Self {
        Self::InvalidClause { key: key.into() }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns the conflicts carried by a `PolicyConflict` error.
    #[must_use]
    pub fn conflicts(&self) -> Option<&[MergeConflict]> {
        match self {
            Self::PolicyConflict { conflicts } => Some(conflicts),
            _ => None,
        }
    }

    /// Returns `true` if the request should be refused as a client error.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Authorization | ErrorCategory::Policy | ErrorCategory::Validation
        )
    }

    /// Returns `true` if this is a server-side error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Translation { .. } => ErrorCategory::Policy,
            Self::EnvironmentResolution { .. } => ErrorCategory::Authorization,
            Self::UnresolvedEnvironment { .. } => ErrorCategory::Authorization,
            Self::PolicyConflict { .. } => ErrorCategory::Authorization,
            Self::InvalidQuery(_) => ErrorCategory::Validation,
            Self::InvalidClause { .. } => ErrorCategory::Policy,
            Self::Storage(_) => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns a stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Translation { .. } => "policy-translation",
            Self::EnvironmentResolution { .. } => "environment-resolution",
            Self::UnresolvedEnvironment { .. } => "unresolved-environment",
            Self::PolicyConflict { .. } => "policy-conflict",
            Self::InvalidQuery(_) => "invalid-query",
            Self::InvalidClause { .. } => "invalid-clause",
            Self::Storage(_) => "storage",
            Self::Configuration { .. } => "configuration",
        }
    }
}

/// Categories of access-control errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request was refused by access control.
    Authorization,
    /// A policy definition is malformed.
    Policy,
    /// The caller's request is malformed.
    Validation,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorization => write!(f, "authorization"),
            Self::Policy => write!(f, "policy"),
            Self::Validation => write!(f, "validation"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ConflictLocation;
    use serde_json::json;
    use tessera_query::QueryNode;

    fn conflict(field: &str) -> MergeConflict {
        MergeConflict {
            field: field.to_string(),
            location: ConflictLocation::TopLevel,
            requested: QueryNode::Literal(json!("closed")),
            enforced: QueryNode::Literal(json!("active")),
            overridden: false,
        }
    }

    #[test]
    fn test_error_display() {
        let err = PolicyError::translation("owners", TranslateError::unknown_operator("@foo"));
        assert_eq!(
            err.to_string(),
            "Policy 'owners' could not be translated: Unknown operator '@foo'"
        );

        let err = PolicyError::conflict(vec![conflict("status"), conflict("region")]);
        assert_eq!(
            err.to_string(),
            "Caller query conflicts with access policy on: status, region"
        );

        let err = PolicyError::environment_resolution("app-1", "u1", "no person linked");
        assert_eq!(
            err.to_string(),
            "Environment resolution failed for user 'u1' in app 'app-1': no person linked"
        );
    }

    #[test]
    fn test_error_predicates() {
        let err = PolicyError::conflict(vec![conflict("status")]);
        assert!(err.is_client_error());
        assert_eq!(err.conflicts().map(<[MergeConflict]>::len), Some(1));

        let err = PolicyError::Storage(StorageError::connection_error("down"));
        assert!(err.is_server_error());
        assert!(err.conflicts().is_none());

        let err = PolicyError::configuration("bad ttl");
        assert!(err.is_server_error());
    }

    #[test]
    fn test_error_category_and_code() {
        assert_eq!(
            PolicyError::conflict(vec![]).category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            PolicyError::invalid_clause("tags").category(),
            ErrorCategory::Policy
        );
        assert_eq!(
            PolicyError::InvalidQuery(QueryError::invalid_logical_group("$or")).category(),
            ErrorCategory::Validation
        );
        assert_eq!(PolicyError::conflict(vec![]).error_code(), "policy-conflict");
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
