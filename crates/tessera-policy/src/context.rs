//! Request context shared between the accumulator and the merge engine.
//!
//! The request-handling layer builds a [`RequestContext`] for every incoming
//! request and the policy-matching layer supplies the ordered
//! [`MatchedPolicy`] list. The access-control layer then fills
//! `access_control_query` / `access_control_projection` and finally narrows
//! `body.query`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_query::Query;

use crate::PolicyResult;
use crate::environment::EnvBindings;
use crate::resources::{Condition, Projection};

// =============================================================================
// Request Context
// =============================================================================

/// Per-request state the access-control layer reads and writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Authenticated principal, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_user: Option<AuthUser>,

    /// Tenant (app) the request is addressed to.
    pub auth_app: String,

    /// Request body.
    #[serde(default)]
    pub body: RequestBody,

    /// Query accumulated from the matched policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control_query: Option<Query>,

    /// Projection accumulated from the matched policies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_control_projection: Option<Projection>,
}

impl RequestContext {
    /// Creates a context for an app with no principal and no caller query.
    #[must_use]
    pub fn new(auth_app: impl Into<String>) -> Self {
        Self {
            auth_app: auth_app.into(),
            ..Default::default()
        }
    }

    /// Sets the authenticated principal.
    #[must_use]
    pub fn with_user(mut self, user: AuthUser) -> Self {
        self.auth_user = Some(user);
        self
    }

    /// Sets the caller-supplied query.
    #[must_use]
    pub fn with_query(mut self, query: Query) -> Self {
        self.body.query = Some(query);
        self
    }

    /// Sets the caller-supplied query from the raw request body value.
    ///
    /// `null` means the caller sent no query.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidQuery`](crate::error::PolicyError::InvalidQuery)
    /// if `value` is not a well-formed query document.
    pub fn with_raw_query(mut self, value: Value) -> PolicyResult<Self> {
        self.body.query = match value {
            Value::Null => None,
            value => Some(Query::try_from(value)?),
        };
        Ok(self)
    }

    /// The authenticated user's id, if any.
    #[must_use]
    pub fn auth_user_id(&self) -> Option<&str> {
        self.auth_user.as_ref().map(|u| u.id.as_str())
    }
}

/// Authenticated principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    /// User id issued by the authentication layer.
    pub id: String,

    /// Token claims and user attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Value>,
}

impl AuthUser {
    /// Creates a principal with no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }
}

/// The part of the request body the access-control layer touches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBody {
    /// Caller-supplied query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
}

// =============================================================================
// Matched Policies
// =============================================================================

/// A policy whose selection matched the current principal, reduced to the
/// rules that apply to the current endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchedPolicy {
    /// Policy name (used in logs and errors).
    pub name: String,

    /// Environment bindings shared by every rule of the policy.
    #[serde(default)]
    pub env: EnvBindings,

    /// Rules in declaration order.
    #[serde(default)]
    pub rules: Vec<QueryRule>,
}

impl MatchedPolicy {
    /// Creates a policy with no rules.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: QueryRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// A single query rule, still in the policy query DSL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRule {
    /// Policy query fragment.
    #[serde(default)]
    pub query: Value,

    /// Rule-level environment bindings.
    #[serde(default)]
    pub env: EnvBindings,

    /// Gates that must all hold for the rule to apply.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Field projection contributed by the rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Projection>,
}

impl QueryRule {
    /// Creates a rule from a policy query fragment.
    #[must_use]
    pub fn new(query: Value) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    /// Sets the rule's environment bindings.
    #[must_use]
    pub fn with_env(mut self, env: EnvBindings) -> Self {
        self.env = env;
        self
    }

    /// Adds a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets the rule's projection.
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use serde_json::json;

    #[test]
    fn test_raw_query_is_parsed() {
        let ctx = RequestContext::new("app-1")
            .with_raw_query(json!({"status": "active", "@or": [{"a": 1}]}))
            .unwrap();
        assert_eq!(
            ctx.body.query.unwrap().to_value(),
            json!({"status": "active", "$or": [{"a": 1}]})
        );

        let ctx = RequestContext::new("app-1").with_raw_query(Value::Null).unwrap();
        assert!(ctx.body.query.is_none());
    }

    #[test]
    fn test_malformed_raw_query_is_invalid() {
        let err = RequestContext::new("app-1")
            .with_raw_query(json!({"$or": {"a": 1}}))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidQuery(_)));
        assert_eq!(err.error_code(), "invalid-query");

        let err = RequestContext::new("app-1")
            .with_raw_query(json!(["status"]))
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidQuery(_)));
    }
}
