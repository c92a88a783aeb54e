//! Policy resource definitions.
//!
//! A [`Policy`] belongs to an app and carries an ordered list of rule-sets.
//! Each [`RuleSet`] lists the endpoints it applies to, the environment
//! bindings and conditions it needs, the projection it contributes and the
//! access rule itself, written in the policy query DSL.
//!
//! # Example
//!
//! ```ignore
//! use tessera_policy::resources::{Endpoint, Policy, RuleSet};
//!
//! let policy = Policy {
//!     id: "own-documents".to_string(),
//!     app_id: "app-1".to_string(),
//!     name: "Own documents".to_string(),
//!     config: vec![RuleSet {
//!         endpoints: vec![Endpoint::new("GET", "/documents/**")],
//!         query: json!({"@eq": {"ownerId": "env.personId"}}),
//!         ..Default::default()
//!     }],
//!     ..Default::default()
//! };
//!
//! policy.validate()?;
//! let matched = policy.matched_for("GET", "/documents/42");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PolicyResult;
use crate::context::{MatchedPolicy, QueryRule};
use crate::environment::{EnvBindings, Environment, EnvironmentResolver};
use crate::error::TranslateError;
use crate::operators::{self, ComparisonOperator};
use crate::translate::translate;

// =============================================================================
// Policy Resource
// =============================================================================

/// An app-scoped access policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique identifier.
    #[serde(default)]
    pub id: String,

    /// App (tenant) the policy belongs to.
    pub app_id: String,

    /// Human-readable policy name.
    pub name: String,

    /// Detailed description of the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the policy is active.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Evaluation order (lower = evaluated first, range: 0-1000).
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Predicate matched against the principal's attributes. Interpreted by
    /// the policy-matching layer.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub selection: Value,

    /// Rule-sets in evaluation order.
    #[serde(default)]
    pub config: Vec<RuleSet>,
}

fn default_active() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            id: String::new(),
            app_id: String::new(),
            name: String::new(),
            description: None,
            active: true,
            priority: 100,
            selection: Value::Null,
            config: Vec::new(),
        }
    }
}

impl Policy {
    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing, the priority is out
    /// of range, an endpoint or condition is malformed, or a rule's query
    /// does not translate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.app_id.trim().is_empty() {
            return Err(ValidationError::MissingField("appId"));
        }

        if !(0..=1000).contains(&self.priority) {
            return Err(ValidationError::InvalidPriority(self.priority));
        }

        for (index, rule) in self.config.iter().enumerate() {
            for endpoint in &rule.endpoints {
                endpoint.validate()?;
            }
            for condition in &rule.conditions {
                if ComparisonOperator::from_key(&condition.operator).is_none() {
                    return Err(ValidationError::UnknownOperator(condition.operator.clone()));
                }
            }
            translate(&rule.query)
                .map_err(|source| ValidationError::InvalidQuery { rule: index, source })?;
        }

        Ok(())
    }

    /// Reduces the policy to the rules that apply to `verb path`.
    ///
    /// Returns `None` if the policy is inactive or no rule-set applies.
    #[must_use]
    pub fn matched_for(&self, verb: &str, path: &str) -> Option<MatchedPolicy> {
        if !self.active {
            return None;
        }

        let rules: Vec<QueryRule> = self
            .config
            .iter()
            .filter(|rule| rule.applies_to(verb, path))
            .map(RuleSet::to_query_rule)
            .collect();

        if rules.is_empty() {
            return None;
        }

        Some(MatchedPolicy {
            name: self.name.clone(),
            env: EnvBindings::new(),
            rules,
        })
    }
}

// =============================================================================
// Rule Set
// =============================================================================

/// One entry of a policy's `config` list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    /// Endpoints the rule-set applies to. Empty means every endpoint.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,

    /// Environment bindings.
    #[serde(default)]
    pub env: EnvBindings,

    /// Gates evaluated before the query applies.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Field projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Projection>,

    /// Access rule in the policy query DSL.
    #[serde(default)]
    pub query: Value,
}

impl RuleSet {
    /// Returns `true` if this rule-set applies to `verb path`.
    #[must_use]
    pub fn applies_to(&self, verb: &str, path: &str) -> bool {
        self.endpoints.is_empty() || self.endpoints.iter().any(|e| e.matches(verb, path))
    }

    fn to_query_rule(&self) -> QueryRule {
        QueryRule {
            query: self.query.clone(),
            env: self.env.clone(),
            conditions: self.conditions.clone(),
            projection: self.projection.clone(),
        }
    }
}

// =============================================================================
// Endpoint
// =============================================================================

/// HTTP verbs an endpoint may name.
const VALID_VERBS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "*"];

/// A verb and route pattern.
///
/// Route patterns support:
/// - `*` - matches any characters except `/`
/// - `**` - matches any characters including `/`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// HTTP verb, or `*` for any.
    pub verb: String,

    /// Route pattern.
    pub route: String,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(verb: impl Into<String>, route: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            route: route.into(),
        }
    }

    /// Returns `true` if `verb path` is covered by this endpoint.
    #[must_use]
    pub fn matches(&self, verb: &str, path: &str) -> bool {
        (self.verb == "*" || self.verb.eq_ignore_ascii_case(verb))
            && route_regex(&self.route).is_some_and(|re| re.is_match(path))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let verb = self.verb.to_ascii_uppercase();
        if !VALID_VERBS.contains(&verb.as_str()) {
            return Err(ValidationError::InvalidVerb(self.verb.clone()));
        }
        if !self.route.starts_with('/') || route_regex(&self.route).is_none() {
            return Err(ValidationError::InvalidRoute(self.route.clone()));
        }
        Ok(())
    }
}

fn route_regex(pattern: &str) -> Option<regex::Regex> {
    let body = pattern
        .split("**")
        .map(|part| {
            part.split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join("[^/]*")
        })
        .collect::<Vec<_>>()
        .join(".*");

    regex::Regex::new(&format!("^{body}$")).ok()
}

// =============================================================================
// Condition
// =============================================================================

/// A boolean gate on a rule-set.
///
/// Either operand may be an environment reference (`env.profile.region`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Left operand.
    pub lhs: Value,

    /// Operator key (`@eq`, `$in`, ...).
    pub operator: String,

    /// Right operand.
    pub rhs: Value,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(lhs: Value, operator: impl Into<String>, rhs: Value) -> Self {
        Self {
            lhs,
            operator: operator.into(),
            rhs,
        }
    }

    /// Resolves both operands and evaluates the operator.
    ///
    /// An operand that does not resolve compares as `null`.
    ///
    /// # Errors
    ///
    /// Returns an error if resolving an operand requires a person lookup that
    /// fails.
    pub async fn holds(
        &self,
        resolver: &EnvironmentResolver,
        env: &mut Environment,
        app_id: &str,
    ) -> PolicyResult<bool> {
        let lhs = resolver
            .resolve_value(&self.lhs, env, app_id)
            .await?
            .unwrap_or(Value::Null);
        let rhs = resolver
            .resolve_value(&self.rhs, env, app_id)
            .await?
            .unwrap_or(Value::Null);

        Ok(operators::evaluate(&lhs, &rhs, &self.operator))
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Field include/exclude lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    /// Fields to return. `None` means every field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,

    /// Fields to withhold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl Projection {
    /// Projection that only returns `fields`.
    #[must_use]
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: Some(fields.into_iter().map(Into::into).collect()),
            exclude: Vec::new(),
        }
    }

    /// Projection that withholds `fields`.
    #[must_use]
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include: None,
            exclude: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Combines two projections so the result never exposes more than
    /// either: includes intersect, excludes union.
    #[must_use]
    pub fn narrow(&self, other: &Projection) -> Projection {
        let include = match (&self.include, &other.include) {
            (Some(a), Some(b)) => Some(a.iter().filter(|f| b.contains(f)).cloned().collect()),
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };

        let mut exclude = self.exclude.clone();
        for field in &other.exclude {
            if !exclude.contains(field) {
                exclude.push(field.clone());
            }
        }

        Projection { include, exclude }
    }

    /// Returns `true` if `field` survives the projection.
    #[must_use]
    pub fn allows(&self, field: &str) -> bool {
        !self.exclude.iter().any(|f| f == field)
            && self
                .include
                .as_ref()
                .is_none_or(|fields| fields.iter().any(|f| f == field))
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Errors that can occur during policy validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A required field is missing.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Priority is out of range.
    #[error("Priority must be between 0 and 1000, got {0}")]
    InvalidPriority(i32),

    /// Invalid endpoint verb.
    #[error("Invalid verb: {0} (must be GET, POST, PUT, PATCH, DELETE or *)")]
    InvalidVerb(String),

    /// Invalid endpoint route pattern.
    #[error("Invalid route pattern: {0}")]
    InvalidRoute(String),

    /// Condition uses an operator that does not exist.
    #[error("Unknown condition operator: {0}")]
    UnknownOperator(String),

    /// A rule's query does not translate.
    #[error("Rule {rule} has an invalid query: {source}")]
    InvalidQuery {
        /// Index of the rule-set in `config`.
        rule: usize,
        /// Translation failure.
        #[source]
        source: TranslateError,
    },
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> Policy {
        Policy {
            id: "p1".to_string(),
            app_id: "app-1".to_string(),
            name: "Own documents".to_string(),
            config: vec![
                RuleSet {
                    endpoints: vec![Endpoint::new("GET", "/documents/**")],
                    query: json!({"@eq": {"ownerId": "env.personId"}}),
                    ..Default::default()
                },
                RuleSet {
                    endpoints: vec![Endpoint::new("delete", "/documents/*")],
                    query: json!({"locked": false}),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    // -------------------------------------------------------------------------
    // Validation Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_valid_policy() {
        assert!(policy().validate().is_ok());
    }

    #[test]
    fn test_missing_name() {
        let policy = Policy {
            name: " ".to_string(),
            ..policy()
        };
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::MissingField("name"))
        ));
    }

    #[test]
    fn test_invalid_priority() {
        let policy = Policy {
            priority: 1001,
            ..policy()
        };
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::InvalidPriority(1001))
        ));
    }

    #[test]
    fn test_invalid_endpoint() {
        let mut policy = policy();
        policy.config[0].endpoints.push(Endpoint::new("FETCH", "/documents"));
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::InvalidVerb(_))
        ));

        let mut policy = self::policy();
        policy.config[0].endpoints.push(Endpoint::new("GET", "documents"));
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::InvalidRoute(_))
        ));
    }

    #[test]
    fn test_unknown_condition_operator() {
        let mut policy = policy();
        policy.config[0]
            .conditions
            .push(Condition::new(json!("env.region"), "@near", json!("eu")));
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::UnknownOperator(op)) if op == "@near"
        ));
    }

    #[test]
    fn test_untranslatable_query() {
        let mut policy = policy();
        policy.config[1].query = json!({"tags": ["a"]});
        let err = policy.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidQuery { rule: 1, .. }));
    }

    #[test]
    fn test_deserialize_defaults() {
        let policy: Policy = serde_json::from_value(json!({
            "appId": "app-1",
            "name": "Minimal"
        }))
        .unwrap();

        assert!(policy.active);
        assert_eq!(policy.priority, 100);
        assert!(policy.selection.is_null());
        assert!(policy.config.is_empty());
    }

    // -------------------------------------------------------------------------
    // Matching Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_endpoint_globs() {
        let single = Endpoint::new("GET", "/documents/*");
        assert!(single.matches("GET", "/documents/42"));
        assert!(single.matches("get", "/documents/42"));
        assert!(!single.matches("GET", "/documents/42/comments"));
        assert!(!single.matches("POST", "/documents/42"));

        let deep = Endpoint::new("*", "/documents/**");
        assert!(deep.matches("POST", "/documents/42/comments"));
        assert!(!deep.matches("GET", "/people/1"));

        let literal = Endpoint::new("GET", "/v1.0/items");
        assert!(literal.matches("GET", "/v1.0/items"));
        assert!(!literal.matches("GET", "/v1x0/items"));
    }

    #[test]
    fn test_matched_for_selects_rules() {
        let matched = policy().matched_for("GET", "/documents/7").unwrap();
        assert_eq!(matched.name, "Own documents");
        assert_eq!(matched.rules.len(), 1);
        assert_eq!(
            matched.rules[0].query,
            json!({"@eq": {"ownerId": "env.personId"}})
        );

        let matched = policy().matched_for("DELETE", "/documents/7").unwrap();
        assert_eq!(matched.rules[0].query, json!({"locked": false}));

        assert!(policy().matched_for("POST", "/people").is_none());
    }

    #[test]
    fn test_inactive_policy_never_matches() {
        let policy = Policy {
            active: false,
            ..policy()
        };
        assert!(policy.matched_for("GET", "/documents/7").is_none());
    }

    #[test]
    fn test_rule_without_endpoints_applies_everywhere() {
        let rule = RuleSet::default();
        assert!(rule.applies_to("PATCH", "/anything/at/all"));
    }

    // -------------------------------------------------------------------------
    // Projection Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_projection_narrowing() {
        let a = Projection {
            include: Some(vec!["name".into(), "email".into(), "phone".into()]),
            exclude: vec!["ssn".into()],
        };
        let b = Projection {
            include: Some(vec!["email".into(), "name".into()]),
            exclude: vec!["phone".into(), "ssn".into()],
        };

        let narrowed = a.narrow(&b);
        assert_eq!(
            narrowed.include,
            Some(vec!["name".to_string(), "email".to_string()])
        );
        assert_eq!(narrowed.exclude, vec!["ssn".to_string(), "phone".to_string()]);
        assert!(narrowed.allows("name"));
        assert!(!narrowed.allows("phone"));
        assert!(!narrowed.allows("address"));
    }

    #[test]
    fn test_projection_narrowing_with_open_include() {
        let open = Projection::exclude(["secret"]);
        let closed = Projection::include(["name"]);

        let narrowed = open.narrow(&closed);
        assert_eq!(narrowed.include, Some(vec!["name".to_string()]));
        assert!(!narrowed.allows("secret"));
        assert_eq!(closed.narrow(&open), narrowed);
    }
}
