//! Policy query accumulator.
//!
//! Folds the query rules of every matched policy into one access-control
//! query on the request. Policies and their rules are processed strictly in
//! the order given: the caller's ordering (normally priority) decides which
//! rule wins when two rules constrain the same key.
//!
//! Per rule:
//!
//! 1. Layer the policy's and the rule's environment bindings.
//! 2. Evaluate the rule's conditions; all must hold.
//! 3. Translate the rule's query into the native grammar.
//! 4. Substitute environment references.
//! 5. Fold the fragment into the accumulated query: logical groups are
//!    unioned by deep equality, every other key is last-write-wins.
//! 6. Narrow the accumulated projection.

use std::collections::HashMap;

use serde_json::Value;
use tessera_query::{Query, QueryNode};

use crate::PolicyResult;
use crate::config::{AccessControlConfig, RuleErrorMode, UnresolvedEnvMode};
use crate::context::{MatchedPolicy, QueryRule, RequestContext};
use crate::environment::{Environment, EnvironmentResolver, parse_reference};
use crate::error::{PolicyError, TranslateError};
use crate::translate::translate;

// =============================================================================
// Accumulation Report
// =============================================================================

/// What happened to each matched rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulationReport {
    /// Rules whose fragment was folded in.
    pub applied: Vec<RuleRef>,

    /// Rules that contributed nothing.
    pub skipped: Vec<SkippedRule>,
}

impl AccumulationReport {
    /// Returns `true` if no rule was applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Identifies a rule by policy name and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRef {
    /// Policy name.
    pub policy: String,

    /// Index of the rule within the policy.
    pub rule: usize,
}

/// A rule that was not applied, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRule {
    /// Policy name.
    pub policy: String,

    /// Index of the rule within the policy.
    pub rule: usize,

    /// Reason the rule was skipped.
    pub reason: SkipReason,
}

/// Why a rule was skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// At least one condition did not hold.
    ConditionsNotMet,

    /// The rule's query did not translate.
    TranslationFailed(TranslateError),
}

// =============================================================================
// Accumulator
// =============================================================================

/// Builds the access-control query for a request.
#[derive(Clone)]
pub struct PolicyAccumulator {
    resolver: EnvironmentResolver,
    rule_errors: RuleErrorMode,
    unresolved_env: UnresolvedEnvMode,
}

impl PolicyAccumulator {
    /// Creates an accumulator with default error handling.
    #[must_use]
    pub fn new(resolver: EnvironmentResolver) -> Self {
        Self {
            resolver,
            rule_errors: RuleErrorMode::default(),
            unresolved_env: UnresolvedEnvMode::default(),
        }
    }

    /// Creates an accumulator using the error handling from `config`.
    #[must_use]
    pub fn from_config(resolver: EnvironmentResolver, config: &AccessControlConfig) -> Self {
        Self {
            resolver,
            rule_errors: config.rule_errors,
            unresolved_env: config.unresolved_env,
        }
    }

    /// Sets how rule translation failures are handled.
    #[must_use]
    pub fn with_rule_errors(mut self, mode: RuleErrorMode) -> Self {
        self.rule_errors = mode;
        self
    }

    /// Sets what unresolved environment references become.
    #[must_use]
    pub fn with_unresolved_env(mut self, mode: UnresolvedEnvMode) -> Self {
        self.unresolved_env = mode;
        self
    }

    /// Folds every matched policy into `ctx.access_control_query` and
    /// `ctx.access_control_projection`.
    ///
    /// The query is only set once at least one rule applies.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::EnvironmentResolution`] if a person lookup fails.
    /// - [`PolicyError::UnresolvedEnvironment`] if a reference does not
    ///   resolve and the configuration rejects it.
    /// - [`PolicyError::Translation`] if a rule does not translate and the
    ///   configuration aborts on rule errors, or if every rule of a matched
    ///   policy that was not gated out failed to translate.
    pub async fn accumulate(
        &self,
        ctx: &mut RequestContext,
        policies: &[MatchedPolicy],
    ) -> PolicyResult<AccumulationReport> {
        let mut env = Environment::for_user(ctx.auth_user_id());
        let app_id = ctx.auth_app.clone();
        let mut report = AccumulationReport::default();

        for policy in policies {
            env.bind(&policy.env);
            let mut applied = 0usize;
            let mut first_failure: Option<TranslateError> = None;

            for (index, rule) in policy.rules.iter().enumerate() {
                env.bind(&rule.env);

                if !self.conditions_hold(rule, &mut env, &app_id).await? {
                    tracing::debug!(policy = %policy.name, rule = index, "Rule conditions not met");
                    report.skipped.push(SkippedRule {
                        policy: policy.name.clone(),
                        rule: index,
                        reason: SkipReason::ConditionsNotMet,
                    });
                    continue;
                }

                let fragment = match translate(&rule.query) {
                    Ok(fragment) => fragment,
                    Err(e) => match self.rule_errors {
                        RuleErrorMode::Skip => {
                            tracing::warn!(
                                policy = %policy.name,
                                rule = index,
                                error = %e,
                                "Skipping policy rule that does not translate"
                            );
                            first_failure.get_or_insert_with(|| e.clone());
                            report.skipped.push(SkippedRule {
                                policy: policy.name.clone(),
                                rule: index,
                                reason: SkipReason::TranslationFailed(e),
                            });
                            continue;
                        }
                        RuleErrorMode::Abort => {
                            return Err(PolicyError::translation(&policy.name, e));
                        }
                    },
                };

                // Prune before substituting: a reference resolving to null
                // still constrains its field.
                let fragment = match fragment {
                    Some(fragment) => Some(
                        self.substitute(prune_empty(fragment), &mut env, &app_id)
                            .await?,
                    ),
                    None => None,
                };

                let target = ctx.access_control_query.get_or_insert_with(Query::new);
                if let Some(fragment) = fragment {
                    fold_nodes(target, fragment);
                }

                if let Some(projection) = &rule.projection {
                    ctx.access_control_projection = Some(match ctx.access_control_projection.take() {
                        Some(current) => current.narrow(projection),
                        None => projection.clone(),
                    });
                }

                tracing::debug!(policy = %policy.name, rule = index, "Policy rule applied");
                applied += 1;
                report.applied.push(RuleRef {
                    policy: policy.name.clone(),
                    rule: index,
                });
            }

            // A matched policy contributes at least one rule unless its
            // conditions gated every rule out.
            if applied == 0
                && let Some(source) = first_failure
            {
                tracing::error!(
                    policy = %policy.name,
                    error = %source,
                    "Matched policy has no rule that translates"
                );
                return Err(PolicyError::translation(&policy.name, source));
            }
        }

        Ok(report)
    }

    async fn conditions_hold(
        &self,
        rule: &QueryRule,
        env: &mut Environment,
        app_id: &str,
    ) -> PolicyResult<bool> {
        for condition in &rule.conditions {
            if !condition.holds(&self.resolver, env, app_id).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Replaces every environment reference in `fragment` with its value.
    ///
    /// References are collected first and resolved one at a time, since a
    /// lookup may extend `env`.
    async fn substitute(
        &self,
        fragment: Query,
        env: &mut Environment,
        app_id: &str,
    ) -> PolicyResult<Query> {
        let mut references: Vec<String> = Vec::new();
        fragment.visit_literals(&mut |value| collect_references(value, &mut references));

        if references.is_empty() {
            return Ok(fragment);
        }

        let mut resolved: HashMap<String, Value> = HashMap::with_capacity(references.len());
        for reference in references {
            let value = match self.resolver.resolve(&reference, env, app_id).await? {
                Some(value) => value,
                None => match self.unresolved_env {
                    UnresolvedEnvMode::Null => {
                        tracing::warn!(reference = %reference, "Unresolved environment reference replaced with null");
                        Value::Null
                    }
                    UnresolvedEnvMode::Reject => {
                        return Err(PolicyError::UnresolvedEnvironment { reference });
                    }
                },
            };
            resolved.insert(reference, value);
        }

        Ok(fragment.map_literals(&mut |value| replace_references(value, &resolved)))
    }
}

/// Collects the distinct references in a literal, including those inside
/// array operands (`{"$in": ["env.authUserId", "system"]}`).
fn collect_references(value: &Value, references: &mut Vec<String>) {
    match value {
        Value::String(expression) if parse_reference(expression).is_some() => {
            if !references.contains(expression) {
                references.push(expression.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, references);
            }
        }
        _ => {}
    }
}

fn replace_references(value: Value, resolved: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(expression) => match resolved.get(&expression) {
            Some(replacement) => replacement.clone(),
            None => Value::String(expression),
        },
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| replace_references(item, resolved))
                .collect(),
        ),
        other => other,
    }
}

/// Folds `fragment` into `target`.
///
/// Empty nodes are skipped. Two logical groups under the same key are
/// unioned, appending only children not already present; any other key is
/// overwritten.
pub fn fold(target: &mut Query, fragment: Query) {
    fold_nodes(target, prune_empty(fragment));
}

fn prune_empty(fragment: Query) -> Query {
    fragment
        .into_iter()
        .filter(|(_, node)| !node.is_empty())
        .collect()
}

fn fold_nodes(target: &mut Query, fragment: Query) {
    for (key, node) in fragment {
        match node {
            QueryNode::Group(op, incoming) => {
                if let Some(existing) = target.group_mut(op) {
                    for child in incoming {
                        if !existing.contains(&child) {
                            existing.push(child);
                        }
                    }
                } else {
                    target.insert_group(op, incoming);
                }
            }
            node => {
                target.insert(key, node);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthUser;
    use crate::environment::{EnvBindings, PERSON_ID_SENTINEL};
    use crate::resources::{Condition, Projection};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_query::LogicalOperator;
    use tessera_storage::{PeopleStorage, PersonRecord, StorageError};

    // -------------------------------------------------------------------------
    // Mock Storage
    // -------------------------------------------------------------------------

    #[derive(Default)]
    struct MockPeople {
        people: Vec<PersonRecord>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PeopleStorage for MockPeople {
        async fn find_by_auth_id(
            &self,
            app_id: &str,
            auth_id: &str,
        ) -> Result<Option<PersonRecord>, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .people
                .iter()
                .find(|p| p.app_id == app_id && p.auth_id == auth_id)
                .cloned())
        }

        async fn create(&self, person: PersonRecord) -> Result<PersonRecord, StorageError> {
            Ok(person)
        }
    }

    fn people() -> Arc<MockPeople> {
        Arc::new(MockPeople {
            people: vec![PersonRecord::new("p-1", "app-1", "u1")],
            calls: AtomicUsize::new(0),
        })
    }

    fn accumulator(people: Arc<MockPeople>) -> PolicyAccumulator {
        PolicyAccumulator::new(EnvironmentResolver::new(people))
    }

    fn ctx() -> RequestContext {
        RequestContext::new("app-1").with_user(AuthUser::new("u1"))
    }

    fn policy(name: &str, query: Value) -> MatchedPolicy {
        MatchedPolicy::new(name).with_rule(QueryRule::new(query))
    }

    fn acq(ctx: &RequestContext) -> Value {
        ctx.access_control_query
            .as_ref()
            .map(Query::to_value)
            .unwrap_or(Value::Null)
    }

    // -------------------------------------------------------------------------
    // Folding
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_translates_and_folds() {
        let mut ctx = ctx();
        let report = accumulator(people())
            .accumulate(
                &mut ctx,
                &[policy("active", json!({"profile": {"@eq": {"status": "active"}}}))],
            )
            .await
            .unwrap();

        assert_eq!(acq(&ctx), json!({"profile": {"status": {"$eq": "active"}}}));
        assert_eq!(report.applied, vec![RuleRef { policy: "active".into(), rule: 0 }]);
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_later_rules_win_for_plain_keys() {
        let mut ctx = ctx();
        accumulator(people())
            .accumulate(
                &mut ctx,
                &[
                    policy("first", json!({"region": "eu", "tier": "gold"})),
                    policy("second", json!({"region": "us"})),
                ],
            )
            .await
            .unwrap();

        assert_eq!(acq(&ctx), json!({"region": "us", "tier": "gold"}));
    }

    #[tokio::test]
    async fn test_identical_groups_are_not_duplicated() {
        let fragment = json!({"@or": [{"ownerId": "env.authUserId"}, {"public": true}]});
        let mut ctx = ctx();
        accumulator(people())
            .accumulate(
                &mut ctx,
                &[
                    policy("a", fragment.clone()),
                    policy("b", fragment),
                    policy("c", json!({"@or": [{"public": true}, {"shared": true}]})),
                ],
            )
            .await
            .unwrap();

        let query = ctx.access_control_query.unwrap();
        let or = query.group(LogicalOperator::Or).unwrap();
        assert_eq!(
            Value::Array(or.iter().map(Query::to_value).collect()),
            json!([{"ownerId": "u1"}, {"public": true}, {"shared": true}])
        );
    }

    #[test]
    fn test_fold_skips_empty_nodes() {
        let mut target = Query::try_from(json!({"a": 1})).unwrap();
        fold(
            &mut target,
            Query::try_from(json!({"a": null, "b": {}, "$and": [], "c": 2})).unwrap(),
        );
        assert_eq!(target.to_value(), json!({"a": 1, "c": 2}));
    }

    #[tokio::test]
    async fn test_no_matched_policies_leaves_query_unset() {
        let mut ctx = ctx();
        let report = accumulator(people()).accumulate(&mut ctx, &[]).await.unwrap();
        assert!(report.is_empty());
        assert!(ctx.access_control_query.is_none());
    }

    // -------------------------------------------------------------------------
    // Environment
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_person_reference_resolved_once() {
        let people = people();
        let env = EnvBindings::new().with(PERSON_ID_SENTINEL, json!(PERSON_ID_SENTINEL));
        let mut matched = MatchedPolicy::new("own");
        matched.env = env;
        matched.rules = vec![
            QueryRule::new(json!({"@eq": {"ownerId": "env.personId"}})),
            QueryRule::new(json!({"@or": [{"authorId": "env.personId"}]})),
        ];

        let mut ctx = ctx();
        accumulator(people.clone())
            .accumulate(&mut ctx, &[matched])
            .await
            .unwrap();

        assert_eq!(
            acq(&ctx),
            json!({"ownerId": {"$eq": "p-1"}, "$or": [{"authorId": "p-1"}]})
        );
        assert_eq!(people.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_person_aborts() {
        let env = EnvBindings::new().with(PERSON_ID_SENTINEL, json!(PERSON_ID_SENTINEL));
        let rule = QueryRule::new(json!({"ownerId": "env.personId"})).with_env(env);
        let mut ctx = RequestContext::new("app-1").with_user(AuthUser::new("nobody"));

        let err = accumulator(people())
            .accumulate(&mut ctx, &[MatchedPolicy::new("own").with_rule(rule)])
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::EnvironmentResolution { .. }));
    }

    #[tokio::test]
    async fn test_unresolved_reference_becomes_null() {
        let mut ctx = ctx();
        accumulator(people())
            .accumulate(&mut ctx, &[policy("p", json!({"teamId": {"@eq": "env.teamId"}}))])
            .await
            .unwrap();
        assert_eq!(acq(&ctx), json!({"teamId": {"$eq": null}}));
    }

    #[tokio::test]
    async fn test_unresolved_top_level_reference_still_constrains() {
        let mut ctx = ctx();
        accumulator(people())
            .accumulate(
                &mut ctx,
                &[policy("team", json!({"teamId": "env.teamId", "archived": null}))],
            )
            .await
            .unwrap();
        assert_eq!(acq(&ctx), json!({"teamId": null}));
    }

    #[tokio::test]
    async fn test_references_inside_array_operands_resolve() {
        let mut ctx = ctx();
        accumulator(people())
            .accumulate(
                &mut ctx,
                &[policy(
                    "owners",
                    json!({"ownerId": {"@in": ["env.authUserId", "system", "env.teamId"]}}),
                )],
            )
            .await
            .unwrap();
        assert_eq!(
            acq(&ctx),
            json!({"ownerId": {"$in": ["u1", "system", null]}})
        );
    }

    #[tokio::test]
    async fn test_unresolved_reference_can_be_rejected() {
        let mut ctx = ctx();
        let err = accumulator(people())
            .with_unresolved_env(UnresolvedEnvMode::Reject)
            .accumulate(&mut ctx, &[policy("p", json!({"teamId": "env.teamId"}))])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyError::UnresolvedEnvironment { ref reference } if reference == "env.teamId"
        ));
    }

    // -------------------------------------------------------------------------
    // Conditions and failures
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_conditions_gate_rules() {
        let env = EnvBindings::new().with("region", json!("EU"));
        let matched = MatchedPolicy::new("regional")
            .with_rule(
                QueryRule::new(json!({"region": "eu"}))
                    .with_env(env)
                    .with_condition(Condition::new(json!("env.region"), "@eq", json!("eu"))),
            )
            .with_rule(
                QueryRule::new(json!({"internal": true}))
                    .with_condition(Condition::new(json!("env.region"), "@in", json!(["us"]))),
            );

        let mut ctx = ctx();
        let report = accumulator(people())
            .accumulate(&mut ctx, &[matched])
            .await
            .unwrap();

        assert_eq!(acq(&ctx), json!({"region": "eu"}));
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].rule, 1);
        assert_eq!(report.skipped[0].reason, SkipReason::ConditionsNotMet);
    }

    #[tokio::test]
    async fn test_broken_rule_is_skipped() {
        let mut ctx = ctx();
        let matched = MatchedPolicy::new("partly-broken")
            .with_rule(QueryRule::new(json!({"tags": ["a"]})))
            .with_rule(QueryRule::new(json!({"status": "active"})));
        let report = accumulator(people())
            .accumulate(&mut ctx, &[matched])
            .await
            .unwrap();

        assert_eq!(acq(&ctx), json!({"status": "active"}));
        assert!(matches!(
            report.skipped[0].reason,
            SkipReason::TranslationFailed(TranslateError::UnsupportedArrayClause { .. })
        ));
    }

    #[tokio::test]
    async fn test_policy_without_translatable_rule_refuses() {
        let mut ctx = ctx();
        let err = accumulator(people())
            .accumulate(
                &mut ctx,
                &[
                    policy("fine", json!({"status": "active"})),
                    policy("owner", json!({"ownerId": "u1", "roles": ["a"]})),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PolicyError::Translation {
                ref policy,
                source: TranslateError::UnsupportedArrayClause { .. },
            } if policy == "owner"
        ));
    }

    #[tokio::test]
    async fn test_gated_out_policy_is_not_a_translation_failure() {
        let matched = MatchedPolicy::new("gated").with_rule(
            QueryRule::new(json!({"tags": ["a"]}))
                .with_condition(Condition::new(json!("a"), "@eq", json!("b"))),
        );

        let mut ctx = ctx();
        let report = accumulator(people())
            .accumulate(&mut ctx, &[matched])
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(report.skipped[0].reason, SkipReason::ConditionsNotMet);
    }

    #[tokio::test]
    async fn test_broken_rule_can_abort() {
        let mut ctx = ctx();
        let err = accumulator(people())
            .with_rule_errors(RuleErrorMode::Abort)
            .accumulate(&mut ctx, &[policy("broken", json!({"@nope": {"a": 1}}))])
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Translation { ref policy, .. } if policy == "broken"));
    }

    #[tokio::test]
    async fn test_projections_narrow() {
        let matched = MatchedPolicy::new("p")
            .with_rule(
                QueryRule::new(Value::Null)
                    .with_projection(Projection::include(["name", "email", "phone"])),
            )
            .with_rule(
                QueryRule::new(Value::Null)
                    .with_projection(Projection {
                        include: Some(vec!["email".into(), "name".into()]),
                        exclude: vec!["ssn".into()],
                    }),
            );

        let mut ctx = ctx();
        accumulator(people())
            .accumulate(&mut ctx, &[matched])
            .await
            .unwrap();

        let projection = ctx.access_control_projection.unwrap();
        assert_eq!(
            projection.include,
            Some(vec!["name".to_string(), "email".to_string()])
        );
        assert_eq!(projection.exclude, vec!["ssn".to_string()]);
        assert_eq!(ctx.access_control_query, Some(Query::new()));
    }
}
