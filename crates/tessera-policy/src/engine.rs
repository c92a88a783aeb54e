//! Access-control enforcement.
//!
//! Ties the accumulator and the merge engine together for one request and
//! applies the configured conflict handling.
//!
//! # Example
//!
//! ```ignore
//! use tessera_policy::{AccessControlConfig, AccessControlEngine, EnvironmentResolver};
//!
//! let engine = AccessControlEngine::new(
//!     EnvironmentResolver::new(people),
//!     AccessControlConfig::default(),
//! );
//!
//! let enforcement = engine.enforce(&mut ctx, &matched_policies).await?;
//! // ctx.body.query is now safe to hand to the persistence layer
//! ```

use crate::PolicyResult;
use crate::accumulate::{AccumulationReport, PolicyAccumulator};
use crate::cache::PolicyCache;
use crate::config::{AccessControlConfig, ConflictMode};
use crate::context::{MatchedPolicy, RequestContext};
use crate::environment::EnvironmentResolver;
use crate::error::PolicyError;
use crate::merge::{MergeOutcome, merge_into_request_query};

/// Result of a successful enforcement.
#[derive(Debug, Clone, PartialEq)]
pub struct Enforcement {
    /// Which rules contributed to the access-control query.
    pub report: AccumulationReport,

    /// How the access-control query was merged into the caller's query.
    pub outcome: MergeOutcome,
}

/// Produces and applies the access-control query for requests.
#[derive(Clone)]
pub struct AccessControlEngine {
    accumulator: PolicyAccumulator,
    config: AccessControlConfig,
}

impl AccessControlEngine {
    /// Create a new engine.
    #[must_use]
    pub fn new(resolver: EnvironmentResolver, config: AccessControlConfig) -> Self {
        Self {
            accumulator: PolicyAccumulator::from_config(resolver, &config),
            config,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &AccessControlConfig {
        &self.config
    }

    /// Accumulates `policies` into `ctx` and merges the result into the
    /// caller's query.
    ///
    /// When the request is refused the caller's query is restored to what
    /// it was on entry; a partially merged query is never left behind.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::PolicyConflict`] if the caller's query contradicts
    ///   the policies and `conflict_mode` is `reject`.
    /// - Any error from accumulation or merging.
    pub async fn enforce(
        &self,
        ctx: &mut RequestContext,
        policies: &[MatchedPolicy],
    ) -> PolicyResult<Enforcement> {
        let original = ctx.body.query.clone();

        let report = self.accumulator.accumulate(ctx, policies).await?;

        let outcome = match merge_into_request_query(ctx) {
            Ok(outcome) => outcome,
            Err(e) => {
                ctx.body.query = original;
                return Err(e);
            }
        };

        if outcome.has_conflicts() && self.config.conflict_mode == ConflictMode::Reject {
            tracing::warn!(
                app_id = %ctx.auth_app,
                conflicts = outcome.conflicts().len(),
                "Request rejected: caller query conflicts with access policy"
            );
            ctx.body.query = original;
            return Err(PolicyError::conflict(outcome.conflicts().to_vec()));
        }

        tracing::debug!(
            app_id = %ctx.auth_app,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            conflicts = outcome.conflicts().len(),
            "Access-control query enforced"
        );

        Ok(Enforcement { report, outcome })
    }

    /// Looks up the policies matching `verb path` for the request's app and
    /// enforces them.
    ///
    /// # Errors
    ///
    /// Same as [`enforce`](Self::enforce), plus storage errors from the
    /// policy lookup.
    pub async fn enforce_endpoint(
        &self,
        cache: &PolicyCache,
        ctx: &mut RequestContext,
        verb: &str,
        path: &str,
    ) -> PolicyResult<Enforcement> {
        let policies = cache.matched_policies(&ctx.auth_app, verb, path).await?;
        tracing::debug!(
            app_id = %ctx.auth_app,
            verb,
            path,
            matched = policies.len(),
            "Matched policies for endpoint"
        );
        self.enforce(ctx, &policies).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AuthUser, QueryRule};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tessera_query::Query;
    use tessera_storage::{PeopleStorage, PersonRecord, StorageError};

    struct NoPeople;

    #[async_trait]
    impl PeopleStorage for NoPeople {
        async fn find_by_auth_id(
            &self,
            _app_id: &str,
            _auth_id: &str,
        ) -> Result<Option<PersonRecord>, StorageError> {
            Ok(None)
        }

        async fn create(&self, person: PersonRecord) -> Result<PersonRecord, StorageError> {
            Ok(person)
        }
    }

    fn engine(config: AccessControlConfig) -> AccessControlEngine {
        AccessControlEngine::new(EnvironmentResolver::new(Arc::new(NoPeople)), config)
    }

    fn ctx(caller: Option<Value>) -> RequestContext {
        let mut ctx = RequestContext::new("app-1").with_user(AuthUser::new("u1"));
        ctx.body.query = caller.map(|q| Query::try_from(q).unwrap());
        ctx
    }

    fn active_policy() -> MatchedPolicy {
        MatchedPolicy::new("active-only").with_rule(QueryRule::new(json!({"@eq": {"status": "active"}})))
    }

    #[tokio::test]
    async fn test_conflict_is_rejected_and_query_restored() {
        let mut ctx = ctx(Some(json!({"status": {"$eq": "closed"}, "title": "x"})));
        let err = engine(AccessControlConfig::default())
            .enforce(&mut ctx, &[active_policy()])
            .await
            .unwrap_err();

        let conflicts = err.conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "status");
        assert_eq!(
            ctx.body.query.unwrap().to_value(),
            json!({"status": {"$eq": "closed"}, "title": "x"})
        );
    }

    #[tokio::test]
    async fn test_conflict_can_be_reported() {
        let config = AccessControlConfig {
            conflict_mode: ConflictMode::Report,
            ..Default::default()
        };
        let mut ctx = ctx(Some(json!({"status": {"$eq": "closed"}})));
        let enforcement = engine(config)
            .enforce(&mut ctx, &[active_policy()])
            .await
            .unwrap();

        assert!(enforcement.outcome.has_conflicts());
        assert_eq!(
            ctx.body.query.unwrap().to_value(),
            json!({"status": {"$eq": "active"}})
        );
    }

    #[tokio::test]
    async fn test_translate_then_merge_into_empty_query() {
        let policy = MatchedPolicy::new("profile")
            .with_rule(QueryRule::new(json!({"profile": {"@eq": {"status": "active"}}})));
        let mut ctx = ctx(Some(json!({})));

        let enforcement = engine(AccessControlConfig::default())
            .enforce(&mut ctx, &[policy])
            .await
            .unwrap();

        assert!(!enforcement.outcome.has_conflicts());
        assert_eq!(
            ctx.body.query.unwrap().to_value(),
            json!({"profile": {"status": {"$eq": "active"}}})
        );
    }

    #[tokio::test]
    async fn test_broken_policy_refuses_instead_of_widening() {
        let policy = MatchedPolicy::new("owner")
            .with_rule(QueryRule::new(json!({"ownerId": "u1", "roles": ["a"]})));
        let mut ctx = ctx(Some(json!({"title": "x"})));

        let err = engine(AccessControlConfig::default())
            .enforce(&mut ctx, &[policy])
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "policy-translation");
        assert!(err.is_client_error());
        assert!(ctx.access_control_query.is_none());
        assert_eq!(ctx.body.query.unwrap().to_value(), json!({"title": "x"}));
    }

    #[tokio::test]
    async fn test_unresolved_reference_restricts_to_null() {
        let policy = MatchedPolicy::new("team")
            .with_rule(QueryRule::new(json!({"teamId": "env.teamId"})));
        let mut ctx = ctx(None);

        engine(AccessControlConfig::default())
            .enforce(&mut ctx, &[policy])
            .await
            .unwrap();

        assert_eq!(ctx.body.query.unwrap().to_value(), json!({"teamId": null}));
    }

    #[tokio::test]
    async fn test_pass_through() {
        let mut ctx = ctx(None);
        let enforcement = engine(AccessControlConfig::default())
            .enforce(&mut ctx, &[active_policy()])
            .await
            .unwrap();

        assert_eq!(enforcement.outcome, MergeOutcome::PassThrough);
        assert_eq!(ctx.body.query, ctx.access_control_query);
    }
}
