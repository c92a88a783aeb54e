//! Request-scoped environment and environment-reference resolution.
//!
//! Policy queries and conditions can refer to per-request values with
//! references such as `env.authUserId` or `env.profile.region`. The
//! [`Environment`] holds those values for a single request; it is created
//! when evaluation starts and dropped with the request, never shared.
//!
//! A binding whose value is the [`PERSON_ID_SENTINEL`] is derived lazily: the
//! first reference to it looks up the person linked to the authenticated user
//! and caches the person's id under `personId`.
//!
//! ```ignore
//! let mut env = Environment::for_user(Some("u1"));
//! env.bind(&EnvBindings::new().with("personId", json!("personId")));
//!
//! let resolver = EnvironmentResolver::new(people);
//! let person = resolver.resolve("env.personId", &mut env, "app-1").await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_storage::PeopleStorage;

use crate::PolicyResult;
use crate::error::PolicyError;

/// Environment key seeded with the authenticated user's id.
pub const AUTH_USER_ID: &str = "authUserId";

/// Environment key and sentinel binding value for the linked person's id.
pub const PERSON_ID_SENTINEL: &str = "personId";

/// Leading token of an environment reference.
pub const ENV_TOKEN: &str = "env";

// =============================================================================
// Bindings
// =============================================================================

/// Declarative environment bindings attached to a policy rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvBindings(pub Map<String, Value>);

impl EnvBindings {
    /// Creates empty bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Returns `true` if there are no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Request-scoped environment map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    values: Map<String, Value>,
}

impl Environment {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an environment seeded with the authenticated user's id.
    #[must_use]
    pub fn for_user(auth_user_id: Option<&str>) -> Self {
        let mut env = Self::new();
        if let Some(id) = auth_user_id {
            env.set(AUTH_USER_ID, Value::String(id.to_string()));
        }
        env
    }

    /// The authenticated user's id, if seeded.
    #[must_use]
    pub fn auth_user_id(&self) -> Option<&str> {
        self.values.get(AUTH_USER_ID).and_then(Value::as_str)
    }

    /// Returns the top-level value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores a top-level value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Layers a rule's bindings over the environment.
    ///
    /// Later bindings override earlier ones, except that a sentinel binding
    /// never replaces a value that has already been derived.
    pub fn bind(&mut self, bindings: &EnvBindings) {
        for (name, value) in &bindings.0 {
            if is_sentinel(value)
                && self.values.get(name).is_some_and(|current| !is_sentinel(current))
            {
                continue;
            }
            self.values.insert(name.clone(), value.clone());
        }
    }

    /// Walks a dotted path (`profile.region`, `teams.0`) through the map.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// The derived person id, if it has been resolved already.
    fn cached_person_id(&self) -> Option<&Value> {
        self.values
            .get(PERSON_ID_SENTINEL)
            .filter(|value| !value.is_null() && !is_sentinel(value))
    }
}

fn is_sentinel(value: &Value) -> bool {
    value.as_str() == Some(PERSON_ID_SENTINEL)
}

/// Returns the dotted path of an environment reference (`env.a.b` → `a.b`),
/// or `None` if `expression` is a literal.
#[must_use]
pub fn parse_reference(expression: &str) -> Option<&str> {
    expression
        .strip_prefix(ENV_TOKEN)?
        .strip_prefix('.')
        .filter(|path| !path.is_empty())
}

/// Returns `true` if `value` is a string environment reference.
#[must_use]
pub fn is_reference(value: &Value) -> bool {
    value.as_str().and_then(parse_reference).is_some()
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves environment references against a request's [`Environment`].
#[derive(Clone)]
pub struct EnvironmentResolver {
    people: Arc<dyn PeopleStorage>,
}

impl EnvironmentResolver {
    /// Creates a resolver backed by the given people storage.
    #[must_use]
    pub fn new(people: Arc<dyn PeopleStorage>) -> Self {
        Self { people }
    }

    /// Resolves `expression` within `env`.
    ///
    /// - A literal (not an `env.` reference) is returned unchanged.
    /// - A reference whose value is the person sentinel triggers a lookup of
    ///   the person linked to the authenticated user; the id is cached in
    ///   `env` under `personId`.
    /// - Any other reference returns the walked value, or `None` if the path
    ///   does not resolve.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::EnvironmentResolution`] if the person lookup
    /// fails or finds no linked person.
    pub async fn resolve(
        &self,
        expression: &str,
        env: &mut Environment,
        app_id: &str,
    ) -> PolicyResult<Option<Value>> {
        let Some(path) = parse_reference(expression) else {
            return Ok(Some(Value::String(expression.to_string())));
        };

        let Some(value) = env.lookup(path) else {
            tracing::debug!(reference = %expression, "Environment reference did not resolve");
            return Ok(None);
        };

        if is_sentinel(value) {
            return self.person_id(env, app_id).await.map(Some);
        }

        Ok(Some(value.clone()))
    }

    /// Resolves a JSON operand: strings go through [`resolve`](Self::resolve),
    /// everything else is returned unchanged.
    ///
    /// # Errors
    ///
    /// Same as [`resolve`](Self::resolve).
    pub async fn resolve_value(
        &self,
        value: &Value,
        env: &mut Environment,
        app_id: &str,
    ) -> PolicyResult<Option<Value>> {
        match value {
            Value::String(expression) => self.resolve(expression, env, app_id).await,
            other => Ok(Some(other.clone())),
        }
    }

    async fn person_id(&self, env: &mut Environment, app_id: &str) -> PolicyResult<Value> {
        if let Some(id) = env.cached_person_id() {
            return Ok(id.clone());
        }

        let Some(auth_user_id) = env.auth_user_id().map(str::to_string) else {
            return Err(PolicyError::environment_resolution(
                app_id,
                "",
                "no authenticated user to link a person to",
            ));
        };

        let person = self
            .people
            .find_by_auth_id(app_id, &auth_user_id)
            .await
            .map_err(|e| {
                tracing::error!(app_id, auth_user_id = %auth_user_id, error = %e, "Person lookup failed");
                PolicyError::environment_resolution(app_id, &auth_user_id, e.to_string())
            })?;

        let Some(person) = person else {
            tracing::error!(app_id, auth_user_id = %auth_user_id, "No person linked to authenticated user");
            return Err(PolicyError::environment_resolution(
                app_id,
                &auth_user_id,
                "no person linked to the authenticated user",
            ));
        };

        let id = Value::String(person.id);
        env.set(PERSON_ID_SENTINEL, id.clone());
        Ok(id)
    }
}

// =============================================================================
// Tests
// =============================================================================
