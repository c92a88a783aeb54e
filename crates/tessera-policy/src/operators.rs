//! Operator evaluator for policy conditions.
//!
//! Conditions compare two operands with a comparison operator. Operators are
//! accepted with either prefix: `@eq` is the current spelling, `$eq` the
//! legacy one, and both mean the same thing.
//!
//! ```
//! use serde_json::json;
//! use tessera_policy::operators::evaluate;
//!
//! assert!(evaluate(&json!("Foo"), &json!("foo"), "$eq"));
//! assert!(evaluate(&json!(["a", "b"]), &json!(["a", "b", "c"]), "@in"));
//! assert!(!evaluate(&json!(1), &json!(1), "@unknown"));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use regex::RegexBuilder;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use tessera_query::{NATIVE_SIGIL, operator_name};

/// Comparison operators understood by conditions and policy queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    /// Equality; strings compare case-insensitively.
    Eq,
    /// Negated equality.
    Ne,
    /// Greater than (numbers or dates).
    Gt,
    /// Greater than or equal (numbers or dates).
    Gte,
    /// Less than (numbers or dates).
    Lt,
    /// Less than or equal (numbers or dates).
    Lte,
    /// Case-sensitive regular expression match.
    Regex,
    /// Case-insensitive regular expression match.
    IRegex,
    /// Set membership.
    In,
    /// Negated set membership.
    Nin,
    /// Containment of `rhs` within `lhs`.
    Exists,
}

impl ComparisonOperator {
    /// All comparison operators.
    pub const ALL: [ComparisonOperator; 11] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Regex,
        Self::IRegex,
        Self::In,
        Self::Nin,
        Self::Exists,
    ];

    /// Parses an operator key written with either prefix (`@gt`, `$gt`).
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        operator_name(key).and_then(Self::from_name)
    }

    /// Parses a bare operator name (`gt`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Bare operator name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Regex => "regex",
            Self::IRegex => "iregex",
            Self::In => "in",
            Self::Nin => "nin",
            Self::Exists => "exists",
        }
    }

    /// Native query key for this operator (`$gt`).
    #[must_use]
    pub fn native_key(self) -> String {
        format!("{NATIVE_SIGIL}{}", self.name())
    }

    /// Evaluates `lhs <op> rhs`.
    #[must_use]
    pub fn evaluate(self, lhs: &Value, rhs: &Value) -> bool {
        match self {
            Self::Eq => loose_eq(lhs, rhs),
            Self::Ne => !loose_eq(lhs, rhs),
            Self::Gt => compare(lhs, rhs).is_some_and(Ordering::is_gt),
            Self::Gte => compare(lhs, rhs).is_some_and(Ordering::is_ge),
            Self::Lt => compare(lhs, rhs).is_some_and(Ordering::is_lt),
            Self::Lte => compare(lhs, rhs).is_some_and(Ordering::is_le),
            Self::Regex => regex_match(lhs, rhs, false),
            Self::IRegex => regex_match(lhs, rhs, true),
            Self::In => is_in(lhs, rhs),
            Self::Nin => not_in(lhs),
            Self::Exists => contains(lhs, rhs),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NATIVE_SIGIL}{}", self.name())
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| format!("unknown operator '{s}'"))
    }
}

/// Evaluates `lhs <operator> rhs`.
///
/// Unknown operators evaluate to `false`.
#[must_use]
pub fn evaluate(lhs: &Value, rhs: &Value, operator: &str) -> bool {
    match ComparisonOperator::from_key(operator) {
        Some(op) => op.evaluate(lhs, rhs),
        None => {
            tracing::debug!(operator, "Unknown condition operator evaluates to false");
            false
        }
    }
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(parse_instant(a)?.cmp(&parse_instant(b)?)),
        _ => None,
    }
}

/// Parses an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
fn parse_instant(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok().or_else(|| {
        Date::parse(raw, format_description!("[year]-[month]-[day]"))
            .ok()
            .map(|date| date.midnight().assume_utc())
    })
}

fn regex_match(lhs: &Value, rhs: &Value, case_insensitive: bool) -> bool {
    let (Value::String(text), Value::String(pattern)) = (lhs, rhs) else {
        return false;
    };
    match RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(re) => re.is_match(text),
        Err(e) => {
            tracing::debug!(pattern = %pattern, error = %e, "Invalid regex in condition");
            false
        }
    }
}

fn is_in(lhs: &Value, rhs: &Value) -> bool {
    let Value::Array(allowed) = rhs else {
        return false;
    };
    match lhs {
        Value::Array(items) => items.iter().all(|item| allowed.contains(item)),
        value => allowed.contains(value),
    }
}

// Known issue: membership is tested against `lhs` itself rather than `rhs`,
// so a sequence `lhs` is always "not in" and a scalar never is. Kept until the
// intended semantics are confirmed.
fn not_in(lhs: &Value) -> bool {
    match lhs {
        Value::Array(items) => items.iter().all(|item| item != lhs),
        value => std::iter::once(value).all(|item| item != lhs),
    }
}

// Checks that `rhs` is contained in `lhs`, the inverse of
// the usual reading of "exists".
fn contains(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Array(items), value) => items.contains(value),
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        _ => false,
    }
}
