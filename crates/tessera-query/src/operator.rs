//! Operator key vocabulary.
//!
//! Policies are written with `@`-prefixed operator keys (`@eq`, `@and`); the
//! persistence layer consumes `$`-prefixed keys (`$eq`, `$and`). Both
//! spellings are accepted wherever a key is inspected.

use std::fmt;

/// Sigil used by the policy query DSL.
pub const POLICY_SIGIL: char = '@';

/// Sigil used by the native query grammar.
pub const NATIVE_SIGIL: char = '$';

/// Logical operators that combine sub-queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOperator {
    /// Every sub-query must match.
    And,
    /// At least one sub-query must match.
    Or,
}

impl LogicalOperator {
    /// All logical operators, in rendering order.
    pub const ALL: [LogicalOperator; 2] = [LogicalOperator::And, LogicalOperator::Or];

    /// Recognizes `@and`, `@or`, `$and` and `$or`.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "@and" | "$and" => Some(Self::And),
            "@or" | "$or" => Some(Self::Or),
            _ => None,
        }
    }

    /// Native key for this operator (`$and` / `$or`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::And => "$and",
            Self::Or => "$or",
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` if `key` starts with either operator sigil.
#[must_use]
pub fn is_operator_key(key: &str) -> bool {
    key.starts_with(POLICY_SIGIL) || key.starts_with(NATIVE_SIGIL)
}

/// Rewrites a leading policy sigil into the native sigil.
///
/// Keys without the policy sigil are returned unchanged.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    match key.strip_prefix(POLICY_SIGIL) {
        Some(rest) => format!("{NATIVE_SIGIL}{rest}"),
        None => key.to_string(),
    }
}

/// Returns the operator name without its sigil, if `key` is an operator key.
#[must_use]
pub fn operator_name(key: &str) -> Option<&str> {
    key.strip_prefix(POLICY_SIGIL)
        .or_else(|| key.strip_prefix(NATIVE_SIGIL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_operator_from_key() {
        assert_eq!(LogicalOperator::from_key("@and"), Some(LogicalOperator::And));
        assert_eq!(LogicalOperator::from_key("$and"), Some(LogicalOperator::And));
        assert_eq!(LogicalOperator::from_key("@or"), Some(LogicalOperator::Or));
        assert_eq!(LogicalOperator::from_key("$or"), Some(LogicalOperator::Or));
        assert_eq!(LogicalOperator::from_key("and"), None);
        assert_eq!(LogicalOperator::from_key("@nor"), None);
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("@eq"), "$eq");
        assert_eq!(normalize_key("$eq"), "$eq");
        assert_eq!(normalize_key("status"), "status");
        // Only the leading sigil is rewritten.
        assert_eq!(normalize_key("email@domain"), "email@domain");
    }

    #[test]
    fn test_operator_name() {
        assert_eq!(operator_name("@gte"), Some("gte"));
        assert_eq!(operator_name("$in"), Some("in"));
        assert_eq!(operator_name("status"), None);
        assert!(is_operator_key("@regex"));
        assert!(!is_operator_key("profile"));
    }
}
