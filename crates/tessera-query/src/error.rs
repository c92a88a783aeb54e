//! Query document error types.

/// Errors raised while building a [`Query`](crate::Query) from JSON.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// A query document (or a logical group element) was not a JSON object.
    #[error("Query must be a JSON object, found {found}")]
    NotAnObject {
        /// JSON type that was found instead.
        found: &'static str,
    },

    /// A logical operator key did not hold an array of objects.
    #[error("Logical operator '{operator}' requires an array of query objects")]
    InvalidLogicalGroup {
        /// The offending key as written.
        operator: String,
    },

    /// The same logical operator was spelled twice in one object
    /// (e.g. both `@and` and `$and`).
    #[error("Logical operator '{operator}' appears more than once")]
    DuplicateLogicalOperator {
        /// The normalized operator.
        operator: String,
    },
}

impl QueryError {
    /// Creates a new `NotAnObject` error describing `value`.
    #[must_use]
    pub fn not_an_object(value: &serde_json::Value) -> Self {
        Self::NotAnObject {
            found: json_type_name(value),
        }
    }

    /// Creates a new `InvalidLogicalGroup` error.
    #[must_use]
    pub fn invalid_logical_group(operator: impl Into<String>) -> Self {
        Self::InvalidLogicalGroup {
            operator: operator.into(),
        }
    }
}

/// Returns a short name for the JSON type of `value`.
#[must_use]
pub fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = QueryError::not_an_object(&json!([1, 2]));
        assert_eq!(err.to_string(), "Query must be a JSON object, found array");

        let err = QueryError::invalid_logical_group("@or");
        assert_eq!(
            err.to_string(),
            "Logical operator '@or' requires an array of query objects"
        );
    }
}
