//! Policy query translator.
//!
//! Converts a policy query fragment written in the `@`-prefixed policy DSL
//! into the native `$`-prefixed query grammar. Translation is a pure
//! recursive function: it never mutates its input and always returns a new
//! tree.
//!
//! Shapes handled:
//!
//! | Policy fragment                              | Native query                                |
//! |----------------------------------------------|---------------------------------------------|
//! | `{"status": "active"}`                       | `{"status": "active"}`                      |
//! | `{"age": {"@gt": 18}}`                       | `{"age": {"$gt": 18}}`                      |
//! | `{"@eq": {"status": "active"}}`              | `{"status": {"$eq": "active"}}`             |
//! | `{"profile": {"@eq": {"status": "active"}}}` | `{"profile": {"status": {"$eq": "active"}}}`|
//! | `{"@or": [{..}, {..}]}`                      | `{"$or": [translated.., translated..]}`     |
//!
//! Environment references (`env.personId`) are kept as literals; they are
//! substituted later by the accumulator.

use serde_json::Value;
use tessera_query::{Query, QueryNode, is_operator_key};

use crate::error::TranslateError;
use crate::operators::ComparisonOperator;

/// Translates a raw policy fragment.
///
/// A `null` fragment passes through as `None`.
///
/// # Errors
///
/// Returns an error for unknown operators, array values under field keys,
/// operators without an enclosing field and malformed logical groups.
pub fn translate(fragment: &Value) -> Result<Option<Query>, TranslateError> {
    if fragment.is_null() {
        return Ok(None);
    }
    let query = Query::try_from(fragment)?;
    translate_query(&query).map(Some)
}

/// Translates an already-parsed policy fragment.
///
/// # Errors
///
/// Same as [`translate`].
pub fn translate_query(fragment: &Query) -> Result<Query, TranslateError> {
    translate_level(fragment, false)
}

fn translate_level(fragment: &Query, in_field: bool) -> Result<Query, TranslateError> {
    let mut result = Query::new();

    for (key, node) in fragment.iter() {
        match node {
            QueryNode::Group(op, children) => {
                let translated = children
                    .iter()
                    .map(translate_query)
                    .collect::<Result<Vec<_>, _>>()?;
                result.insert_group(*op, translated);
            }
            QueryNode::Constraint(inner) if is_operator_key(key) => {
                let op = comparison(key)?;
                let distributed = distribute(op, key, inner)?;
                merge_constraints(&mut result, distributed);
            }
            QueryNode::Constraint(inner) => {
                let nested = translate_level(inner, true)?;
                merge_field(&mut result, key, nested);
            }
            QueryNode::Literal(value) if is_operator_key(key) => {
                let op = comparison(key)?;
                if !in_field {
                    return Err(TranslateError::OperatorWithoutField {
                        key: key.to_string(),
                    });
                }
                result.insert(op.native_key(), QueryNode::Literal(value.clone()));
            }
            QueryNode::Literal(Value::Array(_)) => {
                return Err(TranslateError::unsupported_array(key));
            }
            QueryNode::Literal(value) => {
                result.insert(key, QueryNode::Literal(value.clone()));
            }
        }
    }

    Ok(result)
}

fn comparison(key: &str) -> Result<ComparisonOperator, TranslateError> {
    ComparisonOperator::from_key(key).ok_or_else(|| TranslateError::unknown_operator(key))
}

/// Applies `op` to every field of a field map, following nested objects as
/// path continuations: `{"@eq": {"a": {"b": 1}}}` → `{"a": {"b": {"$eq": 1}}}`.
fn distribute(
    op: ComparisonOperator,
    key: &str,
    fields: &Query,
) -> Result<Query, TranslateError> {
    let mut result = Query::new();

    for (field, node) in fields.iter() {
        if is_operator_key(field) {
            return Err(TranslateError::InvalidOperand {
                key: key.to_string(),
            });
        }
        let translated = match node {
            QueryNode::Literal(value) => {
                let mut constraint = Query::new();
                constraint.insert(op.native_key(), QueryNode::Literal(value.clone()));
                constraint
            }
            QueryNode::Constraint(inner) => distribute(op, key, inner)?,
            QueryNode::Group(..) => {
                return Err(TranslateError::InvalidOperand {
                    key: key.to_string(),
                });
            }
        };
        merge_field(&mut result, field, translated);
    }

    Ok(result)
}

fn merge_field(target: &mut Query, field: &str, nested: Query) {
    match target.get_mut(field) {
        Some(QueryNode::Constraint(existing)) => merge_constraints(existing, nested),
        _ => {
            target.insert(field, QueryNode::Constraint(nested));
        }
    }
}

fn merge_constraints(target: &mut Query, source: Query) {
    for (key, node) in source {
        match node {
            QueryNode::Constraint(incoming) => merge_field(target, &key, incoming),
            node => {
                target.insert(key, node);
            }
        }
    }
}
