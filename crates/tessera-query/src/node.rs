//! Query document tree.
//!
//! A [`Query`] is an ordered map of keys to [`QueryNode`]s. Keys are either
//! field names, operator keys (`$eq`, `$gt`) or logical operator keys
//! (`$and`, `$or`). A logical key always holds a [`QueryNode::Group`]; this is
//! enforced when parsing and by [`Query::insert_group`].
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use tessera_query::{LogicalOperator, Query};
//!
//! let query = Query::try_from(json!({
//!     "status": {"$eq": "active"},
//!     "@or": [{"ownerId": "u1"}, {"public": true}]
//! }))
//! .unwrap();
//!
//! assert_eq!(query.group(LogicalOperator::Or).map(<[Query]>::len), Some(2));
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::operator::LogicalOperator;

// =============================================================================
// Query Node
// =============================================================================

/// A value stored under a query key.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// A scalar or array operand (`"active"`, `18`, `["a", "b"]`, `null`).
    Literal(Value),

    /// A nested object: either a field path continuing one level down, or a
    /// map of operators applied to the enclosing field.
    Constraint(Query),

    /// A logical group of independent sub-queries.
    Group(LogicalOperator, Vec<Query>),
}

impl QueryNode {
    /// Builds a node from JSON. Objects become constraints, everything else
    /// a literal.
    ///
    /// # Errors
    ///
    /// Returns an error if a nested object contains a malformed logical group.
    pub fn from_value(value: Value) -> Result<Self, QueryError> {
        match value {
            Value::Object(map) => Ok(Self::Constraint(Query::from_map(map)?)),
            other => Ok(Self::Literal(other)),
        }
    }

    /// Returns `true` for an empty constraint, an empty group or a `null`
    /// literal.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Literal(value) => value.is_null(),
            Self::Constraint(query) => query.is_empty(),
            Self::Group(_, children) => children.is_empty(),
        }
    }

    /// Returns the nested query if this is a constraint.
    #[must_use]
    pub fn as_constraint(&self) -> Option<&Query> {
        match self {
            Self::Constraint(query) => Some(query),
            _ => None,
        }
    }

    /// Returns the literal value if this is a literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if this node is a logical group.
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(..))
    }

    /// Calls `f` on every literal in this subtree, depth first.
    pub fn visit_literals<F>(&self, f: &mut F)
    where
        F: FnMut(&Value),
    {
        match self {
            Self::Literal(value) => f(value),
            Self::Constraint(query) => query.visit_literals(f),
            Self::Group(_, children) => {
                for child in children {
                    child.visit_literals(f);
                }
            }
        }
    }

    /// Rebuilds this subtree with every literal replaced by `f(literal)`.
    #[must_use]
    pub fn map_literals<F>(self, f: &mut F) -> Self
    where
        F: FnMut(Value) -> Value,
    {
        match self {
            Self::Literal(value) => Self::Literal(f(value)),
            Self::Constraint(query) => Self::Constraint(query.map_literals(f)),
            Self::Group(op, children) => Self::Group(
                op,
                children.into_iter().map(|c| c.map_literals(f)).collect(),
            ),
        }
    }

    /// Converts this node back into JSON.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Constraint(query) => query.to_value(),
            Self::Group(_, children) => {
                Value::Array(children.iter().map(Query::to_value).collect())
            }
        }
    }
}

impl From<Query> for QueryNode {
    fn from(query: Query) -> Self {
        Self::Constraint(query)
    }
}

impl Serialize for QueryNode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

// =============================================================================
// Query
// =============================================================================

/// A query document.
///
/// Equality is structural and ignores key order, which is what the
/// access-control layer relies on for de-duplication and conflict checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Query {
    clauses: IndexMap<String, QueryNode>,
}

impl Query {
    /// Creates an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a query from a JSON object map.
    ///
    /// Logical keys are normalized to their native spelling.
    ///
    /// # Errors
    ///
    /// Returns an error if a logical key does not hold an array of objects or
    /// if one logical operator is spelled twice.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, QueryError> {
        let mut clauses = IndexMap::with_capacity(map.len());

        for (key, value) in map {
            if let Some(op) = LogicalOperator::from_key(&key) {
                if clauses.contains_key(op.as_str()) {
                    return Err(QueryError::DuplicateLogicalOperator {
                        operator: op.as_str().to_string(),
                    });
                }
                let Value::Array(items) = value else {
                    return Err(QueryError::invalid_logical_group(key));
                };
                let children = items
                    .into_iter()
                    .map(|item| match item {
                        Value::Object(map) => Query::from_map(map),
                        _ => Err(QueryError::invalid_logical_group(key.as_str())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                clauses.insert(op.as_str().to_string(), QueryNode::Group(op, children));
            } else {
                clauses.insert(key, QueryNode::from_value(value)?);
            }
        }

        Ok(Self { clauses })
    }

    /// Number of top-level keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Returns `true` if the query has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Returns the node stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&QueryNode> {
        self.clauses.get(key)
    }

    /// Returns a mutable reference to the node stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut QueryNode> {
        self.clauses.get_mut(key)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.clauses.contains_key(key)
    }

    /// Inserts a node, returning the previous one.
    ///
    /// Groups must go through [`Query::insert_group`] so that the key always
    /// matches the operator; a group passed here is re-keyed accordingly.
    pub fn insert(&mut self, key: impl Into<String>, node: QueryNode) -> Option<QueryNode> {
        match node {
            QueryNode::Group(op, children) => self.insert_group(op, children),
            node => self.clauses.insert(key.into(), node),
        }
    }

    /// Inserts a logical group under its native key.
    pub fn insert_group(&mut self, op: LogicalOperator, children: Vec<Query>) -> Option<QueryNode> {
        self.clauses
            .insert(op.as_str().to_string(), QueryNode::Group(op, children))
    }

    /// Removes `key`, preserving the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<QueryNode> {
        self.clauses.shift_remove(key)
    }

    /// Iterates over keys and nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryNode)> {
        self.clauses.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clauses.keys().map(String::as_str)
    }

    /// Iterates over the non-logical entries.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &QueryNode)> {
        self.iter().filter(|(_, node)| !node.is_group())
    }

    /// Returns the children of the group for `op`.
    #[must_use]
    pub fn group(&self, op: LogicalOperator) -> Option<&[Query]> {
        match self.clauses.get(op.as_str()) {
            Some(QueryNode::Group(_, children)) => Some(children),
            _ => None,
        }
    }

    /// Returns the children of the group for `op`, mutably.
    pub fn group_mut(&mut self, op: LogicalOperator) -> Option<&mut Vec<Query>> {
        match self.clauses.get_mut(op.as_str()) {
            Some(QueryNode::Group(_, children)) => Some(children),
            _ => None,
        }
    }

    /// Looks up `field` as a top-level key of any element inside any logical
    /// group, returning every occurrence with the group it was found in.
    #[must_use]
    pub fn find_in_groups(&self, field: &str) -> Vec<(LogicalOperator, &QueryNode)> {
        LogicalOperator::ALL
            .iter()
            .filter_map(|&op| self.group(op).map(|children| (op, children)))
            .flat_map(|(op, children)| {
                children
                    .iter()
                    .filter_map(move |child| child.get(field).map(|node| (op, node)))
            })
            .collect()
    }

    /// Calls `f` on every literal in the document, depth first.
    pub fn visit_literals<F>(&self, f: &mut F)
    where
        F: FnMut(&Value),
    {
        for node in self.clauses.values() {
            node.visit_literals(f);
        }
    }

    /// Rebuilds the document with every literal replaced by `f(literal)`.
    #[must_use]
    pub fn map_literals<F>(self, f: &mut F) -> Self
    where
        F: FnMut(Value) -> Value,
    {
        Self {
            clauses: self
                .clauses
                .into_iter()
                .map(|(k, v)| (k, v.map_literals(f)))
                .collect(),
        }
    }

    /// Converts the document into a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.clauses
                .iter()
                .map(|(k, v)| (k.clone(), v.to_value()))
                .collect(),
        )
    }
}

impl TryFrom<Value> for Query {
    type Error = QueryError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Self::from_map(map),
            other => Err(QueryError::not_an_object(&other)),
        }
    }
}

impl TryFrom<&Value> for Query {
    type Error = QueryError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Self::try_from(value.clone())
    }
}

impl From<Query> for Value {
    fn from(query: Query) -> Self {
        query.to_value()
    }
}

impl FromIterator<(String, QueryNode)> for Query {
    fn from_iter<I: IntoIterator<Item = (String, QueryNode)>>(iter: I) -> Self {
        let mut query = Query::new();
        for (key, node) in iter {
            query.insert(key, node);
        }
        query
    }
}

impl IntoIterator for Query {
    type Item = (String, QueryNode);
    type IntoIter = indexmap::map::IntoIter<String, QueryNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.clauses.into_iter()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

// =============================================================================
// Tests
// =============================================================================
