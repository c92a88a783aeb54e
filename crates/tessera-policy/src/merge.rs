//! Query merge engine.
//!
//! Merges the accumulated access-control query into the query the caller
//! supplied. The result must never let the caller see more than the
//! access-control query allows: caller filters that do not contradict the
//! policies are kept, and every contradiction is reported as a
//! [`MergeConflict`] instead of being resolved silently.
//!
//! Outcomes:
//!
//! | Caller query                     | Outcome                         |
//! |----------------------------------|---------------------------------|
//! | absent                           | [`MergeOutcome::PassThrough`]   |
//! | equal to the access-control query| [`MergeOutcome::Unchanged`]     |
//! | anything else                    | [`MergeOutcome::Merged`]        |
//!
//! Whether a conflict rejects the request is decided by the caller of this
//! module (see [`crate::engine`]).

use std::fmt;

use serde::{Serialize, Serializer};
use tessera_query::{LogicalOperator, Query, QueryNode};

use crate::PolicyResult;
use crate::context::RequestContext;
use crate::error::PolicyError;

// =============================================================================
// Merge Conflict
// =============================================================================

/// Where in the caller's query a conflict was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictLocation {
    /// A top-level key of the caller's query.
    TopLevel,
    /// A sub-query of one of the caller's logical groups.
    Logical(LogicalOperator),
}

impl fmt::Display for ConflictLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TopLevel => f.write_str("top-level"),
            Self::Logical(op) => write!(f, "{op}"),
        }
    }
}

impl Serialize for ConflictLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A field the caller constrained differently from the access-control query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeConflict {
    /// The conflicting field.
    pub field: String,

    /// Where the caller's constraint was found.
    pub location: ConflictLocation,

    /// The caller's constraint.
    pub requested: QueryNode,

    /// The access-control constraint.
    pub enforced: QueryNode,

    /// `true` if the caller's constraint was removed or replaced by the
    /// access-control constraint.
    pub overridden: bool,
}

// =============================================================================
// Merge Outcome
// =============================================================================

/// Result of merging the access-control query into the caller's query.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The caller supplied no query; it is now the access-control query.
    PassThrough,

    /// Nothing had to change.
    Unchanged,

    /// The caller's query was narrowed in place.
    Merged {
        /// Conflicts found while merging.
        conflicts: Vec<MergeConflict>,
    },
}

impl MergeOutcome {
    /// Conflicts found while merging.
    #[must_use]
    pub fn conflicts(&self) -> &[MergeConflict] {
        match self {
            Self::Merged { conflicts } => conflicts,
            _ => &[],
        }
    }

    /// Returns `true` if any conflict was found.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts().is_empty()
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Merges `ctx.access_control_query` into `ctx.body.query`.
///
/// A context without an access-control query is left untouched.
///
/// # Errors
///
/// Returns [`PolicyError::InvalidClause`] if the access-control query holds
/// an array under a key that is not a logical operator.
pub fn merge_into_request_query(ctx: &mut RequestContext) -> PolicyResult<MergeOutcome> {
    let Some(access) = ctx.access_control_query.as_ref() else {
        tracing::debug!(app_id = %ctx.auth_app, "No access-control query to merge");
        return Ok(MergeOutcome::Unchanged);
    };

    if let Some((key, _)) = access
        .fields()
        .find(|(_, node)| matches!(node, QueryNode::Literal(serde_json::Value::Array(_))))
    {
        return Err(PolicyError::invalid_clause(key));
    }

    let Some(caller) = ctx.body.query.as_ref() else {
        ctx.body.query = Some(access.clone());
        return Ok(MergeOutcome::PassThrough);
    };

    if caller == access {
        return Ok(MergeOutcome::Unchanged);
    }

    let mut merged = caller.clone();
    let mut conflicts = Vec::new();

    for (key, node) in access.iter() {
        match node {
            QueryNode::Group(op, children) if merged.group(*op).is_some() => {
                cross_check(&mut merged, *op, children, &mut conflicts);
            }
            QueryNode::Group(op, children) => {
                prioritise(&mut merged, *op, children, &mut conflicts);
            }
            node => merge_field(&mut merged, key, node, &mut conflicts),
        }
    }

    for conflict in &conflicts {
        tracing::warn!(
            field = %conflict.field,
            location = %conflict.location,
            overridden = conflict.overridden,
            "Caller query conflicts with access-control query"
        );
    }

    if conflicts.is_empty() && &merged == caller {
        return Ok(MergeOutcome::Unchanged);
    }

    ctx.body.query = Some(merged);
    Ok(MergeOutcome::Merged { conflicts })
}

/// The caller already has a group under `op`.
///
/// Fields the access-control sub-queries share with the caller's sub-queries
/// must agree. An `$and` group takes every access-control sub-query it does
/// not already imply. An `$or` group is never widened: the access-control
/// alternatives are conjoined through the caller's `$and` instead.
fn cross_check(
    caller: &mut Query,
    op: LogicalOperator,
    access: &[Query],
    conflicts: &mut Vec<MergeConflict>,
) {
    let existing = caller.group(op).unwrap_or_default();

    let referenced: Vec<(&str, &QueryNode)> =
        existing.iter().flat_map(|child| child.fields()).collect();

    let mut additions = Vec::new();
    for child in access {
        if existing.contains(child) {
            continue;
        }

        let mut implied = true;
        for (field, node) in child.iter() {
            let requested: Vec<&QueryNode> = referenced
                .iter()
                .filter(|(name, _)| *name == field)
                .map(|(_, n)| *n)
                .collect();

            if requested.contains(&node) {
                continue;
            }
            implied = false;

            if let Some(first) = requested.first()
                && !node.is_group()
            {
                conflicts.push(MergeConflict {
                    field: field.to_string(),
                    location: ConflictLocation::Logical(op),
                    requested: (*first).clone(),
                    enforced: node.clone(),
                    overridden: false,
                });
            }
        }

        if !implied {
            additions.push(child.clone());
        }
    }

    match op {
        LogicalOperator::And => {
            if let Some(group) = caller.group_mut(LogicalOperator::And) {
                group.extend(additions);
            }
        }
        LogicalOperator::Or => {
            if existing.len() == access.len() && access.iter().all(|c| existing.contains(c)) {
                return;
            }
            let mut alternatives = Query::new();
            alternatives.insert_group(LogicalOperator::Or, access.to_vec());
            conjoin(caller, alternatives);
        }
    }
}

/// The caller has no group under `op`.
///
/// A top-level caller field that the access-control sub-queries constrain
/// differently is removed in favour of the access-control group, then the
/// group is installed.
fn prioritise(
    caller: &mut Query,
    op: LogicalOperator,
    access: &[Query],
    conflicts: &mut Vec<MergeConflict>,
) {
    let overridden: Vec<(String, QueryNode, QueryNode)> = caller
        .fields()
        .filter_map(|(field, requested)| {
            let enforced: Vec<&QueryNode> = access.iter().filter_map(|c| c.get(field)).collect();
            if enforced.is_empty() || enforced.contains(&requested) {
                return None;
            }
            Some((field.to_string(), requested.clone(), enforced[0].clone()))
        })
        .collect();

    for (field, requested, enforced) in overridden {
        caller.remove(&field);
        conflicts.push(MergeConflict {
            field,
            location: ConflictLocation::TopLevel,
            requested,
            enforced,
            overridden: true,
        });
    }

    caller.insert_group(op, access.to_vec());
}

/// Merges a plain field constraint.
fn merge_field(
    caller: &mut Query,
    field: &str,
    enforced: &QueryNode,
    conflicts: &mut Vec<MergeConflict>,
) {
    let mut implied_by_and = false;
    for (op, requested) in caller.find_in_groups(field) {
        if requested == enforced {
            implied_by_and |= op == LogicalOperator::And;
            continue;
        }
        conflicts.push(MergeConflict {
            field: field.to_string(),
            location: ConflictLocation::Logical(op),
            requested: requested.clone(),
            enforced: enforced.clone(),
            overridden: false,
        });
    }

    match caller.get(field) {
        Some(requested) if requested == enforced => {}
        Some(requested) => {
            conflicts.push(MergeConflict {
                field: field.to_string(),
                location: ConflictLocation::TopLevel,
                requested: requested.clone(),
                enforced: enforced.clone(),
                overridden: true,
            });
            caller.insert(field, enforced.clone());
        }
        None if implied_by_and => {}
        None => {
            caller.insert(field, enforced.clone());
        }
    }
}

/// Adds `clause` to the caller's `$and` group, creating it if needed.
fn conjoin(caller: &mut Query, clause: Query) {
    match caller.group_mut(LogicalOperator::And) {
        Some(group) => {
            if !group.contains(&clause) {
                group.push(clause);
            }
        }
        None => {
            caller.insert_group(LogicalOperator::And, vec![clause]);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
