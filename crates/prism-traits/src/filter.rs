//! Filter expression trees over identity metadata.
//!
//! Filters are evaluated against a [`Metadata`] map with strict type
//! matching (see [`Value`]). Unknown fields evaluate to false, except where
//! negation or `exists` makes absence meaningful. Depth and clause count are
//! bounded; oversized filters are rejected before evaluation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use crate::value::{Metadata, Value};

/// Default maximum expression tree depth.
pub const DEFAULT_MAX_DEPTH: usize = 5;
/// Default maximum number of leaf clauses.
pub const DEFAULT_MAX_CLAUSES: usize = 20;

/// Errors from filter validation.
#[derive(Debug, Error)]
pub enum FilterError {
    /// Expression nesting exceeds the configured maximum.
    #[error("filter depth {depth} exceeds maximum {max}")]
    TooDeep {
        /// Observed depth.
        depth: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Leaf clause count exceeds the configured maximum.
    #[error("filter has {count} clauses, maximum is {max}")]
    TooManyClauses {
        /// Observed clause count.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// A filter expression tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// Field equals value (same tag required).
    Eq {
        /// Metadata field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// Field differs from value. True when the field is absent.
    Ne {
        /// Metadata field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// Field is strictly less than value.
    Lt {
        /// Metadata field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// Field is less than or equal to value.
    Le {
        /// Metadata field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// Field is strictly greater than value.
    Gt {
        /// Metadata field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// Field is greater than or equal to value.
    Ge {
        /// Metadata field name.
        field: String,
        /// Value to compare against.
        value: Value,
    },
    /// String field starts with the given prefix.
    StartsWith {
        /// Metadata field name.
        field: String,
        /// Required prefix.
        value: String,
    },
    /// String field ends with the given suffix.
    EndsWith {
        /// Metadata field name.
        field: String,
        /// Required suffix.
        value: String,
    },
    /// String field contains the given substring.
    Contains {
        /// Metadata field name.
        field: String,
        /// Required substring.
        value: String,
    },
    /// Field is present, regardless of value.
    Exists {
        /// Metadata field name.
        field: String,
    },
    /// All clauses match.
    And {
        /// Conjunction members.
        clauses: Vec<Filter>,
    },
    /// At least one clause matches.
    Or {
        /// Disjunction members.
        clauses: Vec<Filter>,
    },
    /// Clause does not match.
    Not {
        /// Negated clause.
        clause: Box<Filter>,
    },
}

impl Filter {
    /// Evaluate this filter against a metadata map.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq { field, value } => metadata
                .get(field)
                .map(|v| v.strict_eq(value))
                .unwrap_or(false),
            Self::Ne { field, value } => metadata
                .get(field)
                .map(|v| !v.strict_eq(value))
                .unwrap_or(true),
            Self::Lt { field, value } => Self::ordered(metadata, field, value, Ordering::is_lt),
            Self::Le { field, value } => Self::ordered(metadata, field, value, Ordering::is_le),
            Self::Gt { field, value } => Self::ordered(metadata, field, value, Ordering::is_gt),
            Self::Ge { field, value } => Self::ordered(metadata, field, value, Ordering::is_ge),
            Self::StartsWith { field, value } => {
                Self::string_op(metadata, field, |s| s.starts_with(value.as_str()))
            }
            Self::EndsWith { field, value } => {
                Self::string_op(metadata, field, |s| s.ends_with(value.as_str()))
            }
            Self::Contains { field, value } => {
                Self::string_op(metadata, field, |s| s.contains(value.as_str()))
            }
            Self::Exists { field } => metadata.contains_key(field),
            Self::And { clauses } => clauses.iter().all(|c| c.matches(metadata)),
            Self::Or { clauses } => clauses.iter().any(|c| c.matches(metadata)),
            Self::Not { clause } => !clause.matches(metadata),
        }
    }

    /// Validate depth and clause count against the given bounds.
    pub fn validate(&self, max_depth: usize, max_clauses: usize) -> Result<(), FilterError> {
        let depth = self.depth();
        if depth > max_depth {
            return Err(FilterError::TooDeep {
                depth,
                max: max_depth,
            });
        }
        let count = self.clause_count();
        if count > max_clauses {
            return Err(FilterError::TooManyClauses {
                count,
                max: max_clauses,
            });
        }
        Ok(())
    }

    /// Depth of the expression tree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        match self {
            Self::And { clauses } | Self::Or { clauses } => {
                1 + clauses.iter().map(Self::depth).max().unwrap_or(0)
            }
            Self::Not { clause } => 1 + clause.depth(),
            _ => 1,
        }
    }

    /// Number of leaf clauses in the expression tree.
    pub fn clause_count(&self) -> usize {
        match self {
            Self::And { clauses } | Self::Or { clauses } => {
                clauses.iter().map(Self::clause_count).sum()
            }
            Self::Not { clause } => clause.clause_count(),
            _ => 1,
        }
    }

    fn ordered(
        metadata: &Metadata,
        field: &str,
        value: &Value,
        accept: fn(Ordering) -> bool,
    ) -> bool {
        metadata
            .get(field)
            .and_then(|v| v.compare(value))
            .map(accept)
            .unwrap_or(false)
    }

    fn string_op(metadata: &Metadata, field: &str, op: impl Fn(&str) -> bool) -> bool {
        metadata
            .get(field)
            .and_then(Value::as_str)
            .map(op)
            .unwrap_or(false)
    }
}
