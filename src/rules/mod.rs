//! # Rule Taxonomy
//!
//! The closed set of built-in rule variants, each owning its typed
//! parameter record and its capability surface:
//!
//! - `required_columns()` — columns the rule reads
//! - `supports_metadata(dialect)` — eligible for the metadata preplan
//! - `supports_sql(dialect)` — has a SQL emitter for the dialect
//! - `semantics(dialect)` — strict or approximate SQL translation
//!
//! The planner and SQL builder dispatch on the variant tag and these
//! flags only; they never switch on rule names.

pub mod identity;
pub mod registry;

pub use identity::{derive_rule_id, detect_collisions};
pub use registry::Registry;

use crate::contract::Severity;
use crate::dataset::Dialect;
use crate::value::{DataType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Rule scope: what a rule is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Exposes exactly one column
    Column,
    /// Exposes two or more column references
    CrossColumn,
    /// No column; reads the dataset as a whole
    Dataset,
}

/// SQL translation fidelity for a (rule, dialect) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    /// SQL outcome agrees bit-for-bit with the local evaluator
    Strict,
    /// Dialect translation may diverge on edge inputs; only pushed down
    /// when approximate semantics are explicitly enabled
    Approximate,
}

/// Comparison operator for `compare` and `when` clauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            "=" | "==" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    /// SQL rendering (shared by all dialects)
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
        }
    }

    /// Apply to an ordering outcome (coerced comparison already done)
    pub fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Gt => ordering == Greater,
            CompareOp::Ge => ordering != Less,
            CompareOp::Lt => ordering == Less,
            CompareOp::Le => ordering != Greater,
            CompareOp::Eq => ordering == Equal,
            CompareOp::Ne => ordering != Equal,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Restricted `when` predicate: `column op literal`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

/// The closed rule variant set. Each variant carries its validated,
/// typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    NotNull {
        column: String,
        include_nan: bool,
    },
    Unique {
        column: String,
    },
    AllowedValues {
        column: String,
        values: Vec<Value>,
    },
    DisallowedValues {
        column: String,
        values: Vec<Value>,
    },
    Range {
        column: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    Length {
        column: String,
        min: Option<u64>,
        max: Option<u64>,
    },
    Regex {
        column: String,
        pattern: String,
    },
    Contains {
        column: String,
        literal: String,
    },
    StartsWith {
        column: String,
        literal: String,
    },
    EndsWith {
        column: String,
        literal: String,
    },
    Dtype {
        column: String,
        expected: DataType,
    },
    Compare {
        left: String,
        right: String,
        op: CompareOp,
    },
    ConditionalNotNull {
        column: String,
        when: WhenClause,
    },
    ConditionalRange {
        column: String,
        when: WhenClause,
        min: Option<Value>,
        max: Option<Value>,
    },
    MinRows {
        threshold: u64,
    },
    MaxRows {
        threshold: u64,
    },
    Freshness {
        column: String,
        max_age_seconds: i64,
    },
    CustomSqlCheck {
        sql: String,
    },
}

impl RuleKind {
    /// The variant tag as declared in contracts
    pub fn variant_name(&self) -> &'static str {
        match self {
            RuleKind::NotNull { .. } => "not_null",
            RuleKind::Unique { .. } => "unique",
            RuleKind::AllowedValues { .. } => "allowed_values",
            RuleKind::DisallowedValues { .. } => "disallowed_values",
            RuleKind::Range { .. } => "range",
            RuleKind::Length { .. } => "length",
            RuleKind::Regex { .. } => "regex",
            RuleKind::Contains { .. } => "contains",
            RuleKind::StartsWith { .. } => "starts_with",
            RuleKind::EndsWith { .. } => "ends_with",
            RuleKind::Dtype { .. } => "dtype",
            RuleKind::Compare { .. } => "compare",
            RuleKind::ConditionalNotNull { .. } => "conditional_not_null",
            RuleKind::ConditionalRange { .. } => "conditional_range",
            RuleKind::MinRows { .. } => "min_rows",
            RuleKind::MaxRows { .. } => "max_rows",
            RuleKind::Freshness { .. } => "freshness",
            RuleKind::CustomSqlCheck { .. } => "custom_sql_check",
        }
    }

    pub fn scope(&self) -> RuleScope {
        match self {
            RuleKind::NotNull { .. }
            | RuleKind::Unique { .. }
            | RuleKind::AllowedValues { .. }
            | RuleKind::DisallowedValues { .. }
            | RuleKind::Range { .. }
            | RuleKind::Length { .. }
            | RuleKind::Regex { .. }
            | RuleKind::Contains { .. }
            | RuleKind::StartsWith { .. }
            | RuleKind::EndsWith { .. }
            | RuleKind::Dtype { .. } => RuleScope::Column,
            RuleKind::Compare { .. }
            | RuleKind::ConditionalNotNull { .. }
            | RuleKind::ConditionalRange { .. } => RuleScope::CrossColumn,
            RuleKind::MinRows { .. }
            | RuleKind::MaxRows { .. }
            | RuleKind::CustomSqlCheck { .. } => RuleScope::Dataset,
            // Dataset-scoped but reads one column
            RuleKind::Freshness { .. } => RuleScope::Dataset,
        }
    }

    /// The single column a column-scoped rule exposes (also exposed by
    /// `freshness`, whose aggregate reads one column)
    pub fn column(&self) -> Option<&str> {
        match self {
            RuleKind::NotNull { column, .. }
            | RuleKind::Unique { column }
            | RuleKind::AllowedValues { column, .. }
            | RuleKind::DisallowedValues { column, .. }
            | RuleKind::Range { column, .. }
            | RuleKind::Length { column, .. }
            | RuleKind::Regex { column, .. }
            | RuleKind::Contains { column, .. }
            | RuleKind::StartsWith { column, .. }
            | RuleKind::EndsWith { column, .. }
            | RuleKind::Dtype { column, .. }
            | RuleKind::Freshness { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Union of columns this rule reads. Empty for pure dataset rules.
    pub fn required_columns(&self) -> BTreeSet<String> {
        let mut cols = BTreeSet::new();
        match self {
            RuleKind::Compare { left, right, .. } => {
                cols.insert(left.clone());
                cols.insert(right.clone());
            }
            RuleKind::ConditionalNotNull { column, when } => {
                cols.insert(column.clone());
                cols.insert(when.column.clone());
            }
            RuleKind::ConditionalRange { column, when, .. } => {
                cols.insert(column.clone());
                cols.insert(when.column.clone());
            }
            RuleKind::MinRows { .. } | RuleKind::MaxRows { .. } | RuleKind::CustomSqlCheck { .. } => {}
            other => {
                if let Some(c) = other.column() {
                    cols.insert(c.to_string());
                }
            }
        }
        cols
    }

    /// Whether the metadata preplan may attempt this rule on a handle of
    /// the given dialect. A `true` here is a gate, not a promise: the
    /// preplan still returns `Undecided` when the statistics are absent.
    pub fn supports_metadata(&self, dialect: Dialect) -> bool {
        match dialect {
            // File-backed handles: Parquet footer statistics
            Dialect::DuckDb => matches!(
                self,
                RuleKind::NotNull { .. }
                    | RuleKind::Range { .. }
                    | RuleKind::MinRows { .. }
                    | RuleKind::MaxRows { .. }
                    | RuleKind::Dtype { .. }
            ),
            // Constraint-backed catalog facts only
            Dialect::Postgres => matches!(
                self,
                RuleKind::NotNull { .. } | RuleKind::Unique { .. } | RuleKind::Dtype { .. }
            ),
            Dialect::Mssql => {
                matches!(self, RuleKind::NotNull { .. } | RuleKind::Dtype { .. })
            }
            Dialect::None => false,
        }
    }

    /// Whether a SQL emitter exists for this rule on the given dialect
    pub fn supports_sql(&self, dialect: Dialect) -> bool {
        if dialect == Dialect::None {
            return false;
        }
        match self {
            RuleKind::Dtype { .. } => false,
            RuleKind::Length { .. } => dialect != Dialect::Mssql,
            RuleKind::Regex { .. } => dialect != Dialect::Mssql,
            RuleKind::NotNull { include_nan, .. } => !(*include_nan && dialect == Dialect::Mssql),
            _ => true,
        }
    }

    /// Strict vs approximate classification, per emitter
    pub fn semantics(&self, dialect: Dialect) -> Semantics {
        match self {
            RuleKind::Regex { pattern, .. } => {
                if regex_translates_exactly(pattern, dialect) {
                    Semantics::Strict
                } else {
                    Semantics::Approximate
                }
            }
            _ => Semantics::Strict,
        }
    }
}

/// Whether a pattern stays inside the regex subset that the dialect's
/// engine (RE2 for DuckDB, POSIX for Postgres) evaluates identically to
/// the local `regex` crate. Named groups, lookaround, and backreferences
/// fall outside for every dialect.
pub fn regex_translates_exactly(pattern: &str, dialect: Dialect) -> bool {
    let exotic = pattern.contains("(?P<")
        || pattern.contains("(?<")
        || pattern.contains("(?=")
        || pattern.contains("(?!")
        || pattern.contains("\\p{")
        || pattern.contains("\\b");
    match dialect {
        Dialect::DuckDb | Dialect::Postgres => !exotic,
        Dialect::Mssql | Dialect::None => false,
    }
}

/// A fully validated rule: identity, variant, and execution knobs
#[derive(Debug, Clone)]
pub struct Rule {
    /// Stable identifier, unique within a contract
    pub rule_id: String,
    pub kind: RuleKind,
    pub severity: Severity,
    /// Resolved exact-count requirement (CLI override > per-rule > API
    /// default > false); resolution happens in the planner
    pub tally: bool,
    /// Per-rule sample cap
    pub sample: usize,
    /// Opaque consumer context, forwarded untouched
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        self.kind.variant_name()
    }

    pub fn column(&self) -> Option<&str> {
        self.kind.column()
    }
}
