//! # Result Surface
//!
//! `RuleResult` and `ValidationResult` with their stable JSON shapes.
//! The shapes are additive-only: consumers may rely on every field that
//! exists today keeping its name and meaning.

use crate::contract::Severity;
use serde::{Deserialize, Serialize};
use serde_json::Map;
use std::fmt;

/// Which tier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Metadata,
    Sql,
    Local,
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSource::Metadata => write!(f, "metadata"),
            ResultSource::Sql => write!(f, "sql"),
            ResultSource::Local => write!(f, "local"),
        }
    }
}

/// One sample failing row: `_row_index` plus projected column values.
/// For `unique` samples the keys are `_row_index`, `value`, `count`.
pub type SampleRow = Map<String, serde_json::Value>;

/// Per-rule measurement outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    /// Variant name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub severity: Severity,
    pub source: ResultSource,
    pub passed: bool,
    pub failed_count: u64,
    /// False when the count came from a fail-fast EXISTS path or a
    /// preplan lower bound
    pub failed_count_exact: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_rate: Option<f64>,
    pub message: String,
    /// Structured machine-readable failure data (bound values, expected
    /// types, raw flags)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<SampleRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_source: Option<ResultSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_weight: Option<f64>,
}

/// Per-call execution statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub planning_ms: u64,
    pub preplan_ms: u64,
    pub pushdown_ms: u64,
    pub fallback_ms: u64,
    pub total_ms: u64,
    /// Number of columns in the computed projection
    pub projected_columns: usize,
    /// Rows materialized by the fallback executor, when it ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialized_rows: Option<u64>,
    /// Tier assignment counts out of the planner
    pub metadata_candidates: usize,
    pub sql_candidates: usize,
    pub fallback_assigned: usize,
    /// Tier resolution counts out of the merger
    pub resolved_by_metadata: usize,
    pub resolved_by_sql: usize,
    pub evaluated_local: usize,
    /// Rules silently demoted from pushdown to local
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub demoted_rule_ids: Vec<String>,
}

/// The full outcome of one validation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Contract name
    pub contract: String,
    /// True iff every blocking rule passed
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,
    pub total_rules: usize,
    /// Number of rules that failed
    pub failed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// One result per declared rule, in declared order
    pub rules: Vec<RuleResult>,
    pub stats: ExecutionStats,
}

impl ValidationResult {
    /// Failed rules in declared order
    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleResult> {
        self.rules.iter().filter(|r| !r.passed)
    }
}
