//! # Execution Options
//!
//! Per-call knobs of the validation invocation. Defaults come from the
//! engine [`crate::config::Config`]; callers override per call.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tier enablement: `Auto` lets the planner decide per rule, `On`
/// behaves like `Auto` today (both attempt eligible rules), `Off`
/// removes the tier entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierMode {
    On,
    Off,
    #[default]
    Auto,
}

impl TierMode {
    pub fn enabled(&self) -> bool {
        !matches!(self, TierMode::Off)
    }
}

/// Which columns sample rows carry (besides `_row_index`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SampleColumns {
    /// The failing rule's own required columns
    #[default]
    Relevant,
    /// An explicit caller-selected column list
    Columns(Vec<String>),
}

/// Options of one validation call
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub preplan: TierMode,
    pub pushdown: TierMode,
    /// Restrict materialization to required columns
    pub projection: bool,
    /// Default for rules without an explicit `tally`
    pub tally_default: bool,
    /// Caller-side override beating every per-rule setting
    pub tally_override: Option<bool>,
    /// Per-rule sample cap default
    pub sample: usize,
    /// Per-call total sample budget
    pub sample_budget: usize,
    pub sample_columns: SampleColumns,
    /// Push rules with approximate SQL translations down anyway
    pub approximate_sql: bool,
    /// `IN (...)` list size cap before demotion to local
    pub in_list_max: usize,
    /// Compile the plan, skip all execution
    pub dry_run: bool,
    /// Per-call deadline; exceeded deadlines abort at the next I/O
    pub deadline: Option<Duration>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions {
            preplan: TierMode::Auto,
            pushdown: TierMode::Auto,
            projection: true,
            tally_default: false,
            tally_override: None,
            sample: 0,
            sample_budget: 0,
            sample_columns: SampleColumns::Relevant,
            approximate_sql: false,
            in_list_max: 1000,
            dry_run: false,
            deadline: None,
        }
    }
}

impl ExecutionOptions {
    /// Effective tally for a rule: override > per-rule > call default
    pub fn resolve_tally(&self, per_rule: Option<bool>) -> bool {
        self.tally_override
            .or(per_rule)
            .unwrap_or(self.tally_default)
    }

    /// Effective per-rule sample cap
    pub fn resolve_sample(&self, per_rule: Option<usize>) -> usize {
        per_rule.unwrap_or(self.sample)
    }
}
