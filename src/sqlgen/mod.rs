//! # SQL Builder
//!
//! Assembles the two batched pushdown statements from per-rule
//! fragments:
//!
//! - *Phase A* (fail-fast): one `SELECT EXISTS(...) AS <alias>, ...` for
//!   every eligible `tally=false` rule.
//! - *Phase B* (aggregate): one
//!   `SELECT SUM(CASE WHEN <pred> THEN 1 ELSE 0 END) AS <alias>, ...,
//!   COUNT(*) AS __row_count__ FROM <t>`.
//!
//! Aliases are rule ids, quoted per dialect. One round-trip per phase.

pub mod custom;
pub mod dialect;
pub mod emit;

pub use custom::validate_custom_sql;
pub use dialect::{literal, quote_ident, quote_str, relation_sql};
pub use emit::{emit, RuleSql};

use crate::dataset::Dialect;
use crate::driver::RelationTerm;
use crate::error::KontraResult;

/// Alias carrying the batched total row count
pub const ROW_COUNT_ALIAS: &str = "__row_count__";

/// A rule's compiled SQL translation plus its batching knobs
#[derive(Debug, Clone)]
pub struct CompiledRuleSql {
    pub rule_id: String,
    pub sql: RuleSql,
    pub tally: bool,
}

/// The batched statements for one validation call
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    /// Phase A statement; aliases bind booleans
    pub exists_sql: Option<String>,
    /// Rule ids in phase A select-list order
    pub exists_aliases: Vec<String>,
    /// Phase B statement; aliases bind counts/flags
    pub aggregate_sql: Option<String>,
    /// Rule ids in phase B select-list order (row count excluded)
    pub aggregate_aliases: Vec<String>,
    /// Rules resolved purely from `__row_count__`
    pub row_count_rules: Vec<String>,
    /// Whether phase B carries the `__row_count__` alias
    pub includes_row_count: bool,
}

/// Build the phase A / phase B statements. `needs_row_count` forces the
/// row-count alias even when no rule consumes it (total_rows reporting).
pub fn build_batches(
    dialect: Dialect,
    relation: &RelationTerm,
    compiled: &[CompiledRuleSql],
    needs_row_count: bool,
) -> KontraResult<BatchPlan> {
    let rel = relation_sql(dialect, relation)?;
    let mut plan = BatchPlan::default();
    let mut exists_items: Vec<String> = Vec::new();
    let mut agg_items: Vec<String> = Vec::new();
    let mut subquery_seq = 0usize;

    for rule in compiled {
        let alias = quote_ident(dialect, &rule.rule_id);
        match (&rule.sql, rule.tally) {
            (RuleSql::Predicate(pred), false) => {
                exists_items.push(format!(
                    "{} AS {alias}",
                    exists_expr(dialect, &format!("SELECT 1 FROM {rel} WHERE {pred}"))
                ));
                plan.exists_aliases.push(rule.rule_id.clone());
            }
            (RuleSql::Predicate(pred), true) => {
                agg_items.push(format!(
                    "CAST(COALESCE(SUM(CASE WHEN {pred} THEN 1 ELSE 0 END), 0) AS BIGINT) AS {alias}"
                ));
                plan.aggregate_aliases.push(rule.rule_id.clone());
            }
            (RuleSql::ViolationQuery(query), false) => {
                subquery_seq += 1;
                exists_items.push(format!(
                    "{} AS {alias}",
                    exists_expr(
                        dialect,
                        &format!("SELECT 1 FROM ({query}) AS _kontra_{subquery_seq}")
                    )
                ));
                plan.exists_aliases.push(rule.rule_id.clone());
            }
            (RuleSql::ViolationQuery(query), true) => {
                subquery_seq += 1;
                agg_items.push(format!(
                    "CAST((SELECT COUNT(*) FROM ({query}) AS _kontra_{subquery_seq}) AS BIGINT) AS {alias}"
                ));
                plan.aggregate_aliases.push(rule.rule_id.clone());
            }
            (RuleSql::AggregateCount(expr), _) | (RuleSql::AggregateFlag(expr), _) => {
                agg_items.push(format!("{expr} AS {alias}"));
                plan.aggregate_aliases.push(rule.rule_id.clone());
            }
            (RuleSql::RowCount, _) => {
                plan.row_count_rules.push(rule.rule_id.clone());
            }
            (RuleSql::Unsupported(_), _) => {
                // Filtered out by the planner; tolerated defensively here
            }
        }
    }

    if !exists_items.is_empty() {
        plan.exists_sql = Some(format!("SELECT {}", exists_items.join(", ")));
    }

    let needs_count = needs_row_count || !plan.row_count_rules.is_empty();
    if !agg_items.is_empty() || needs_count {
        if needs_count {
            agg_items.push(format!(
                "CAST(COUNT(*) AS BIGINT) AS {}",
                quote_ident(dialect, ROW_COUNT_ALIAS)
            ));
            plan.includes_row_count = true;
        }
        plan.aggregate_sql = Some(format!("SELECT {} FROM {rel}", agg_items.join(", ")));
    }

    Ok(plan)
}

/// `EXISTS(...)` binds as a boolean on duckdb/postgres; T-SQL needs the
/// CASE wrapper to make it a selectable 1/0
fn exists_expr(dialect: Dialect, subquery: &str) -> String {
    match dialect {
        Dialect::Mssql => format!("CASE WHEN EXISTS({subquery}) THEN 1 ELSE 0 END"),
        _ => format!("EXISTS({subquery})"),
    }
}
