//! # SQL Pushdown Executor
//!
//! Runs the two batched statements built by the SQL builder and binds
//! alias values back to rule ids. At most two round-trips: phase A
//! (fail-fast EXISTS) then phase B (aggregates + `__row_count__`).
//!
//! A failing statement silently demotes every rule it was carrying to
//! the local executor; the demotion is recorded for execution stats but
//! never surfaced to the caller unless the fallback also fails.

use crate::driver::{query_single_row, RelationTerm, SqlRunner};
use crate::rules::{Rule, RuleKind};
use crate::sqlgen::{build_batches, BatchPlan, CompiledRuleSql, RuleSql};
use crate::value::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome for one rule resolved by SQL
#[derive(Debug, Clone, PartialEq)]
pub struct SqlOutcome {
    pub failed_count: u64,
    pub exact: bool,
}

/// Everything the pushdown tier produced
#[derive(Debug, Default)]
pub struct PushdownReport {
    /// (rule_id, outcome) for rules a statement resolved
    pub outcomes: Vec<(String, SqlOutcome)>,
    /// Exact dataset row count when phase B carried it
    pub row_count: Option<u64>,
    /// Rules demoted to local after a statement failure
    pub demoted: Vec<String>,
    /// Driver errors behind demotions, for the execution stats
    pub errors: Vec<String>,
}

/// Execute the pushdown tier for the still-open SQL candidates
pub fn run_pushdown(
    runner: &mut dyn SqlRunner,
    relation: &RelationTerm,
    rules: &[&Rule],
    compiled: &HashMap<String, RuleSql>,
    needs_row_count: bool,
) -> PushdownReport {
    let mut report = PushdownReport::default();

    let batch_input: Vec<CompiledRuleSql> = rules
        .iter()
        .filter_map(|rule| {
            compiled.get(&rule.rule_id).map(|sql| CompiledRuleSql {
                rule_id: rule.rule_id.clone(),
                sql: sql.clone(),
                tally: rule.tally,
            })
        })
        .collect();
    if batch_input.is_empty() && !needs_row_count {
        return report;
    }

    let dialect = runner.dialect();
    let plan = match build_batches(dialect, relation, &batch_input, needs_row_count) {
        Ok(plan) => plan,
        Err(e) => {
            warn!(error = %e, "batch assembly failed; demoting all sql candidates");
            report.errors.push(e.to_string());
            report
                .demoted
                .extend(rules.iter().map(|r| r.rule_id.clone()));
            return report;
        }
    };

    run_phase_a(runner, &plan, &mut report);
    run_phase_b(runner, &plan, rules, compiled, &mut report);
    report
}

fn run_phase_a(runner: &mut dyn SqlRunner, plan: &BatchPlan, report: &mut PushdownReport) {
    let sql = match &plan.exists_sql {
        Some(sql) => sql,
        None => return,
    };
    debug!(%sql, "pushdown phase A");
    match query_single_row(runner, sql) {
        Ok(row) => {
            for (alias, value) in plan.exists_aliases.iter().zip(row) {
                let failed = value_truthy(&value);
                report.outcomes.push((
                    alias.clone(),
                    SqlOutcome {
                        failed_count: u64::from(failed),
                        // EXISTS-derived counts are never exact
                        exact: false,
                    },
                ));
            }
        }
        Err(e) => {
            warn!(error = %e, "phase A failed; demoting its rules");
            report.errors.push(e.to_string());
            report.demoted.extend(plan.exists_aliases.iter().cloned());
        }
    }
}

fn run_phase_b(
    runner: &mut dyn SqlRunner,
    plan: &BatchPlan,
    rules: &[&Rule],
    compiled: &HashMap<String, RuleSql>,
    report: &mut PushdownReport,
) {
    let sql = match &plan.aggregate_sql {
        Some(sql) => sql,
        None => return,
    };
    debug!(%sql, "pushdown phase B");
    let row = match query_single_row(runner, sql) {
        Ok(row) => row,
        Err(e) => {
            warn!(error = %e, "phase B failed; demoting its rules");
            report.errors.push(e.to_string());
            report.demoted.extend(plan.aggregate_aliases.iter().cloned());
            report.demoted.extend(plan.row_count_rules.iter().cloned());
            return;
        }
    };

    // Row layout: aggregate aliases in order, then __row_count__ last
    // when included
    let row_count = if plan.includes_row_count {
        row.last().and_then(value_count)
    } else {
        None
    };
    report.row_count = row_count;

    for (alias, value) in plan.aggregate_aliases.iter().zip(row.iter()) {
        let is_flag = matches!(compiled.get(alias), Some(RuleSql::AggregateFlag(_)));
        let count = match value_count(value) {
            Some(count) => count,
            None => {
                warn!(alias, ?value, "unbindable aggregate value; demoting");
                report.demoted.push(alias.clone());
                continue;
            }
        };
        let outcome = if is_flag {
            // Flags are definite aggregate facts (e.g. freshness)
            SqlOutcome {
                failed_count: u64::from(count > 0),
                exact: true,
            }
        } else {
            SqlOutcome {
                failed_count: count,
                exact: true,
            }
        };
        report.outcomes.push((alias.clone(), outcome));
    }

    // Row-count rules bind against the batched COUNT(*)
    if !plan.row_count_rules.is_empty() {
        match row_count {
            Some(rows) => {
                for rule in rules {
                    if !plan.row_count_rules.contains(&rule.rule_id) {
                        continue;
                    }
                    let failed = match &rule.kind {
                        RuleKind::MinRows { threshold } => threshold.saturating_sub(rows),
                        RuleKind::MaxRows { threshold } => rows.saturating_sub(*threshold),
                        _ => continue,
                    };
                    report.outcomes.push((
                        rule.rule_id.clone(),
                        SqlOutcome {
                            failed_count: failed,
                            exact: true,
                        },
                    ));
                }
            }
            None => {
                report.demoted.extend(plan.row_count_rules.iter().cloned());
            }
        }
    }
}

fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        _ => false,
    }
}

fn value_count(value: &Value) -> Option<u64> {
    match value {
        Value::Int(i) => Some((*i).max(0) as u64),
        Value::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f as u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Severity;
    use crate::dataset::Dialect;
    use crate::driver::DuckDbRunner;

    fn rule(id: &str, kind: RuleKind, tally: bool) -> Rule {
        Rule {
            rule_id: id.to_string(),
            kind,
            severity: Severity::Blocking,
            tally,
            sample: 0,
            context: serde_json::Map::new(),
        }
    }

    fn outcome(report: &PushdownReport, id: &str) -> SqlOutcome {
        report
            .outcomes
            .iter()
            .find(|(rid, _)| rid == id)
            .map(|(_, o)| o.clone())
            .unwrap()
    }

    /// Two-phase execution against an in-process DuckDB relation
    #[test]
    fn test_two_phase_against_duckdb() {
        let mut runner = DuckDbRunner::in_memory().unwrap();
        runner
            .query_rows(
                "CREATE TABLE main.users AS \
                 SELECT * FROM (VALUES (1, 'a@x.io'), (2, NULL), (3, NULL)) AS t(id, email)",
            )
            .unwrap();
        let relation = RelationTerm::Table {
            schema: "main".into(),
            table: "users".into(),
        };

        let fast = rule(
            "fast",
            RuleKind::NotNull {
                column: "email".into(),
                include_nan: false,
            },
            false,
        );
        let exact = rule(
            "exact",
            RuleKind::NotNull {
                column: "email".into(),
                include_nan: false,
            },
            true,
        );
        let min_rows = rule("rows", RuleKind::MinRows { threshold: 10 }, true);

        let mut compiled = HashMap::new();
        for r in [&fast, &exact, &min_rows] {
            let sql = crate::sqlgen::emit(&r.kind, Dialect::DuckDb, "t", 1000).unwrap();
            compiled.insert(r.rule_id.clone(), sql);
        }

        let rules: Vec<&Rule> = vec![&fast, &exact, &min_rows];
        let report = run_pushdown(&mut runner, &relation, &rules, &compiled, true);

        assert!(report.demoted.is_empty());
        assert_eq!(report.row_count, Some(3));
        assert_eq!(
            outcome(&report, "fast"),
            SqlOutcome {
                failed_count: 1,
                exact: false
            }
        );
        assert_eq!(
            outcome(&report, "exact"),
            SqlOutcome {
                failed_count: 2,
                exact: true
            }
        );
        assert_eq!(
            outcome(&report, "rows"),
            SqlOutcome {
                failed_count: 7,
                exact: true
            }
        );
    }

    #[test]
    fn test_statement_failure_demotes_batch() {
        let mut runner = DuckDbRunner::in_memory().unwrap();
        // Relation does not exist: both phases fail
        let relation = RelationTerm::Table {
            schema: "main".into(),
            table: "missing".into(),
        };
        let fast = rule(
            "fast",
            RuleKind::NotNull {
                column: "email".into(),
                include_nan: false,
            },
            false,
        );
        let exact = rule(
            "exact",
            RuleKind::NotNull {
                column: "email".into(),
                include_nan: false,
            },
            true,
        );
        let mut compiled = HashMap::new();
        for r in [&fast, &exact] {
            compiled.insert(
                r.rule_id.clone(),
                crate::sqlgen::emit(&r.kind, Dialect::DuckDb, "t", 1000).unwrap(),
            );
        }
        let rules: Vec<&Rule> = vec![&fast, &exact];
        let report = run_pushdown(&mut runner, &relation, &rules, &compiled, false);

        assert!(report.outcomes.is_empty());
        assert_eq!(report.demoted.len(), 2);
        assert!(!report.errors.is_empty());
    }

    #[test]
    fn test_unique_aggregate_binding() {
        let mut runner = DuckDbRunner::in_memory().unwrap();
        runner
            .query_rows(
                "CREATE TABLE main.t AS SELECT * FROM (VALUES (1), (1), (2), (NULL)) AS t(id)",
            )
            .unwrap();
        let relation = RelationTerm::Table {
            schema: "main".into(),
            table: "t".into(),
        };
        let unique = rule("u", RuleKind::Unique { column: "id".into() }, true);
        let mut compiled = HashMap::new();
        compiled.insert(
            "u".to_string(),
            crate::sqlgen::emit(&unique.kind, Dialect::DuckDb, "t", 1000).unwrap(),
        );
        let rules: Vec<&Rule> = vec![&unique];
        let report = run_pushdown(&mut runner, &relation, &rules, &compiled, false);
        // NULL excluded: 3 non-null rows, 2 distinct → 1 duplicate
        assert_eq!(
            outcome(&report, "u"),
            SqlOutcome {
                failed_count: 1,
                exact: true
            }
        );
    }
}
