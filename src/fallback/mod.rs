//! # Fallback (Columnar) Executor
//!
//! Evaluates the rules still open after preplan and pushdown, including
//! silently demoted rules, against a projected columnar frame. Row-level
//! rules run as compiled violation masks; aggregate rules (unique,
//! dtype, row counts, freshness) read the frame directly.
//!
//! Rules evaluate in parallel on a bounded rayon pool. The parallelism
//! is not observable: outcomes key by rule id and the merger restores
//! the declared order, and sample `_row_index` values reference the
//! frame's stable row order.

pub mod predicate;
pub mod samples;

pub use predicate::{compile, is_row_level, CompiledPredicate};

use crate::error::KontraResult;
use crate::frame::{ColumnData, ColumnarFrame};
use crate::options::SampleColumns;
use crate::result::SampleRow;
use crate::rules::{Rule, RuleKind};
use crate::value::Value;
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of evaluating one rule locally
#[derive(Debug, Clone)]
pub enum LocalEval {
    Counted {
        failed_count: u64,
        exact: bool,
        details: Option<serde_json::Value>,
    },
    /// Per-rule evaluation error; other rules continue
    Errored { message: String },
}

/// Everything the local tier produced
#[derive(Debug, Default)]
pub struct FallbackReport {
    /// (rule_id, outcome) per evaluated rule
    pub outcomes: Vec<(String, LocalEval)>,
    /// Per-rule samples, capped per rule; the merger applies the global
    /// budget
    pub samples: HashMap<String, Vec<SampleRow>>,
    pub row_count: u64,
}

/// Evaluate rules against the materialized frame
pub fn run_fallback(
    frame: &ColumnarFrame,
    rules: &[&Rule],
    predicates: &HashMap<String, CompiledPredicate>,
    sample_columns: &SampleColumns,
    num_threads: usize,
) -> KontraResult<FallbackReport> {
    let mut report = FallbackReport {
        row_count: frame.num_rows() as u64,
        ..FallbackReport::default()
    };
    if rules.is_empty() {
        return Ok(report);
    }

    let evaluate_all = || {
        rules
            .par_iter()
            .map(|rule| evaluate_rule(frame, rule, predicates, sample_columns))
            .collect::<Vec<_>>()
    };

    let evaluated = if num_threads > 0 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| crate::error::KontraError::runtime(format!("worker pool: {e}")))?;
        pool.install(evaluate_all)
    } else {
        evaluate_all()
    };

    for (rule_id, eval, samples) in evaluated {
        if let Some(samples) = samples {
            report.samples.insert(rule_id.clone(), samples);
        }
        report.outcomes.push((rule_id, eval));
    }
    Ok(report)
}

fn evaluate_rule(
    frame: &ColumnarFrame,
    rule: &Rule,
    predicates: &HashMap<String, CompiledPredicate>,
    sample_columns: &SampleColumns,
) -> (String, LocalEval, Option<Vec<SampleRow>>) {
    let rule_id = rule.rule_id.clone();
    if is_row_level(&rule.kind) {
        let mask = match predicates.get(&rule_id) {
            Some(pred) => pred.mask(frame),
            None => compile(&rule.kind).and_then(|p| p.mask(frame)),
        };
        match mask {
            Ok(mask) => {
                let (eval, samples) = evaluate_mask(frame, rule, &mask, sample_columns);
                (rule_id, eval, samples)
            }
            Err(e) => {
                debug!(rule = %rule_id, error = %e, "local evaluation failed");
                (
                    rule_id,
                    LocalEval::Errored {
                        message: format!("error: {e}"),
                    },
                    None,
                )
            }
        }
    } else {
        let (eval, samples) = match evaluate_aggregate(frame, rule) {
            Ok(pair) => pair,
            Err(e) => {
                debug!(rule = %rule.rule_id, error = %e, "local evaluation failed");
                (
                    LocalEval::Errored {
                        message: format!("error: {e}"),
                    },
                    None,
                )
            }
        };
        (rule_id, eval, samples)
    }
}

fn evaluate_mask(
    frame: &ColumnarFrame,
    rule: &Rule,
    mask: &[bool],
    sample_columns: &SampleColumns,
) -> (LocalEval, Option<Vec<SampleRow>>) {
    let eval = if rule.tally {
        LocalEval::Counted {
            failed_count: mask.iter().filter(|&&v| v).count() as u64,
            exact: true,
            details: None,
        }
    } else {
        // Existence check: 0 or 1, never exact
        let any = mask.iter().any(|&v| v);
        LocalEval::Counted {
            failed_count: u64::from(any),
            exact: false,
            details: None,
        }
    };

    let samples = if rule.sample > 0 {
        let columns = samples::resolve_sample_columns(sample_columns, rule, frame);
        let collected = samples::collect_row_samples(frame, mask, rule.sample, &columns);
        (!collected.is_empty()).then_some(collected)
    } else {
        None
    };

    (eval, samples)
}

fn evaluate_aggregate(
    frame: &ColumnarFrame,
    rule: &Rule,
) -> KontraResult<(LocalEval, Option<Vec<SampleRow>>)> {
    match &rule.kind {
        RuleKind::Unique { column } => {
            let col = frame.column_required(column)?;
            // First-occurrence index and count per non-null value
            let mut seen: HashMap<Value, (usize, usize)> = HashMap::new();
            let mut order: Vec<Value> = Vec::new();
            for row in 0..frame.num_rows() {
                let value = col.value_at(row);
                if value.is_null() {
                    continue;
                }
                match seen.entry(value.clone()) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        entry.get_mut().1 += 1;
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert((row, 1));
                        order.push(value);
                    }
                }
            }
            // Duplicate occurrences: rows − distinct, NULLs excluded
            let non_null: usize = seen.values().map(|(_, c)| c).sum();
            let failed = (non_null - seen.len()) as u64;
            let duplicates: Vec<(usize, Value, usize)> = order
                .into_iter()
                .filter_map(|value| {
                    let (row, count) = seen[&value];
                    (count > 1).then_some((row, value, count))
                })
                .collect();
            let samples = (rule.sample > 0 && !duplicates.is_empty())
                .then(|| samples::collect_unique_samples(&duplicates, rule.sample));
            Ok((
                LocalEval::Counted {
                    failed_count: failed,
                    exact: true,
                    details: Some(serde_json::json!({
                        "distinct": seen.len(),
                        "duplicate_groups": duplicates.len(),
                    })),
                },
                samples,
            ))
        }

        RuleKind::Dtype { column, expected } => {
            let col = frame.column_required(column)?;
            let actual = col.data_type();
            if actual == *expected {
                Ok((
                    LocalEval::Counted {
                        failed_count: 0,
                        exact: true,
                        details: None,
                    },
                    None,
                ))
            } else {
                Ok((
                    LocalEval::Counted {
                        failed_count: 1,
                        exact: true,
                        details: Some(serde_json::json!({
                            "expected": expected.to_string(),
                            "actual": actual.to_string(),
                        })),
                    },
                    None,
                ))
            }
        }

        RuleKind::MinRows { threshold } => {
            let rows = frame.num_rows() as u64;
            let failed = threshold.saturating_sub(rows);
            Ok((
                LocalEval::Counted {
                    failed_count: failed,
                    exact: true,
                    details: Some(serde_json::json!({"rows": rows, "threshold": threshold})),
                },
                None,
            ))
        }

        RuleKind::MaxRows { threshold } => {
            let rows = frame.num_rows() as u64;
            let failed = rows.saturating_sub(*threshold);
            Ok((
                LocalEval::Counted {
                    failed_count: failed,
                    exact: true,
                    details: Some(serde_json::json!({"rows": rows, "threshold": threshold})),
                },
                None,
            ))
        }

        RuleKind::Freshness {
            column,
            max_age_seconds,
        } => {
            let col = frame.column_required(column)?;
            let max = column_max_millis(col)?;
            let cutoff = Utc::now().timestamp_millis() - max_age_seconds * 1000;
            // Empty or all-NULL columns cannot prove staleness: pass
            let failed = match max {
                Some(max) if max < cutoff => 1,
                _ => 0,
            };
            Ok((
                LocalEval::Counted {
                    failed_count: failed,
                    exact: true,
                    details: Some(serde_json::json!({
                        "max_value_millis": max,
                        "cutoff_millis": cutoff,
                    })),
                },
                None,
            ))
        }

        RuleKind::CustomSqlCheck { .. } => Err(crate::error::KontraError::sql(
            "custom SQL cannot be evaluated locally",
        )),

        other => Err(crate::error::KontraError::runtime(format!(
            "unexpected aggregate rule '{}'",
            other.variant_name()
        ))),
    }
}

fn column_max_millis(col: &ColumnData) -> KontraResult<Option<i64>> {
    match col {
        ColumnData::Timestamp(values) | ColumnData::Int(values) => {
            Ok(values.iter().flatten().copied().max())
        }
        other => Err(crate::error::KontraError::data(format!(
            "freshness needs a timestamp column, got {}",
            other.data_type()
        ))),
    }
}
