//! Compiled row-level predicates for the local executor.
//!
//! A compiled predicate produces a violation mask over a frame: one
//! boolean per row, `true` where the row violates the rule. The NULL
//! semantics of every mask mirror the SQL emitters exactly; the
//! agreement is what makes silent demotion safe.

use crate::error::{KontraError, KontraResult};
use crate::frame::{ColumnData, ColumnarFrame};
use crate::rules::{CompareOp, RuleKind, WhenClause};
use crate::value::Value;
use regex::Regex;

/// A rule predicate with its expensive parts (regex) pre-compiled
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    kind: RuleKind,
    regex: Option<Regex>,
}

/// Whether a rule evaluates as a row-level mask (as opposed to an
/// aggregate the executor computes directly)
pub fn is_row_level(kind: &RuleKind) -> bool {
    !matches!(
        kind,
        RuleKind::Unique { .. }
            | RuleKind::Dtype { .. }
            | RuleKind::MinRows { .. }
            | RuleKind::MaxRows { .. }
            | RuleKind::Freshness { .. }
            | RuleKind::CustomSqlCheck { .. }
    )
}

/// Compile a predicate. Patterns were syntax-checked at rule
/// construction; a failure here still surfaces as a per-rule error.
pub fn compile(kind: &RuleKind) -> KontraResult<CompiledPredicate> {
    let regex = match kind {
        RuleKind::Regex { pattern, .. } => Some(Regex::new(pattern).map_err(|e| {
            KontraError::config(format!("invalid regex pattern '{pattern}': {e}"))
        })?),
        _ => None,
    };
    Ok(CompiledPredicate {
        kind: kind.clone(),
        regex,
    })
}

impl CompiledPredicate {
    /// Violation mask over the frame. Errors (missing column, dtype
    /// mismatch for string operations) mark the rule errored without
    /// aborting other rules.
    pub fn mask(&self, frame: &ColumnarFrame) -> KontraResult<Vec<bool>> {
        match &self.kind {
            RuleKind::NotNull {
                column,
                include_nan,
            } => {
                let col = frame.column_required(column)?;
                if *include_nan {
                    if let ColumnData::Float(values) = col {
                        return Ok(values
                            .iter()
                            .map(|v| match v {
                                None => true,
                                Some(f) => f.is_nan(),
                            })
                            .collect());
                    }
                }
                Ok(null_mask(col))
            }

            RuleKind::AllowedValues { column, values } => {
                let col = frame.column_required(column)?;
                Ok(map_rows(col, |v| match v {
                    Value::Null => true,
                    v => !values.iter().any(|allowed| allowed.numeric_eq(&v)),
                }))
            }

            RuleKind::DisallowedValues { column, values } => {
                let col = frame.column_required(column)?;
                Ok(map_rows(col, |v| match v {
                    Value::Null => false,
                    v => values.iter().any(|banned| banned.numeric_eq(&v)),
                }))
            }

            RuleKind::Range { column, min, max } => {
                let col = frame.column_required(column)?;
                Ok(map_rows(col, |v| out_of_bounds(&v, min, max)))
            }

            RuleKind::Length { column, min, max } => {
                let col = string_column(frame, column, "length")?;
                Ok(col
                    .iter()
                    .map(|v| match v {
                        None => true,
                        Some(s) => {
                            let len = s.chars().count() as u64;
                            min.is_some_and(|lo| len < lo) || max.is_some_and(|hi| len > hi)
                        }
                    })
                    .collect())
            }

            RuleKind::Regex { column, .. } => {
                let col = string_column(frame, column, "regex")?;
                let regex = self
                    .regex
                    .as_ref()
                    .ok_or_else(|| KontraError::runtime("regex predicate missing compiled pattern"))?;
                Ok(col
                    .iter()
                    .map(|v| match v {
                        None => true,
                        Some(s) => !regex.is_match(s),
                    })
                    .collect())
            }

            RuleKind::Contains { column, literal } => {
                let col = string_column(frame, column, "contains")?;
                Ok(col
                    .iter()
                    .map(|v| match v {
                        None => true,
                        Some(s) => !s.contains(literal.as_str()),
                    })
                    .collect())
            }

            RuleKind::StartsWith { column, literal } => {
                let col = string_column(frame, column, "starts_with")?;
                Ok(col
                    .iter()
                    .map(|v| match v {
                        None => true,
                        Some(s) => !s.starts_with(literal.as_str()),
                    })
                    .collect())
            }

            RuleKind::EndsWith { column, literal } => {
                let col = string_column(frame, column, "ends_with")?;
                Ok(col
                    .iter()
                    .map(|v| match v {
                        None => true,
                        Some(s) => !s.ends_with(literal.as_str()),
                    })
                    .collect())
            }

            RuleKind::Compare { left, right, op } => {
                let lhs = frame.column_required(left)?;
                let rhs = frame.column_required(right)?;
                Ok((0..frame.num_rows())
                    .map(|row| {
                        let l = lhs.value_at(row);
                        let r = rhs.value_at(row);
                        if l.is_null() || r.is_null() {
                            return true;
                        }
                        match l.partial_cmp_coerced(&r) {
                            Some(ord) => !op.holds(ord),
                            // Incomparable pairs (mixed types, NaN) violate
                            None => true,
                        }
                    })
                    .collect())
            }

            RuleKind::ConditionalNotNull { column, when } => {
                let col = frame.column_required(column)?;
                let cond = when_mask(frame, when)?;
                Ok((0..frame.num_rows())
                    .map(|row| cond[row] && col.is_null_at(row))
                    .collect())
            }

            RuleKind::ConditionalRange {
                column,
                when,
                min,
                max,
            } => {
                let col = frame.column_required(column)?;
                let cond = when_mask(frame, when)?;
                Ok((0..frame.num_rows())
                    .map(|row| cond[row] && out_of_bounds(&col.value_at(row), min, max))
                    .collect())
            }

            other => Err(KontraError::runtime(format!(
                "rule '{}' is not a row-level predicate",
                other.variant_name()
            ))),
        }
    }
}

fn null_mask(col: &ColumnData) -> Vec<bool> {
    (0..col.len()).map(|row| col.is_null_at(row)).collect()
}

fn map_rows(col: &ColumnData, f: impl Fn(Value) -> bool) -> Vec<bool> {
    (0..col.len()).map(|row| f(col.value_at(row))).collect()
}

/// NULL or outside the present bounds; incomparable values violate
fn out_of_bounds(value: &Value, min: &Option<Value>, max: &Option<Value>) -> bool {
    if value.is_null() {
        return true;
    }
    if let Some(lo) = min {
        match value.partial_cmp_coerced(lo) {
            Some(std::cmp::Ordering::Less) | None => return true,
            _ => {}
        }
    }
    if let Some(hi) = max {
        match value.partial_cmp_coerced(hi) {
            Some(std::cmp::Ordering::Greater) | None => return true,
            _ => {}
        }
    }
    false
}

fn string_column<'a>(
    frame: &'a ColumnarFrame,
    column: &str,
    rule: &str,
) -> KontraResult<&'a Vec<Option<std::sync::Arc<str>>>> {
    match frame.column_required(column)? {
        ColumnData::Str(values) => Ok(values),
        other => Err(KontraError::data(format!(
            "rule '{rule}' needs a string column, '{column}' is {}",
            other.data_type()
        ))),
    }
}

/// Condition mask for `when` clauses: NULL and incomparable values make
/// the condition false (the conditional rule passes those rows)
fn when_mask(frame: &ColumnarFrame, when: &WhenClause) -> KontraResult<Vec<bool>> {
    let col = frame.column_required(&when.column)?;
    Ok((0..frame.num_rows())
        .map(|row| {
            let v = col.value_at(row);
            if v.is_null() {
                return false;
            }
            if when.op == CompareOp::Eq {
                return v.numeric_eq(&when.value);
            }
            match v.partial_cmp_coerced(&when.value) {
                Some(ord) => when.op.holds(ord),
                None => false,
            }
        })
        .collect())
}
