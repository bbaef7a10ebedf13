//! Per-rule SQL emitters. Each emitter produces either a violation
//! predicate (rows matching it are violations), an aggregate count, an
//! aggregate fail flag, or an "unsupported" outcome that routes the rule
//! to the local executor.
//!
//! Every emitter mirrors the NULL semantics of the local evaluator
//! exactly; the agreement is pinned by the tier-agreement tests.

use super::dialect::{length_expr, literal, quote_ident, timestamp_literal};
use crate::dataset::Dialect;
use crate::error::KontraResult;
use crate::rules::{regex_translates_exactly, CompareOp, RuleKind, WhenClause};
use crate::value::Value;
use chrono::Utc;

/// How a rule translates to SQL
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSql {
    /// Row-level violation predicate; drives both the EXISTS fail-fast
    /// form and the SUM(CASE ...) exact-count form
    Predicate(String),
    /// Complete aggregate expression returning a BIGINT violation count
    AggregateCount(String),
    /// Aggregate expression returning 1 (failed) or 0 (passed)
    AggregateFlag(String),
    /// Subquery whose result rows are violations (custom SQL)
    ViolationQuery(String),
    /// Resolved from the batched `__row_count__` alone
    RowCount,
    /// No translation for this dialect; the rule demotes to local
    Unsupported(&'static str),
}

/// Emit the SQL translation of a rule for a dialect. `relation` is the
/// rendered FROM term (needed by the custom-SQL placeholder) and
/// `in_list_max` caps `IN (...)` list sizes.
pub fn emit(
    rule: &RuleKind,
    dialect: Dialect,
    relation: &str,
    in_list_max: usize,
) -> KontraResult<RuleSql> {
    if !rule.supports_sql(dialect) {
        return Ok(RuleSql::Unsupported("no emitter for this dialect"));
    }
    match rule {
        RuleKind::NotNull {
            column,
            include_nan,
        } => {
            let col = quote_ident(dialect, column);
            if *include_nan {
                let nan = match dialect {
                    Dialect::DuckDb => format!("isnan(CAST({col} AS DOUBLE))"),
                    Dialect::Postgres => format!("CAST({col} AS DOUBLE PRECISION) = 'NaN'"),
                    _ => return Ok(RuleSql::Unsupported("NaN checks need a float dialect")),
                };
                Ok(RuleSql::Predicate(format!("({col} IS NULL OR {nan})")))
            } else {
                Ok(RuleSql::Predicate(format!("{col} IS NULL")))
            }
        }

        RuleKind::Unique { column } => {
            // NULLs are ignored on both tiers: COUNT(col) skips them
            let col = quote_ident(dialect, column);
            Ok(RuleSql::AggregateCount(format!(
                "CAST(COUNT({col}) - COUNT(DISTINCT {col}) AS BIGINT)"
            )))
        }

        RuleKind::AllowedValues { column, values } => {
            if values.len() > in_list_max {
                return Ok(RuleSql::Unsupported("value list exceeds pushdown cap"));
            }
            let col = quote_ident(dialect, column);
            let list = render_list(dialect, values)?;
            Ok(RuleSql::Predicate(format!(
                "({col} IS NULL OR {col} NOT IN ({list}))"
            )))
        }

        RuleKind::DisallowedValues { column, values } => {
            if values.len() > in_list_max {
                return Ok(RuleSql::Unsupported("value list exceeds pushdown cap"));
            }
            let col = quote_ident(dialect, column);
            let list = render_list(dialect, values)?;
            // NULL IN (...) is NULL, never counted: NULL passes
            Ok(RuleSql::Predicate(format!("{col} IN ({list})")))
        }

        RuleKind::Range { column, min, max } => {
            let col = quote_ident(dialect, column);
            Ok(RuleSql::Predicate(bounds_predicate(
                dialect, &col, min, max,
            )?))
        }

        RuleKind::Length { column, min, max } => {
            let col = quote_ident(dialect, column);
            let len = length_expr(dialect, &col)?;
            let mut clauses = vec![format!("{col} IS NULL")];
            if let Some(lo) = min {
                clauses.push(format!("{len} < {lo}"));
            }
            if let Some(hi) = max {
                clauses.push(format!("{len} > {hi}"));
            }
            Ok(RuleSql::Predicate(format!("({})", clauses.join(" OR "))))
        }

        RuleKind::Regex { column, pattern } => {
            if !regex_translates_exactly(pattern, dialect) {
                return Ok(RuleSql::Unsupported(
                    "pattern outside the dialect's exact regex subset",
                ));
            }
            let col = quote_ident(dialect, column);
            let pat = literal(dialect, &Value::string(pattern))?;
            let matched = match dialect {
                Dialect::DuckDb => format!("regexp_matches({col}, {pat})"),
                Dialect::Postgres => format!("{col} ~ {pat}"),
                _ => return Ok(RuleSql::Unsupported("no regex emitter for this dialect")),
            };
            Ok(RuleSql::Predicate(format!(
                "({col} IS NULL OR NOT ({matched}))"
            )))
        }

        RuleKind::Contains { column, literal: lit } => {
            let col = quote_ident(dialect, column);
            let lit_sql = literal(dialect, &Value::string(lit))?;
            let found = match dialect {
                Dialect::DuckDb => format!("contains({col}, {lit_sql})"),
                Dialect::Postgres => format!("strpos({col}, {lit_sql}) > 0"),
                Dialect::Mssql => format!("CHARINDEX({lit_sql}, {col}) > 0"),
                Dialect::None => unreachable!("gated by supports_sql"),
            };
            Ok(RuleSql::Predicate(format!(
                "({col} IS NULL OR NOT ({found}))"
            )))
        }

        RuleKind::StartsWith { column, literal: lit } => {
            Ok(RuleSql::Predicate(affix_predicate(dialect, column, lit, "LEFT")?))
        }

        RuleKind::EndsWith { column, literal: lit } => {
            Ok(RuleSql::Predicate(affix_predicate(dialect, column, lit, "RIGHT")?))
        }

        // Declared-type checks come from schema metadata, never SQL
        RuleKind::Dtype { .. } => Ok(RuleSql::Unsupported("dtype is metadata-resolved")),

        RuleKind::Compare { left, right, op } => {
            let l = quote_ident(dialect, left);
            let r = quote_ident(dialect, right);
            Ok(RuleSql::Predicate(format!(
                "({l} IS NULL OR {r} IS NULL OR NOT ({l} {} {r}))",
                op.sql()
            )))
        }

        RuleKind::ConditionalNotNull { column, when } => {
            let col = quote_ident(dialect, column);
            let when_sql = when_predicate(dialect, when)?;
            Ok(RuleSql::Predicate(format!(
                "({when_sql} AND {col} IS NULL)"
            )))
        }

        RuleKind::ConditionalRange {
            column,
            when,
            min,
            max,
        } => {
            let col = quote_ident(dialect, column);
            let when_sql = when_predicate(dialect, when)?;
            let bounds = bounds_predicate(dialect, &col, min, max)?;
            Ok(RuleSql::Predicate(format!("({when_sql} AND {bounds})")))
        }

        RuleKind::MinRows { .. } | RuleKind::MaxRows { .. } => Ok(RuleSql::RowCount),

        RuleKind::Freshness {
            column,
            max_age_seconds,
        } => {
            let col = quote_ident(dialect, column);
            // Cutoff rendered as a UTC literal at emit time: one timezone
            // policy across dialects, and MAX over an empty or all-NULL
            // column yields NULL which never compares true (pass)
            let cutoff_millis = Utc::now().timestamp_millis() - max_age_seconds * 1000;
            let cutoff = timestamp_literal(dialect, cutoff_millis)?;
            Ok(RuleSql::AggregateFlag(format!(
                "CASE WHEN MAX({col}) < {cutoff} THEN 1 ELSE 0 END"
            )))
        }

        RuleKind::CustomSqlCheck { sql } => {
            Ok(RuleSql::ViolationQuery(sql.replace("{table}", relation)))
        }
    }
}

fn render_list(dialect: Dialect, values: &[Value]) -> KontraResult<String> {
    let rendered: KontraResult<Vec<String>> =
        values.iter().map(|v| literal(dialect, v)).collect();
    Ok(rendered?.join(", "))
}

/// `col IS NULL OR col < min OR col > max`, with only the present bounds
fn bounds_predicate(
    dialect: Dialect,
    col: &str,
    min: &Option<Value>,
    max: &Option<Value>,
) -> KontraResult<String> {
    let mut clauses = vec![format!("{col} IS NULL")];
    if let Some(lo) = min {
        clauses.push(format!("{col} < {}", literal(dialect, lo)?));
    }
    if let Some(hi) = max {
        clauses.push(format!("{col} > {}", literal(dialect, hi)?));
    }
    Ok(format!("({})", clauses.join(" OR ")))
}

/// Prefix/suffix check via LEFT/RIGHT over the literal's character count.
/// A string shorter than the literal compares unequal, which is the
/// correct violation outcome.
fn affix_predicate(
    dialect: Dialect,
    column: &str,
    lit: &str,
    func: &str,
) -> KontraResult<String> {
    let col = quote_ident(dialect, column);
    let lit_sql = literal(dialect, &Value::string(lit))?;
    let n = lit.chars().count();
    Ok(format!(
        "({col} IS NULL OR {func}({col}, {n}) <> {lit_sql})"
    ))
}

/// Restricted `column op literal` condition; NULL in the column makes
/// the condition unknown, so conditional rules pass those rows
fn when_predicate(dialect: Dialect, when: &WhenClause) -> KontraResult<String> {
    let col = quote_ident(dialect, &when.column);
    let lit = literal(dialect, &when.value)?;
    let op = match when.op {
        CompareOp::Eq => "=",
        other => other.sql(),
    };
    Ok(format!("{col} {op} {lit}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAP: usize = 1000;

    fn predicate(rule: &RuleKind, dialect: Dialect) -> String {
        match emit(rule, dialect, "t", CAP).unwrap() {
            RuleSql::Predicate(p) => p,
            other => panic!("expected predicate, got {other:?}"),
        }
    }

    #[test]
    fn test_not_null_predicate() {
        let rule = RuleKind::NotNull {
            column: "email".into(),
            include_nan: false,
        };
        assert_eq!(predicate(&rule, Dialect::Postgres), "\"email\" IS NULL");
        assert_eq!(predicate(&rule, Dialect::Mssql), "[email] IS NULL");
    }

    #[test]
    fn test_unique_aggregate() {
        let rule = RuleKind::Unique { column: "id".into() };
        match emit(&rule, Dialect::DuckDb, "t", CAP).unwrap() {
            RuleSql::AggregateCount(sql) => {
                assert_eq!(sql, "CAST(COUNT(\"id\") - COUNT(DISTINCT \"id\") AS BIGINT)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_allowed_values_null_fails() {
        let rule = RuleKind::AllowedValues {
            column: "status".into(),
            values: vec![Value::string("a"), Value::string("b")],
        };
        assert_eq!(
            predicate(&rule, Dialect::Postgres),
            "(\"status\" IS NULL OR \"status\" NOT IN ('a', 'b'))"
        );
    }

    #[test]
    fn test_disallowed_values_null_passes() {
        let rule = RuleKind::DisallowedValues {
            column: "status".into(),
            values: vec![Value::string("void")],
        };
        assert_eq!(predicate(&rule, Dialect::DuckDb), "\"status\" IN ('void')");
    }

    #[test]
    fn test_in_list_cap_demotes() {
        let rule = RuleKind::AllowedValues {
            column: "c".into(),
            values: (0..5).map(Value::Int).collect(),
        };
        match emit(&rule, Dialect::DuckDb, "t", 3).unwrap() {
            RuleSql::Unsupported(reason) => assert!(reason.contains("cap")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_range_predicate_with_one_bound() {
        let rule = RuleKind::Range {
            column: "x".into(),
            min: Some(Value::Int(0)),
            max: None,
        };
        assert_eq!(
            predicate(&rule, Dialect::Postgres),
            "(\"x\" IS NULL OR \"x\" < 0)"
        );
    }

    #[test]
    fn test_regex_per_dialect() {
        let rule = RuleKind::Regex {
            column: "code".into(),
            pattern: "^[A-Z]{2}$".into(),
        };
        assert_eq!(
            predicate(&rule, Dialect::Postgres),
            "(\"code\" IS NULL OR NOT (\"code\" ~ '^[A-Z]{2}$'))"
        );
        assert!(predicate(&rule, Dialect::DuckDb).contains("regexp_matches"));
        match emit(&rule, Dialect::Mssql, "t", CAP).unwrap() {
            RuleSql::Unsupported(_) => {}
            other => panic!("expected unsupported on mssql, got {other:?}"),
        }
    }

    #[test]
    fn test_named_group_pattern_demotes() {
        let rule = RuleKind::Regex {
            column: "name".into(),
            pattern: "(?P<x>.+)".into(),
        };
        match emit(&rule, Dialect::Postgres, "t", CAP).unwrap() {
            RuleSql::Unsupported(reason) => assert!(reason.contains("regex")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_compare_null_on_either_side_fails() {
        let rule = RuleKind::Compare {
            left: "a".into(),
            right: "b".into(),
            op: CompareOp::Le,
        };
        assert_eq!(
            predicate(&rule, Dialect::DuckDb),
            "(\"a\" IS NULL OR \"b\" IS NULL OR NOT (\"a\" <= \"b\"))"
        );
    }

    #[test]
    fn test_conditional_not_null() {
        let rule = RuleKind::ConditionalNotNull {
            column: "shipped_at".into(),
            when: WhenClause {
                column: "status".into(),
                op: CompareOp::Eq,
                value: Value::string("shipped"),
            },
        };
        assert_eq!(
            predicate(&rule, Dialect::Postgres),
            "(\"status\" = 'shipped' AND \"shipped_at\" IS NULL)"
        );
    }

    #[test]
    fn test_row_count_rules() {
        assert_eq!(
            emit(&RuleKind::MinRows { threshold: 10 }, Dialect::Postgres, "t", CAP).unwrap(),
            RuleSql::RowCount
        );
    }

    #[test]
    fn test_freshness_flag_shape() {
        let rule = RuleKind::Freshness {
            column: "updated_at".into(),
            max_age_seconds: 3600,
        };
        match emit(&rule, Dialect::Postgres, "t", CAP).unwrap() {
            RuleSql::AggregateFlag(sql) => {
                assert!(sql.starts_with("CASE WHEN MAX(\"updated_at\") < TIMESTAMP '"));
                assert!(sql.ends_with("THEN 1 ELSE 0 END"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_custom_sql_placeholder_substitution() {
        let rule = RuleKind::CustomSqlCheck {
            sql: "SELECT * FROM {table} WHERE amount < 0".into(),
        };
        match emit(&rule, Dialect::Postgres, "\"public\".\"orders\"", CAP).unwrap() {
            RuleSql::ViolationQuery(sql) => {
                assert_eq!(sql, "SELECT * FROM \"public\".\"orders\" WHERE amount < 0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_starts_with_predicate() {
        let rule = RuleKind::StartsWith {
            column: "sku".into(),
            literal: "AB".into(),
        };
        assert_eq!(
            predicate(&rule, Dialect::Mssql),
            "([sku] IS NULL OR LEFT([sku], 2) <> 'AB')"
        );
    }
}
