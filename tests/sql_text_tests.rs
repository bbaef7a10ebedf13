//! Exact SQL text for the Postgres and SQL Server dialects. The live
//! two-phase machinery is exercised against DuckDB elsewhere; these
//! tests pin the statements the other dialects would receive.

use kontra::dataset::Dialect;
use kontra::driver::RelationTerm;
use kontra::rules::RuleKind;
use kontra::sqlgen::{build_batches, emit, CompiledRuleSql, RuleSql};

fn users_table() -> RelationTerm {
    RelationTerm::Table {
        schema: "public".into(),
        table: "users".into(),
    }
}

fn not_null_email() -> RuleKind {
    RuleKind::NotNull {
        column: "email".into(),
        include_nan: false,
    }
}

fn compiled(rule_id: &str, kind: &RuleKind, dialect: Dialect, tally: bool) -> CompiledRuleSql {
    CompiledRuleSql {
        rule_id: rule_id.to_string(),
        sql: emit(kind, dialect, "t", 1000).unwrap(),
        tally,
    }
}

/// Fail-fast not_null is a single phase A round-trip
#[test]
fn test_exists_fail_fast_statement() {
    let rules = vec![compiled(
        "COL:email:not_null",
        &not_null_email(),
        Dialect::Postgres,
        false,
    )];
    let plan = build_batches(Dialect::Postgres, &users_table(), &rules, false).unwrap();

    assert_eq!(
        plan.exists_sql.as_deref(),
        Some(
            "SELECT EXISTS(SELECT 1 FROM \"public\".\"users\" WHERE \"email\" IS NULL) \
             AS \"COL:email:not_null\""
        )
    );
    // Single round-trip: no aggregate statement
    assert!(plan.aggregate_sql.is_none());
}

/// Exact counting moves the rule to phase B
#[test]
fn test_aggregate_exact_count_statement() {
    let rules = vec![compiled(
        "COL:email:not_null",
        &not_null_email(),
        Dialect::Postgres,
        true,
    )];
    let plan = build_batches(Dialect::Postgres, &users_table(), &rules, true).unwrap();

    assert!(plan.exists_sql.is_none());
    assert_eq!(
        plan.aggregate_sql.as_deref(),
        Some(
            "SELECT CAST(COALESCE(SUM(CASE WHEN \"email\" IS NULL THEN 1 ELSE 0 END), 0) AS BIGINT) \
             AS \"COL:email:not_null\", \
             CAST(COUNT(*) AS BIGINT) AS \"__row_count__\" FROM \"public\".\"users\""
        )
    );
}

#[test]
fn test_mssql_bracket_quoting_throughout() {
    let range = RuleKind::Range {
        column: "amount".into(),
        min: Some(kontra::Value::Int(0)),
        max: None,
    };
    let rules = vec![
        compiled("COL:amount:range", &range, Dialect::Mssql, true),
        compiled("COL:email:not_null", &not_null_email(), Dialect::Mssql, false),
    ];
    let plan = build_batches(Dialect::Mssql, &users_table(), &rules, false).unwrap();

    let exists = plan.exists_sql.unwrap();
    assert!(exists.contains("CASE WHEN EXISTS(SELECT 1 FROM [public].[users] WHERE [email] IS NULL) THEN 1 ELSE 0 END"));
    assert!(exists.contains("AS [COL:email:not_null]"));

    let agg = plan.aggregate_sql.unwrap();
    assert!(agg.contains("CASE WHEN ([amount] IS NULL OR [amount] < 0) THEN 1 ELSE 0 END"));
    assert!(agg.ends_with("FROM [public].[users]"));
}

#[test]
fn test_batching_one_statement_per_phase() {
    let dialect = Dialect::Postgres;
    let kinds: Vec<(String, RuleKind, bool)> = vec![
        ("a".into(), not_null_email(), false),
        (
            "b".into(),
            RuleKind::Range {
                column: "age".into(),
                min: Some(kontra::Value::Int(0)),
                max: Some(kontra::Value::Int(120)),
            },
            false,
        ),
        ("c".into(), RuleKind::Unique { column: "id".into() }, true),
        (
            "d".into(),
            RuleKind::Freshness {
                column: "updated_at".into(),
                max_age_seconds: 3600,
            },
            true,
        ),
    ];
    let rules: Vec<CompiledRuleSql> = kinds
        .iter()
        .map(|(id, kind, tally)| compiled(id, kind, dialect, *tally))
        .collect();
    let plan = build_batches(dialect, &users_table(), &rules, true).unwrap();

    // Two statements total, regardless of rule count
    assert!(plan.exists_sql.is_some());
    assert!(plan.aggregate_sql.is_some());
    assert_eq!(plan.exists_aliases, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(plan.aggregate_aliases, vec!["c".to_string(), "d".to_string()]);
}

#[test]
fn test_postgres_regex_operator() {
    let regex = RuleKind::Regex {
        column: "code".into(),
        pattern: "^[A-Z]{2}$".into(),
    };
    match emit(&regex, Dialect::Postgres, "t", 1000).unwrap() {
        RuleSql::Predicate(p) => {
            assert_eq!(p, "(\"code\" IS NULL OR NOT (\"code\" ~ '^[A-Z]{2}$'))")
        }
        other => panic!("unexpected {other:?}"),
    }
}
