//! Postgres catalog facts for the preplan.
//!
//! Only constraint-backed facts can resolve a rule: a NOT NULL
//! constraint proves `not_null`, a single-column unique index proves
//! `unique`, and `information_schema` types decide `dtype`. The
//! planner also reads `pg_stats.null_frac`, but planner statistics can
//! be stale, so estimates never resolve a rule either way.

use super::PreplanDecision;
use crate::driver::SqlRunner;
use crate::error::KontraResult;
use crate::rules::RuleKind;
use crate::value::{DataType, Value};
use std::collections::{HashMap, HashSet};

/// Constraint-backed catalog facts for one table
#[derive(Debug, Default)]
pub struct PgCatalogFacts {
    /// Columns carrying a NOT NULL constraint
    pub not_null_columns: HashSet<String>,
    /// Columns covered by a single-column unique index
    pub unique_columns: HashSet<String>,
    /// Declared column types
    pub column_types: HashMap<String, DataType>,
    /// Advisory `pg_stats.null_frac` (recorded, never decisive)
    pub null_frac: HashMap<String, f64>,
}

pub fn read_facts(
    runner: &mut dyn SqlRunner,
    schema: &str,
    table: &str,
) -> KontraResult<PgCatalogFacts> {
    let mut facts = PgCatalogFacts::default();
    let schema_lit = schema.replace('\'', "''");
    let table_lit = table.replace('\'', "''");

    let rows = runner.query_rows(&format!(
        "SELECT column_name, data_type, is_nullable FROM information_schema.columns \
         WHERE table_schema = '{schema_lit}' AND table_name = '{table_lit}'"
    ))?;
    for row in rows {
        if let (Some(Value::Str(name)), Some(Value::Str(ty)), Some(Value::Str(nullable))) =
            (row.first(), row.get(1), row.get(2))
        {
            facts
                .column_types
                .insert(name.to_string(), pg_type(ty));
            if nullable.as_ref() == "NO" {
                facts.not_null_columns.insert(name.to_string());
            }
        }
    }

    let rows = runner.query_rows(&format!(
        "SELECT a.attname FROM pg_index i \
         JOIN pg_class c ON c.oid = i.indrelid \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey) \
         WHERE n.nspname = '{schema_lit}' AND c.relname = '{table_lit}' \
           AND i.indisunique AND i.indnatts = 1"
    ))?;
    for row in rows {
        if let Some(Value::Str(name)) = row.first() {
            facts.unique_columns.insert(name.to_string());
        }
    }

    let rows = runner.query_rows(&format!(
        "SELECT attname, null_frac FROM pg_stats \
         WHERE schemaname = '{schema_lit}' AND tablename = '{table_lit}'"
    ))?;
    for row in rows {
        if let (Some(Value::Str(name)), Some(frac)) = (row.first(), row.get(1)) {
            if let Some(frac) = frac.as_f64() {
                facts.null_frac.insert(name.to_string(), frac);
            }
        }
    }

    Ok(facts)
}

fn pg_type(type_name: &str) -> DataType {
    match type_name.to_lowercase().as_str() {
        "boolean" => DataType::Bool,
        "smallint" | "integer" | "bigint" => DataType::Int,
        "real" | "double precision" | "numeric" => DataType::Float,
        s if s.starts_with("timestamp") || s == "date" => DataType::Timestamp,
        _ => DataType::String,
    }
}

/// The catalog-side decision matrix
pub fn resolve(facts: &PgCatalogFacts, rule: &RuleKind) -> PreplanDecision {
    match rule {
        RuleKind::NotNull {
            column,
            include_nan: false,
        } if facts.not_null_columns.contains(column) => PreplanDecision::ResolvedPass,

        RuleKind::Unique { column } if facts.unique_columns.contains(column) => {
            PreplanDecision::ResolvedPass
        }

        RuleKind::Dtype { column, expected } => match facts.column_types.get(column) {
            Some(actual) if actual == expected => PreplanDecision::ResolvedPass,
            Some(_) => PreplanDecision::ResolvedFailExact { count: 1 },
            None => PreplanDecision::Undecided,
        },

        _ => PreplanDecision::Undecided,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> PgCatalogFacts {
        let mut facts = PgCatalogFacts::default();
        facts.not_null_columns.insert("id".to_string());
        facts.unique_columns.insert("id".to_string());
        facts.column_types.insert("id".to_string(), DataType::Int);
        facts
            .column_types
            .insert("email".to_string(), DataType::String);
        facts.null_frac.insert("email".to_string(), 0.0);
        facts
    }

    #[test]
    fn test_constraint_proves_not_null() {
        let rule = RuleKind::NotNull {
            column: "id".into(),
            include_nan: false,
        };
        assert_eq!(resolve(&facts(), &rule), PreplanDecision::ResolvedPass);
    }

    #[test]
    fn test_null_frac_estimate_never_resolves() {
        // email has null_frac 0.0 but no constraint: stats may be stale
        let rule = RuleKind::NotNull {
            column: "email".into(),
            include_nan: false,
        };
        assert_eq!(resolve(&facts(), &rule), PreplanDecision::Undecided);
    }

    #[test]
    fn test_unique_index_proves_unique() {
        let rule = RuleKind::Unique { column: "id".into() };
        assert_eq!(resolve(&facts(), &rule), PreplanDecision::ResolvedPass);
        let rule = RuleKind::Unique {
            column: "email".into(),
        };
        assert_eq!(resolve(&facts(), &rule), PreplanDecision::Undecided);
    }

    #[test]
    fn test_dtype_from_catalog() {
        let rule = RuleKind::Dtype {
            column: "email".into(),
            expected: DataType::Int,
        };
        assert_eq!(
            resolve(&facts(), &rule),
            PreplanDecision::ResolvedFailExact { count: 1 }
        );
    }
}
