//! SQL Server catalog facts for the preplan: column nullability and
//! declared types from `INFORMATION_SCHEMA.COLUMNS`. Histogram-backed
//! resolution is not attempted; statistics can be stale and the
//! preplan's soundness invariant forbids estimates.

use super::PreplanDecision;
use crate::driver::SqlRunner;
use crate::error::KontraResult;
use crate::rules::RuleKind;
use crate::value::{DataType, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct MssqlCatalogFacts {
    pub not_null_columns: HashSet<String>,
    pub column_types: HashMap<String, DataType>,
}

pub fn read_facts(
    runner: &mut dyn SqlRunner,
    schema: &str,
    table: &str,
) -> KontraResult<MssqlCatalogFacts> {
    let mut facts = MssqlCatalogFacts::default();
    let rows = runner.query_rows(&format!(
        "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}'",
        schema.replace('\'', "''"),
        table.replace('\'', "''"),
    ))?;
    for row in rows {
        if let (Some(Value::Str(name)), Some(Value::Str(ty)), Some(Value::Str(nullable))) =
            (row.first(), row.get(1), row.get(2))
        {
            facts.column_types.insert(name.to_string(), mssql_type(ty));
            if nullable.as_ref() == "NO" {
                facts.not_null_columns.insert(name.to_string());
            }
        }
    }
    Ok(facts)
}

fn mssql_type(type_name: &str) -> DataType {
    match type_name.to_lowercase().as_str() {
        "bit" => DataType::Bool,
        "tinyint" | "smallint" | "int" | "bigint" => DataType::Int,
        "real" | "float" | "decimal" | "numeric" | "money" | "smallmoney" => DataType::Float,
        "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => {
            DataType::Timestamp
        }
        _ => DataType::String,
    }
}

pub fn resolve(facts: &MssqlCatalogFacts, rule: &RuleKind) -> PreplanDecision {
    match rule {
        RuleKind::NotNull {
            column,
            include_nan: false,
        } if facts.not_null_columns.contains(column) => PreplanDecision::ResolvedPass,

        RuleKind::Dtype { column, expected } => match facts.column_types.get(column) {
            Some(actual) if actual == expected => PreplanDecision::ResolvedPass,
            Some(_) => PreplanDecision::ResolvedFailExact { count: 1 },
            None => PreplanDecision::Undecided,
        },

        _ => PreplanDecision::Undecided,
    }
}
