//! Dialect-specific SQL building blocks: identifier quoting, literal
//! escaping, relation terms, and timestamp rendering.

use crate::dataset::Dialect;
use crate::driver::RelationTerm;
use crate::error::{KontraError, KontraResult};
use crate::value::Value;
use chrono::DateTime;

/// Quote an identifier: `"name"` for duckdb/postgres, `[name]` for mssql
pub fn quote_ident(dialect: Dialect, name: &str) -> String {
    match dialect {
        Dialect::Mssql => format!("[{}]", name.replace(']', "]]")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

/// Quote a string literal with doubled single quotes
pub fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a scalar as a SQL literal
pub fn literal(dialect: Dialect, value: &Value) -> KontraResult<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(match dialect {
            // No boolean literals in T-SQL
            Dialect::Mssql => if *b { "1" } else { "0" }.to_string(),
            _ => if *b { "TRUE" } else { "FALSE" }.to_string(),
        }),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => {
            if f.is_finite() {
                Ok(format!("{f:?}"))
            } else {
                Err(KontraError::config(
                    "non-finite float parameters cannot be rendered as SQL",
                ))
            }
        }
        Value::Str(s) => Ok(quote_str(s)),
        Value::Timestamp(millis) => timestamp_literal(dialect, *millis),
    }
}

/// Render a UTC millisecond timestamp as a dialect literal
pub fn timestamp_literal(dialect: Dialect, millis: i64) -> KontraResult<String> {
    let dt = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| KontraError::config(format!("timestamp out of range: {millis}")))?;
    let rendered = dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.3f");
    Ok(match dialect {
        Dialect::Mssql => format!("CAST('{rendered}' AS DATETIME2)"),
        _ => format!("TIMESTAMP '{rendered}'"),
    })
}

/// Render the relation a statement selects from
pub fn relation_sql(dialect: Dialect, relation: &RelationTerm) -> KontraResult<String> {
    match relation {
        RelationTerm::Table { schema, table } => Ok(format!(
            "{}.{}",
            quote_ident(dialect, schema),
            quote_ident(dialect, table)
        )),
        RelationTerm::ParquetFile(path) => {
            if dialect != Dialect::DuckDb {
                return Err(KontraError::runtime(format!(
                    "file relations require the duckdb dialect, got {dialect}"
                )));
            }
            Ok(format!(
                "read_parquet({})",
                quote_str(&path.display().to_string())
            ))
        }
        RelationTerm::CsvFile(path) => {
            if dialect != Dialect::DuckDb {
                return Err(KontraError::runtime(format!(
                    "file relations require the duckdb dialect, got {dialect}"
                )));
            }
            Ok(format!(
                "read_csv_auto({})",
                quote_str(&path.display().to_string())
            ))
        }
    }
}

/// String-length expression; the mssql `LEN` trailing-space semantics are
/// a capability gap, so length never reaches this path on mssql
pub fn length_expr(dialect: Dialect, column_sql: &str) -> KontraResult<String> {
    match dialect {
        Dialect::DuckDb | Dialect::Postgres => Ok(format!("length({column_sql})")),
        other => Err(KontraError::runtime(format!(
            "no length emitter for dialect {other}"
        ))),
    }
}
