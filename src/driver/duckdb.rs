//! DuckDB driver. Serves two roles: the pushdown engine for database-less
//! file handles (via `read_parquet`/`read_csv_auto` relations) and the
//! CSV→Parquet staging engine.

use super::{RelationTerm, SqlRunner};
use crate::dataset::Dialect;
use crate::error::{KontraError, KontraResult};
use crate::value::{DataType, Value};
use duckdb::types::TimeUnit;
use duckdb::Connection;
use std::sync::Arc;

pub struct DuckDbRunner {
    conn: Connection,
}

impl DuckDbRunner {
    /// In-memory engine, used for file-backed relations
    pub fn in_memory() -> KontraResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| KontraError::connection(format!("duckdb open failed: {e}")))?;
        Ok(DuckDbRunner { conn })
    }
}

impl SqlRunner for DuckDbRunner {
    fn dialect(&self) -> Dialect {
        Dialect::DuckDb
    }

    fn query_rows(&mut self, sql: &str) -> KontraResult<Vec<Vec<Value>>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| KontraError::sql(format!("duckdb prepare failed: {e}")))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| KontraError::sql(format!("duckdb query failed: {e}")))?;
        let mut out = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(KontraError::sql(format!("duckdb row error: {e}"))),
            };
            let count = row.as_ref().column_count();
            let mut values = Vec::with_capacity(count);
            for i in 0..count {
                let raw: duckdb::types::Value = row
                    .get(i)
                    .map_err(|e| KontraError::sql(format!("duckdb value error: {e}")))?;
                values.push(convert_value(raw)?);
            }
            out.push(values);
        }
        Ok(out)
    }

    fn describe(&mut self, relation: &RelationTerm) -> KontraResult<Vec<(String, DataType)>> {
        let rel = crate::sqlgen::dialect::relation_sql(Dialect::DuckDb, relation)?;
        let rows = self.query_rows(&format!("DESCRIBE SELECT * FROM {rel}"))?;
        let mut schema = Vec::with_capacity(rows.len());
        for row in rows {
            let name = match row.first() {
                Some(Value::Str(s)) => s.to_string(),
                other => {
                    return Err(KontraError::runtime(format!(
                        "unexpected DESCRIBE output: {other:?}"
                    )))
                }
            };
            let type_name = match row.get(1) {
                Some(Value::Str(s)) => s.to_string(),
                other => {
                    return Err(KontraError::runtime(format!(
                        "unexpected DESCRIBE output: {other:?}"
                    )))
                }
            };
            schema.push((name, duck_type(&type_name)));
        }
        Ok(schema)
    }
}

fn duck_type(type_name: &str) -> DataType {
    let upper = type_name.to_uppercase();
    if upper.starts_with("DECIMAL") {
        return DataType::Float;
    }
    match upper.as_str() {
        "BOOLEAN" => DataType::Bool,
        "TINYINT" | "SMALLINT" | "INTEGER" | "BIGINT" | "HUGEINT" | "UTINYINT" | "USMALLINT"
        | "UINTEGER" | "UBIGINT" => DataType::Int,
        "FLOAT" | "REAL" | "DOUBLE" => DataType::Float,
        s if s.starts_with("TIMESTAMP") || s == "DATE" => DataType::Timestamp,
        // Everything else (VARCHAR, UUID, ...) surfaces as string
        _ => DataType::String,
    }
}

fn convert_value(raw: duckdb::types::Value) -> KontraResult<Value> {
    use duckdb::types::Value as Dv;
    Ok(match raw {
        Dv::Null => Value::Null,
        Dv::Boolean(b) => Value::Bool(b),
        Dv::TinyInt(i) => Value::Int(i as i64),
        Dv::SmallInt(i) => Value::Int(i as i64),
        Dv::Int(i) => Value::Int(i as i64),
        Dv::BigInt(i) => Value::Int(i),
        Dv::HugeInt(i) => {
            i64::try_from(i).map(Value::Int).map_err(|_| {
                KontraError::data("integer value out of 64-bit range".to_string())
            })?
        }
        Dv::UTinyInt(i) => Value::Int(i as i64),
        Dv::USmallInt(i) => Value::Int(i as i64),
        Dv::UInt(i) => Value::Int(i as i64),
        Dv::UBigInt(i) => i64::try_from(i).map(Value::Int).map_err(|_| {
            KontraError::data("integer value out of 64-bit range".to_string())
        })?,
        Dv::Float(f) => Value::Float(f as f64),
        Dv::Double(f) => Value::Float(f),
        Dv::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| KontraError::data("unparseable decimal value".to_string()))?,
        Dv::Text(s) => Value::Str(Arc::from(s.as_str())),
        Dv::Timestamp(unit, v) => Value::Timestamp(to_millis(unit, v)),
        Dv::Date32(days) => Value::Timestamp(days as i64 * 86_400_000),
        other => {
            return Err(KontraError::data_hint(
                format!("unsupported duckdb value: {other:?}"),
                "supported types: bool, int, float, string, timestamp",
            ))
        }
    })
}

fn to_millis(unit: TimeUnit, v: i64) -> i64 {
    match unit {
        TimeUnit::Second => v * 1000,
        TimeUnit::Millisecond => v,
        TimeUnit::Microsecond => v / 1000,
        TimeUnit::Nanosecond => v / 1_000_000,
    }
}
