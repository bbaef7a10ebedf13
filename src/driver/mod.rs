//! # SQL Drivers
//!
//! One small trait over the engines the pushdown executor and the
//! database materializer speak to. A runner executes a SQL string and
//! returns scalar rows; typed frame assembly and alias binding live with
//! the callers.
//!
//! Connections opened by the engine from a URI are owned by the call
//! scope and released on drop. Caller-supplied runners arrive as
//! `SharedRunner` and are borrowed: the engine never releases the
//! underlying resource.

pub mod duckdb;
pub mod mssql;
pub mod postgres;

pub use self::duckdb::DuckDbRunner;
pub use self::mssql::MssqlRunner;
pub use self::postgres::PostgresRunner;

use crate::dataset::Dialect;
use crate::error::{KontraError, KontraResult};
use crate::frame::ColumnarFrame;
use crate::value::{DataType, Value};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// The relation a statement runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTerm {
    /// Database table, quoted per dialect as `schema.table`
    Table { schema: String, table: String },
    /// Local Parquet file, read through DuckDB's `read_parquet`
    ParquetFile(PathBuf),
    /// Local CSV file, read through DuckDB's `read_csv_auto`
    CsvFile(PathBuf),
}

/// Minimal execution surface over a SQL engine
pub trait SqlRunner: Send {
    fn dialect(&self) -> Dialect;

    /// Execute a statement and return all rows as scalar vectors
    fn query_rows(&mut self, sql: &str) -> KontraResult<Vec<Vec<Value>>>;

    /// Column names and types of a relation, without reading rows
    fn describe(&mut self, relation: &RelationTerm) -> KontraResult<Vec<(String, DataType)>>;
}

/// Shared, caller-owned runner handle
pub type SharedRunner = Arc<Mutex<Box<dyn SqlRunner>>>;

/// Wrap a runner for sharing with the engine
pub fn share_runner(runner: Box<dyn SqlRunner>) -> SharedRunner {
    Arc::new(Mutex::new(runner))
}

/// Execute a statement expected to produce exactly one row (batched
/// aggregates always do)
pub fn query_single_row(runner: &mut dyn SqlRunner, sql: &str) -> KontraResult<Vec<Value>> {
    let mut rows = runner.query_rows(sql)?;
    match rows.len() {
        1 => Ok(rows.remove(0)),
        n => Err(KontraError::sql(format!(
            "expected exactly one result row, got {n}"
        ))),
    }
}

/// Execute a projected SELECT and assemble a typed frame. The declared
/// schema drives column typing; scalar coercion (Int into Float or
/// Timestamp columns) follows the frame's append rules.
pub fn fetch_frame(
    runner: &mut dyn SqlRunner,
    sql: &str,
    schema: &[(String, DataType)],
) -> KontraResult<ColumnarFrame> {
    let rows = runner.query_rows(sql)?;
    let mut frame = ColumnarFrame::with_schema(schema);
    for row in rows {
        frame.push_row(row)?;
    }
    Ok(frame)
}
