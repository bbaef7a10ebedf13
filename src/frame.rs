//! # Columnar Frame
//!
//! In-memory columnar representation used by the fallback executor. Each
//! column is a typed vector of optional scalars; row order is the order
//! rows were materialized in and is never changed afterwards, so sample
//! `_row_index` values stay stable.
//!
//! Arrow `RecordBatch`es coming out of the Parquet reader convert into
//! frames at the I/O boundary; everything downstream operates on the
//! typed vectors directly.

use crate::error::{KontraError, KontraResult};
use crate::value::{DataType, Value};
use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray, UInt16Array,
    UInt32Array, UInt8Array,
};
use arrow::datatypes::{DataType as ArrowDataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

/// Typed column data. `None` entries are NULLs.
#[derive(Debug, Clone)]
pub enum ColumnData {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Str(Vec<Option<Arc<str>>>),
    /// Unix milliseconds, UTC
    Timestamp(Vec<Option<i64>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Str(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Int(_) => DataType::Int,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::Str(_) => DataType::String,
            ColumnData::Timestamp(_) => DataType::Timestamp,
        }
    }

    /// Scalar at `row` (NULL-aware)
    pub fn value_at(&self, row: usize) -> Value {
        match self {
            ColumnData::Bool(v) => v[row].map(Value::Bool).unwrap_or(Value::Null),
            ColumnData::Int(v) => v[row].map(Value::Int).unwrap_or(Value::Null),
            ColumnData::Float(v) => v[row].map(Value::Float).unwrap_or(Value::Null),
            ColumnData::Str(v) => v[row]
                .as_ref()
                .map(|s| Value::Str(s.clone()))
                .unwrap_or(Value::Null),
            ColumnData::Timestamp(v) => v[row].map(Value::Timestamp).unwrap_or(Value::Null),
        }
    }

    pub fn is_null_at(&self, row: usize) -> bool {
        match self {
            ColumnData::Bool(v) => v[row].is_none(),
            ColumnData::Int(v) => v[row].is_none(),
            ColumnData::Float(v) => v[row].is_none(),
            ColumnData::Str(v) => v[row].is_none(),
            ColumnData::Timestamp(v) => v[row].is_none(),
        }
    }

    /// Append a scalar, coercing Int into Float columns. Used by the
    /// row-oriented loaders (CSV, database cursors).
    pub fn push(&mut self, value: Value) -> KontraResult<()> {
        match (self, value) {
            (ColumnData::Bool(v), Value::Bool(b)) => v.push(Some(b)),
            (ColumnData::Bool(v), Value::Null) => v.push(None),
            (ColumnData::Int(v), Value::Int(i)) => v.push(Some(i)),
            (ColumnData::Int(v), Value::Null) => v.push(None),
            (ColumnData::Float(v), Value::Float(f)) => v.push(Some(f)),
            (ColumnData::Float(v), Value::Int(i)) => v.push(Some(i as f64)),
            (ColumnData::Float(v), Value::Null) => v.push(None),
            (ColumnData::Str(v), Value::Str(s)) => v.push(Some(s)),
            (ColumnData::Str(v), Value::Null) => v.push(None),
            (ColumnData::Timestamp(v), Value::Timestamp(t)) => v.push(Some(t)),
            (ColumnData::Timestamp(v), Value::Int(i)) => v.push(Some(i)),
            (ColumnData::Timestamp(v), Value::Null) => v.push(None),
            (col, value) => {
                return Err(KontraError::data(format!(
                    "type mismatch appending {:?} to {} column",
                    value,
                    col.data_type()
                )))
            }
        }
        Ok(())
    }

    fn with_type(dt: DataType) -> Self {
        match dt {
            DataType::Bool => ColumnData::Bool(Vec::new()),
            DataType::Int => ColumnData::Int(Vec::new()),
            DataType::Float => ColumnData::Float(Vec::new()),
            DataType::String => ColumnData::Str(Vec::new()),
            DataType::Timestamp => ColumnData::Timestamp(Vec::new()),
        }
    }
}

/// A named column
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Columnar frame: named typed columns of equal length
#[derive(Debug, Clone, Default)]
pub struct ColumnarFrame {
    columns: Vec<Column>,
    num_rows: usize,
}

impl ColumnarFrame {
    /// Empty frame with zero rows and zero columns
    pub fn empty() -> Self {
        ColumnarFrame::default()
    }

    /// Build from columns; all columns must have equal length
    pub fn new(columns: Vec<Column>) -> KontraResult<Self> {
        let num_rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        for col in &columns {
            if col.data.len() != num_rows {
                return Err(KontraError::runtime(format!(
                    "column '{}' has {} rows, expected {}",
                    col.name,
                    col.data.len(),
                    num_rows
                )));
            }
        }
        Ok(ColumnarFrame { columns, num_rows })
    }

    /// Column-less frame that still knows its row count. Used when only
    /// dataset-scoped rules run and no column needs materializing.
    pub fn with_row_count(num_rows: usize) -> Self {
        ColumnarFrame {
            columns: Vec::new(),
            num_rows,
        }
    }

    /// Build an empty frame with typed columns (row-append loading)
    pub fn with_schema(schema: &[(String, DataType)]) -> Self {
        let columns = schema
            .iter()
            .map(|(name, dt)| Column {
                name: name.clone(),
                data: ColumnData::with_type(*dt),
            })
            .collect();
        ColumnarFrame {
            columns,
            num_rows: 0,
        }
    }

    /// Append one row of scalars in schema order
    pub fn push_row(&mut self, row: Vec<Value>) -> KontraResult<()> {
        if row.len() != self.columns.len() {
            return Err(KontraError::data(format!(
                "row has {} values, expected {}",
                row.len(),
                self.columns.len()
            )));
        }
        for (col, value) in self.columns.iter_mut().zip(row) {
            col.data.push(value)?;
        }
        self.num_rows += 1;
        Ok(())
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.data)
    }

    /// Column lookup that produces the engine's missing-column error
    pub fn column_required(&self, name: &str) -> KontraResult<&ColumnData> {
        self.column(name).ok_or_else(|| {
            KontraError::data_hint(
                format!("column '{name}' not found in materialized data"),
                format!("available columns: {}", self.column_names().join(", ")),
            )
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Declared schema of the frame
    pub fn schema(&self) -> Vec<(String, DataType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.data.data_type()))
            .collect()
    }

    /// One row rendered as (column, value) pairs, for sample output
    pub fn row_values(&self, row: usize, columns: &[String]) -> Vec<(String, Value)> {
        columns
            .iter()
            .filter_map(|name| {
                self.column(name)
                    .map(|data| (name.clone(), data.value_at(row)))
            })
            .collect()
    }

    /// Append every row of an Arrow `RecordBatch`
    pub fn append_record_batch(&mut self, batch: &RecordBatch) -> KontraResult<()> {
        if self.columns.is_empty() {
            for field in batch.schema().fields() {
                self.columns.push(Column {
                    name: field.name().clone(),
                    data: ColumnData::with_type(arrow_to_data_type(field.data_type())?),
                });
            }
        }
        if batch.num_columns() != self.columns.len() {
            return Err(KontraError::runtime(format!(
                "record batch has {} columns, frame has {}",
                batch.num_columns(),
                self.columns.len()
            )));
        }
        for (col, array) in self.columns.iter_mut().zip(batch.columns()) {
            append_arrow_column(&mut col.data, array.as_ref())?;
        }
        self.num_rows += batch.num_rows();
        Ok(())
    }
}

/// Map an Arrow type onto the engine's scalar types
pub fn arrow_to_data_type(dt: &ArrowDataType) -> KontraResult<DataType> {
    match dt {
        ArrowDataType::Boolean => Ok(DataType::Bool),
        ArrowDataType::Int8
        | ArrowDataType::Int16
        | ArrowDataType::Int32
        | ArrowDataType::Int64
        | ArrowDataType::UInt8
        | ArrowDataType::UInt16
        | ArrowDataType::UInt32 => Ok(DataType::Int),
        ArrowDataType::Float32 | ArrowDataType::Float64 => Ok(DataType::Float),
        ArrowDataType::Utf8 | ArrowDataType::LargeUtf8 => Ok(DataType::String),
        ArrowDataType::Timestamp(_, _) => Ok(DataType::Timestamp),
        other => Err(KontraError::data_hint(
            format!("unsupported column type: {other}"),
            "supported types: bool, int, float, string, timestamp",
        )),
    }
}

fn append_arrow_column(data: &mut ColumnData, array: &dyn Array) -> KontraResult<()> {
    macro_rules! extend_prim {
        ($dst:expr, $arr_ty:ty, $map:expr) => {{
            let arr = array
                .as_any()
                .downcast_ref::<$arr_ty>()
                .ok_or_else(|| KontraError::runtime("arrow column type changed mid-read"))?;
            for i in 0..arr.len() {
                if arr.is_null(i) {
                    $dst.push(None);
                } else {
                    $dst.push(Some($map(arr.value(i))));
                }
            }
        }};
    }

    match (data, array.data_type()) {
        (ColumnData::Bool(dst), ArrowDataType::Boolean) => {
            extend_prim!(dst, BooleanArray, |v: bool| v)
        }
        (ColumnData::Int(dst), ArrowDataType::Int8) => {
            extend_prim!(dst, Int8Array, |v: i8| v as i64)
        }
        (ColumnData::Int(dst), ArrowDataType::Int16) => {
            extend_prim!(dst, Int16Array, |v: i16| v as i64)
        }
        (ColumnData::Int(dst), ArrowDataType::UInt8) => {
            extend_prim!(dst, UInt8Array, |v: u8| v as i64)
        }
        (ColumnData::Int(dst), ArrowDataType::UInt16) => {
            extend_prim!(dst, UInt16Array, |v: u16| v as i64)
        }
        (ColumnData::Int(dst), ArrowDataType::UInt32) => {
            extend_prim!(dst, UInt32Array, |v: u32| v as i64)
        }
        (ColumnData::Int(dst), ArrowDataType::Int32) => {
            extend_prim!(dst, Int32Array, |v: i32| v as i64)
        }
        (ColumnData::Int(dst), ArrowDataType::Int64) => {
            extend_prim!(dst, Int64Array, |v: i64| v)
        }
        (ColumnData::Float(dst), ArrowDataType::Float32) => {
            extend_prim!(dst, Float32Array, |v: f32| v as f64)
        }
        (ColumnData::Float(dst), ArrowDataType::Float64) => {
            extend_prim!(dst, Float64Array, |v: f64| v)
        }
        (ColumnData::Str(dst), ArrowDataType::Utf8) => {
            extend_prim!(dst, StringArray, |v: &str| Arc::from(v))
        }
        (ColumnData::Str(dst), ArrowDataType::LargeUtf8) => {
            extend_prim!(dst, LargeStringArray, |v: &str| Arc::from(v))
        }
        (ColumnData::Timestamp(dst), ArrowDataType::Timestamp(unit, _)) => match unit {
            TimeUnit::Second => extend_prim!(dst, TimestampSecondArray, |v: i64| v * 1000),
            TimeUnit::Millisecond => extend_prim!(dst, TimestampMillisecondArray, |v: i64| v),
            TimeUnit::Microsecond => {
                extend_prim!(dst, TimestampMicrosecondArray, |v: i64| v / 1000)
            }
            TimeUnit::Nanosecond => {
                extend_prim!(dst, TimestampNanosecondArray, |v: i64| v / 1_000_000)
            }
        },
        (data, other) => {
            return Err(KontraError::data(format!(
                "cannot append arrow {} data to {} column",
                other,
                data.data_type()
            )))
        }
    }
    Ok(())
}
