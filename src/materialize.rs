//! # Materializer
//!
//! Projected columnar loads for every handle variant. Column projection
//! is pushed to the source: Parquet reads use a `ProjectionMask`,
//! database reads SELECT only the projected columns, and the CSV reader
//! drops unprojected columns before building the frame.
//!
//! Object-store datasets are fetched into the call's scoped staging
//! directory first; the staging directory is a `TempDir` and is released
//! on every exit path. CSV staging (CSV→Parquet through DuckDB) is
//! available behind a config switch for repeated reads of large files.

use crate::dataset::{DatasetHandle, Dialect, FileFormat};
use crate::driver::{self, RelationTerm, SqlRunner};
use crate::error::{KontraError, KontraResult};
use crate::frame::{arrow_to_data_type, Column, ColumnData, ColumnarFrame};
use crate::sqlgen::{quote_ident, relation_sql};
use crate::value::{DataType, Value};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Scoped working directory for staged data; removed on drop
pub struct Staging {
    dir: TempDir,
}

impl Staging {
    pub fn create(base: Option<&Path>) -> KontraResult<Self> {
        let dir = match base {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                TempDir::new_in(base)?
            }
            None => TempDir::new()?,
        };
        Ok(Staging { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Fetch an object-store dataset into the staging directory and return
/// the local path
pub fn stage_object_store(url: &str, staging: &Staging) -> KontraResult<PathBuf> {
    use object_store::ObjectStore;

    let (store, key): (Box<dyn ObjectStore>, String) = if let Some(rest) =
        url.strip_prefix("s3://")
    {
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| KontraError::data(format!("missing object key in '{url}'")))?;
        let store = object_store::aws::AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| KontraError::connection(format!("s3 store init failed: {e}")))?;
        (Box::new(store), key.to_string())
    } else if let Some(rest) = url.strip_prefix("abfss://") {
        // abfss://container@account.dfs.core.windows.net/path
        let (container_at_host, key) = rest
            .split_once('/')
            .ok_or_else(|| KontraError::data(format!("missing object key in '{url}'")))?;
        let container = container_at_host
            .split_once('@')
            .map(|(c, _)| c)
            .ok_or_else(|| KontraError::data(format!("missing container in '{url}'")))?;
        let store = object_store::azure::MicrosoftAzureBuilder::from_env()
            .with_container_name(container)
            .build()
            .map_err(|e| KontraError::connection(format!("azure store init failed: {e}")))?;
        (Box::new(store), key.to_string())
    } else {
        return Err(KontraError::data(format!(
            "unsupported object-store URL '{url}'"
        )));
    };

    let file_name = key.rsplit('/').next().unwrap_or("staged.data").to_string();
    let target = staging.path().join(file_name);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| KontraError::connection(format!("tokio runtime init failed: {e}")))?;
    let bytes = runtime
        .block_on(async {
            let path = object_store::path::Path::from(key.as_str());
            store.get(&path).await?.bytes().await
        })
        .map_err(|e| KontraError::connection(format!("object fetch failed for '{url}': {e}")))?;

    std::fs::write(&target, &bytes)?;
    debug!(url, target = %target.display(), bytes = bytes.len(), "staged object-store dataset");
    Ok(target)
}

/// Stage a CSV file as Parquet through DuckDB
pub fn stage_csv_as_parquet(csv_path: &Path, staging: &Staging) -> KontraResult<PathBuf> {
    let target = staging.path().join("staged.parquet");
    let mut runner = driver::DuckDbRunner::in_memory()?;
    let source = relation_sql(Dialect::DuckDb, &RelationTerm::CsvFile(csv_path.to_path_buf()))?;
    let sql = format!(
        "COPY (SELECT * FROM {source}) TO '{}' (FORMAT PARQUET)",
        target.display().to_string().replace('\'', "''")
    );
    runner.query_rows(&sql)?;
    debug!(source = %csv_path.display(), target = %target.display(), "staged CSV as Parquet");
    Ok(target)
}

/// Column names and types without reading rows (Parquet schema, database
/// catalog, frame schema). CSV needs a read to infer types.
pub fn describe(
    handle: &DatasetHandle,
    runner: Option<&mut dyn SqlRunner>,
) -> KontraResult<Vec<(String, DataType)>> {
    match handle {
        DatasetHandle::File { path, format } => match format {
            FileFormat::Parquet => describe_parquet(path),
            FileFormat::Csv => Ok(load_csv(path, None)?.schema()),
        },
        DatasetHandle::Frame { frame, .. } => Ok(frame.schema()),
        DatasetHandle::Database { location, .. } => {
            let runner = runner.ok_or_else(|| {
                KontraError::runtime("database describe requires an open connection")
            })?;
            runner.describe(&RelationTerm::Table {
                schema: location.schema.clone(),
                table: location.table.clone(),
            })
        }
        DatasetHandle::Connection { schema, table, .. } => {
            let runner = runner.ok_or_else(|| {
                KontraError::runtime("database describe requires an open connection")
            })?;
            runner.describe(&RelationTerm::Table {
                schema: schema.clone(),
                table: table.clone(),
            })
        }
        DatasetHandle::ObjectStore { url, .. } => Err(KontraError::runtime(format!(
            "object-store handle '{url}' must be staged before describe"
        ))),
    }
}

/// Materialize a projected frame. `projection = None` loads the full
/// declared column set.
pub fn materialize(
    handle: &DatasetHandle,
    projection: Option<&[String]>,
    runner: Option<&mut dyn SqlRunner>,
) -> KontraResult<ColumnarFrame> {
    match handle {
        DatasetHandle::File { path, format } => match format {
            FileFormat::Parquet => load_parquet(path, projection),
            FileFormat::Csv => load_csv(path, projection),
        },
        DatasetHandle::Frame { frame, .. } => project_frame(frame, projection),
        DatasetHandle::Database { dialect, location } => {
            let runner = runner.ok_or_else(|| {
                KontraError::runtime("database materialization requires an open connection")
            })?;
            load_database(
                runner,
                *dialect,
                &RelationTerm::Table {
                    schema: location.schema.clone(),
                    table: location.table.clone(),
                },
                projection,
            )
        }
        DatasetHandle::Connection {
            dialect,
            schema,
            table,
            ..
        } => {
            let runner = runner.ok_or_else(|| {
                KontraError::runtime("database materialization requires an open connection")
            })?;
            load_database(
                runner,
                *dialect,
                &RelationTerm::Table {
                    schema: schema.clone(),
                    table: table.clone(),
                },
                projection,
            )
        }
        DatasetHandle::ObjectStore { url, .. } => Err(KontraError::runtime(format!(
            "object-store handle '{url}' must be staged before materialization"
        ))),
    }
}

/// Parquet schema from the file footer
pub fn describe_parquet(path: &Path) -> KontraResult<Vec<(String, DataType)>> {
    let file = open_dataset_file(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    builder
        .schema()
        .fields()
        .iter()
        .map(|field| Ok((field.name().clone(), arrow_to_data_type(field.data_type())?)))
        .collect()
}

/// Projected Parquet read. An empty projection reads no column data at
/// all: the row count comes from the footer.
pub fn load_parquet(path: &Path, projection: Option<&[String]>) -> KontraResult<ColumnarFrame> {
    if let Some(cols) = projection {
        if cols.is_empty() {
            let file = open_dataset_file(path)?;
            let reader = SerializedFileReader::new(file)?;
            let num_rows = reader.metadata().file_metadata().num_rows().max(0) as usize;
            return Ok(ColumnarFrame::with_row_count(num_rows));
        }
    }

    let file = open_dataset_file(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let reader = match projection {
        Some(cols) => {
            let schema = builder.schema().clone();
            let mut indices = Vec::with_capacity(cols.len());
            for name in cols {
                let idx = schema.fields().iter().position(|f| f.name() == name);
                match idx {
                    Some(idx) => indices.push(idx),
                    None => {
                        return Err(KontraError::data_hint(
                            format!("column '{name}' not found in '{}'", path.display()),
                            format!(
                                "available columns: {}",
                                schema
                                    .fields()
                                    .iter()
                                    .map(|f| f.name().as_str())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ),
                        ))
                    }
                }
            }
            let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
            builder.with_projection(mask).build()?
        }
        None => builder.build()?,
    };

    let mut frame = ColumnarFrame::empty();
    for batch in reader {
        frame.append_record_batch(&batch?)?;
    }
    Ok(frame)
}

/// Typed CSV reader. Types are inferred per column: all-int columns load
/// as int, numeric mixes as float, `true`/`false` columns as bool,
/// everything else as string. Empty fields and `null`/`NA`/`\N` markers
/// are NULLs.
pub fn load_csv(path: &Path, projection: Option<&[String]>) -> KontraResult<ColumnarFrame> {
    let file = open_dataset_file(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => parse_csv_line(&line?),
        None => return Ok(ColumnarFrame::empty()),
    };

    let keep: Vec<usize> = match projection {
        Some(cols) => {
            let mut indices = Vec::with_capacity(cols.len());
            for name in cols {
                match header.iter().position(|h| h == name) {
                    Some(idx) => indices.push(idx),
                    None => {
                        return Err(KontraError::data_hint(
                            format!("column '{name}' not found in '{}'", path.display()),
                            format!("available columns: {}", header.join(", ")),
                        ))
                    }
                }
            }
            indices
        }
        None => (0..header.len()).collect(),
    };

    let mut raw_columns: Vec<Vec<Option<String>>> = vec![Vec::new(); keep.len()];
    let mut row_count = 0usize;
    let mut line_no = 1usize;
    for line in lines {
        let line = line?;
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_line(&line);
        if fields.len() != header.len() {
            return Err(KontraError::data(format!(
                "row {} of '{}' has {} fields, expected {}",
                line_no,
                path.display(),
                fields.len(),
                header.len()
            )));
        }
        for (slot, &idx) in keep.iter().enumerate() {
            raw_columns[slot].push(null_aware(&fields[idx]));
        }
        row_count += 1;
    }

    if keep.is_empty() {
        return Ok(ColumnarFrame::with_row_count(row_count));
    }

    let columns = keep
        .iter()
        .zip(raw_columns)
        .map(|(&idx, raw)| Column {
            name: header[idx].clone(),
            data: infer_column(raw),
        })
        .collect();
    ColumnarFrame::new(columns)
}

/// Projected SELECT through a driver
pub fn load_database(
    runner: &mut dyn SqlRunner,
    dialect: Dialect,
    relation: &RelationTerm,
    projection: Option<&[String]>,
) -> KontraResult<ColumnarFrame> {
    let declared = runner.describe(relation)?;
    let schema: Vec<(String, DataType)> = match projection {
        Some(cols) => {
            let mut schema = Vec::with_capacity(cols.len());
            for name in cols {
                match declared.iter().find(|(n, _)| n == name) {
                    Some(entry) => schema.push(entry.clone()),
                    None => {
                        return Err(KontraError::data_hint(
                            format!("column '{name}' not found in table"),
                            format!(
                                "available columns: {}",
                                declared
                                    .iter()
                                    .map(|(n, _)| n.as_str())
                                    .collect::<Vec<_>>()
                                    .join(", ")
                            ),
                        ))
                    }
                }
            }
            schema
        }
        None => declared,
    };

    let rel = relation_sql(dialect, relation)?;
    if schema.is_empty() {
        let rows = runner.query_rows(&format!("SELECT COUNT(*) FROM {rel}"))?;
        let count = match rows.first().and_then(|r| r.first()) {
            Some(Value::Int(n)) => (*n).max(0) as usize,
            _ => 0,
        };
        return Ok(ColumnarFrame::with_row_count(count));
    }

    let cols = schema
        .iter()
        .map(|(name, _)| quote_ident(dialect, name))
        .collect::<Vec<_>>()
        .join(", ");
    driver::fetch_frame(runner, &format!("SELECT {cols} FROM {rel}"), &schema)
}

fn project_frame(
    frame: &Arc<ColumnarFrame>,
    projection: Option<&[String]>,
) -> KontraResult<ColumnarFrame> {
    match projection {
        None => Ok(frame.as_ref().clone()),
        Some(cols) => {
            if cols.is_empty() {
                return Ok(ColumnarFrame::with_row_count(frame.num_rows()));
            }
            let columns: KontraResult<Vec<Column>> = cols
                .iter()
                .map(|name| {
                    frame.column_required(name).map(|data| Column {
                        name: name.clone(),
                        data: data.clone(),
                    })
                })
                .collect();
            ColumnarFrame::new(columns?)
        }
    }
}

fn open_dataset_file(path: &Path) -> KontraResult<File> {
    File::open(path).map_err(|e| {
        KontraError::data_hint(
            format!("cannot open '{}': {e}", path.display()),
            "check the dataset path and permissions",
        )
    })
}

fn null_aware(field: &str) -> Option<String> {
    if field.is_empty()
        || field.eq_ignore_ascii_case("null")
        || field.eq_ignore_ascii_case("na")
        || field == "\\N"
    {
        None
    } else {
        Some(field.to_string())
    }
}

fn infer_column(raw: Vec<Option<String>>) -> ColumnData {
    let non_null: Vec<&String> = raw.iter().flatten().collect();
    if !non_null.is_empty() && non_null.iter().all(|s| s.parse::<i64>().is_ok()) {
        return ColumnData::Int(
            raw.iter()
                .map(|v| v.as_ref().and_then(|s| s.parse().ok()))
                .collect(),
        );
    }
    if !non_null.is_empty() && non_null.iter().all(|s| s.parse::<f64>().is_ok()) {
        return ColumnData::Float(
            raw.iter()
                .map(|v| v.as_ref().and_then(|s| s.parse().ok()))
                .collect(),
        );
    }
    if !non_null.is_empty()
        && non_null
            .iter()
            .all(|s| s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false"))
    {
        return ColumnData::Bool(
            raw.iter()
                .map(|v| v.as_ref().map(|s| s.eq_ignore_ascii_case("true")))
                .collect(),
        );
    }
    ColumnData::Str(
        raw.into_iter()
            .map(|v| v.map(|s| Arc::from(s.as_str())))
            .collect(),
    )
}

/// Parse a CSV line with quote handling
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == ',' {
            fields.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    fields.push(current.trim().to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_csv_type_inference() {
        let (_dir, path) = write_csv("id,score,name,flag\n1,1.5,alice,true\n2,,\"b,ob\",false\n");
        let frame = load_csv(&path, None).unwrap();
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.column("id").unwrap().data_type(), DataType::Int);
        assert_eq!(frame.column("score").unwrap().data_type(), DataType::Float);
        assert_eq!(frame.column("name").unwrap().data_type(), DataType::String);
        assert_eq!(frame.column("flag").unwrap().data_type(), DataType::Bool);
        assert!(frame.column("score").unwrap().is_null_at(1));
        assert_eq!(
            frame.column("name").unwrap().value_at(1),
            Value::string("b,ob")
        );
    }

    #[test]
    fn test_csv_projection() {
        let (_dir, path) = write_csv("a,b,c\n1,2,3\n4,5,6\n");
        let frame = load_csv(&path, Some(&["c".to_string(), "a".to_string()])).unwrap();
        assert_eq!(frame.column_names(), vec!["c", "a"]);
        assert_eq!(frame.column("c").unwrap().value_at(1), Value::Int(6));
    }

    #[test]
    fn test_csv_missing_projected_column() {
        let (_dir, path) = write_csv("a,b\n1,2\n");
        let err = load_csv(&path, Some(&["zz".to_string()])).unwrap_err();
        assert_eq!(err.taxonomy(), "data");
        assert!(err.hint().unwrap().contains("a, b"));
    }

    #[test]
    fn test_csv_empty_projection_counts_rows() {
        let (_dir, path) = write_csv("a\n1\n2\n3\n");
        let frame = load_csv(&path, Some(&[])).unwrap();
        assert_eq!(frame.num_rows(), 3);
        assert_eq!(frame.num_columns(), 0);
    }

    #[test]
    fn test_csv_ragged_row_rejected() {
        let (_dir, path) = write_csv("a,b\n1\n");
        let err = load_csv(&path, None).unwrap_err();
        assert!(err.to_string().contains("expected 2"));
    }

    #[test]
    fn test_missing_file_is_data_error() {
        let err = load_parquet(Path::new("/nope/missing.parquet"), None).unwrap_err();
        assert_eq!(err.taxonomy(), "data");
    }

    #[test]
    fn test_frame_projection() {
        let mut frame = ColumnarFrame::with_schema(&[
            ("x".to_string(), DataType::Int),
            ("y".to_string(), DataType::Int),
        ]);
        frame.push_row(vec![Value::Int(1), Value::Int(2)]).unwrap();
        let handle = DatasetHandle::from_frame("t", frame);
        let projected = materialize(&handle, Some(&["y".to_string()]), None).unwrap();
        assert_eq!(projected.column_names(), vec!["y"]);
        assert!(projected.column("x").is_none());
    }
}
