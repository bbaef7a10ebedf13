//! SQL Server driver over `tiberius`. The client is async; a private
//! current-thread tokio runtime drives it so the engine's call surface
//! stays synchronous.

use super::{RelationTerm, SqlRunner};
use crate::dataset::{DbLocation, Dialect};
use crate::error::{KontraError, KontraResult};
use crate::value::{DataType, Value};
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// Millisecond offsets for SQL Server epoch bases
const MILLIS_1900_TO_EPOCH: i64 = 2_208_988_800_000;
const DAYS_CE_TO_EPOCH: i64 = 719_162;

pub struct MssqlRunner {
    runtime: Runtime,
    client: Client<Compat<TcpStream>>,
}

impl MssqlRunner {
    /// Open an engine-owned connection
    pub fn connect(location: &DbLocation) -> KontraResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| KontraError::connection(format!("tokio runtime init failed: {e}")))?;

        let mut config = Config::new();
        config.host(&location.host);
        config.port(location.port.unwrap_or(1433));
        config.database(&location.database);
        config.trust_cert();
        match (&location.user, &location.password) {
            (Some(user), Some(password)) => {
                config.authentication(AuthMethod::sql_server(user, password));
            }
            _ => {
                return Err(KontraError::connection(
                    "mssql URIs require user and password credentials",
                ))
            }
        }

        let client = runtime
            .block_on(async {
                let tcp = TcpStream::connect(config.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Client::connect(config, tcp.compat_write())
                    .await
                    .map_err(std::io::Error::other)
            })
            .map_err(|e| KontraError::connection(format!("mssql connect failed: {e}")))?;

        Ok(MssqlRunner { runtime, client })
    }
}

impl SqlRunner for MssqlRunner {
    fn dialect(&self) -> Dialect {
        Dialect::Mssql
    }

    fn query_rows(&mut self, sql: &str) -> KontraResult<Vec<Vec<Value>>> {
        let rows = self
            .runtime
            .block_on(async {
                let stream = self.client.simple_query(sql).await?;
                stream.into_first_result().await
            })
            .map_err(|e| KontraError::sql(format!("mssql query failed: {e}")))?;

        rows.into_iter().map(convert_row).collect()
    }

    fn describe(&mut self, relation: &RelationTerm) -> KontraResult<Vec<(String, DataType)>> {
        let (schema, table) = match relation {
            RelationTerm::Table { schema, table } => (schema, table),
            other => {
                return Err(KontraError::runtime(format!(
                    "mssql driver cannot describe {other:?}"
                )))
            }
        };
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{}' AND TABLE_NAME = '{}' ORDER BY ORDINAL_POSITION",
            schema.replace('\'', "''"),
            table.replace('\'', "''"),
        );
        let rows = self.query_rows(&sql)?;
        if rows.is_empty() {
            return Err(KontraError::data_hint(
                format!("table '{schema}.{table}' not found"),
                "check the schema-qualified table name in the dataset URI",
            ));
        }
        Ok(rows
            .into_iter()
            .filter_map(|row| match (row.first(), row.get(1)) {
                (Some(Value::Str(name)), Some(Value::Str(ty))) => {
                    Some((name.to_string(), mssql_type_name(ty)))
                }
                _ => None,
            })
            .collect())
    }
}

fn mssql_type_name(type_name: &str) -> DataType {
    match type_name.to_lowercase().as_str() {
        "bit" => DataType::Bool,
        "tinyint" | "smallint" | "int" | "bigint" => DataType::Int,
        "real" | "float" | "decimal" | "numeric" | "money" | "smallmoney" => DataType::Float,
        "date" | "datetime" | "datetime2" | "smalldatetime" | "datetimeoffset" => {
            DataType::Timestamp
        }
        // char, varchar, nvarchar, text, uniqueidentifier, ...
        _ => DataType::String,
    }
}

fn convert_row(row: tiberius::Row) -> KontraResult<Vec<Value>> {
    use tiberius::ColumnData;

    let mut values = Vec::with_capacity(row.len());
    for data in row.into_iter() {
        let value = match data {
            ColumnData::Bit(v) => v.map(Value::Bool),
            ColumnData::U8(v) => v.map(|i| Value::Int(i as i64)),
            ColumnData::I16(v) => v.map(|i| Value::Int(i as i64)),
            ColumnData::I32(v) => v.map(|i| Value::Int(i as i64)),
            ColumnData::I64(v) => v.map(Value::Int),
            ColumnData::F32(v) => v.map(|f| Value::Float(f as f64)),
            ColumnData::F64(v) => v.map(Value::Float),
            ColumnData::String(v) => v.map(|s| Value::string(s.as_ref())),
            ColumnData::Numeric(v) => v.map(|n| {
                Value::Float(n.value() as f64 / 10f64.powi(n.scale() as i32))
            }),
            ColumnData::DateTime(v) => v.map(|dt| {
                let millis = dt.days() as i64 * 86_400_000
                    + dt.seconds_fragments() as i64 * 1000 / 300
                    - MILLIS_1900_TO_EPOCH;
                Value::Timestamp(millis)
            }),
            ColumnData::SmallDateTime(v) => v.map(|dt| {
                let millis = dt.days() as i64 * 86_400_000
                    + dt.seconds_fragments() as i64 * 60_000
                    - MILLIS_1900_TO_EPOCH;
                Value::Timestamp(millis)
            }),
            ColumnData::Date(v) => v.map(|d| {
                Value::Timestamp((d.days() as i64 - DAYS_CE_TO_EPOCH) * 86_400_000)
            }),
            ColumnData::DateTime2(v) => v.map(|dt| Value::Timestamp(datetime2_millis(&dt))),
            ColumnData::DateTimeOffset(v) => v.map(|dto| {
                Value::Timestamp(
                    datetime2_millis(&dto.datetime2()) - dto.offset() as i64 * 60_000,
                )
            }),
            other => {
                return Err(KontraError::data_hint(
                    format!("unsupported mssql value: {other:?}"),
                    "supported types: bit, int, float, string, datetime",
                ))
            }
        };
        values.push(value.unwrap_or(Value::Null));
    }
    Ok(values)
}

fn datetime2_millis(dt: &tiberius::time::DateTime2) -> i64 {
    let days = dt.date().days() as i64 - DAYS_CE_TO_EPOCH;
    let time = dt.time();
    let millis_in_day = time.increments() as i64 * 1000 / 10i64.pow(time.scale() as u32);
    days * 86_400_000 + millis_in_day
}
