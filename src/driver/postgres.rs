//! Postgres driver over the synchronous `postgres` client. Owned
//! connections are opened from a parsed database URI and dropped at the
//! end of the validation call.

use super::{RelationTerm, SqlRunner};
use crate::dataset::{DbLocation, Dialect};
use crate::error::{KontraError, KontraResult};
use crate::value::{DataType, Value};
use postgres::types::Type;
use postgres::{Client, NoTls, Row};

pub struct PostgresRunner {
    client: Client,
}

impl PostgresRunner {
    /// Open an engine-owned connection
    pub fn connect(location: &DbLocation) -> KontraResult<Self> {
        let mut config = postgres::Config::new();
        config.host(&location.host);
        config.port(location.port.unwrap_or(5432));
        config.dbname(&location.database);
        if let Some(user) = &location.user {
            config.user(user);
        }
        if let Some(password) = &location.password {
            config.password(password);
        }
        let client = config
            .connect(NoTls)
            .map_err(|e| KontraError::connection(format!("postgres connect failed: {e}")))?;
        Ok(PostgresRunner { client })
    }

    /// Wrap an already-open client (caller-owned handles)
    pub fn from_client(client: Client) -> Self {
        PostgresRunner { client }
    }
}

impl SqlRunner for PostgresRunner {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn query_rows(&mut self, sql: &str) -> KontraResult<Vec<Vec<Value>>> {
        let rows = self
            .client
            .query(sql, &[])
            .map_err(|e| KontraError::sql(format!("postgres query failed: {e}")))?;
        rows.iter().map(convert_row).collect()
    }

    fn describe(&mut self, relation: &RelationTerm) -> KontraResult<Vec<(String, DataType)>> {
        let (schema, table) = match relation {
            RelationTerm::Table { schema, table } => (schema, table),
            other => {
                return Err(KontraError::runtime(format!(
                    "postgres driver cannot describe {other:?}"
                )))
            }
        };
        let sql = format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = '{}' AND table_name = '{}' ORDER BY ordinal_position",
            escape_literal(schema),
            escape_literal(table),
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
                    Some((name.to_string(), pg_type_name(ty)))
                }
                _ => None,
            })
            .collect())
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

fn pg_type_name(type_name: &str) -> DataType {
    match type_name.to_lowercase().as_str() {
        "boolean" => DataType::Bool,
        "smallint" | "integer" | "bigint" => DataType::Int,
        "real" | "double precision" | "numeric" => DataType::Float,
        s if s.starts_with("timestamp") || s == "date" => DataType::Timestamp,
        // text, varchar, char, uuid, json, ... surface as string
        _ => DataType::String,
    }
}

fn convert_row(row: &Row) -> KontraResult<Vec<Value>> {
    let mut values = Vec::with_capacity(row.len());
    for (i, column) in row.columns().iter().enumerate() {
        values.push(convert_column(row, i, column.type_())?);
    }
    Ok(values)
}

fn convert_column(row: &Row, i: usize, ty: &Type) -> KontraResult<Value> {
    let sql_err = |e: postgres::Error| KontraError::sql(format!("postgres value error: {e}"));

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(i).map_err(sql_err)?.map(Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(i)
            .map_err(sql_err)?
            .map(|v| Value::Int(v as i64))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(i)
            .map_err(sql_err)?
            .map(|v| Value::Int(v as i64))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(i).map_err(sql_err)?.map(Value::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(i)
            .map_err(sql_err)?
            .map(|v| Value::Float(v as f64))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(i).map_err(sql_err)?.map(Value::Float)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        row.try_get::<_, Option<String>>(i)
            .map_err(sql_err)?
            .map(Value::string)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(i)
            .map_err(sql_err)?
            .map(|dt| Value::Timestamp(dt.and_utc().timestamp_millis()))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
            .map_err(sql_err)?
            .map(|dt| Value::Timestamp(dt.timestamp_millis()))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(i)
            .map_err(sql_err)?
            .map(|d| {
                Value::Timestamp(
                    d.and_hms_opt(0, 0, 0)
                        .map(|dt| dt.and_utc().timestamp_millis())
                        .unwrap_or(0),
                )
            })
    } else {
        return Err(KontraError::data_hint(
            format!("unsupported postgres column type: {ty}"),
            "cast the column in a custom_sql_check or exclude it from the projection",
        ));
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_mapping() {
        assert_eq!(pg_type_name("bigint"), DataType::Int);
        assert_eq!(pg_type_name("double precision"), DataType::Float);
        assert_eq!(pg_type_name("timestamp without time zone"), DataType::Timestamp);
        assert_eq!(pg_type_name("character varying"), DataType::String);
        assert_eq!(pg_type_name("jsonb"), DataType::String);
    }

    #[test]
    fn test_literal_escaping() {
        assert_eq!(escape_literal("it's"), "it''s");
    }
}
