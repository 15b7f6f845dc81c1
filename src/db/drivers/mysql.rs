// MySQL Driver
// Implements DatabaseDriver for MySQL and MariaDB using sqlx

use crate::db::config::DatabaseConfig;
use crate::db::query::{self, PlaceholderStyle};
use crate::db::traits::{
    DatabaseClient, DatabaseDriver, DatabaseError, DatabaseType, Params, Result, ResultSet,
    SqlTemplate, SqlValue,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column, ConnectOptions, Connection, Either, Executor, MySql, Row, Statement, TypeInfo, ValueRef};
use std::time::Instant;
use tokio::sync::Mutex;

/// MySQL client: one sqlx connection
pub struct MySqlClient {
    id: String,
    echo: bool,
    conn: Mutex<Option<MySqlConnection>>,
}

impl MySqlClient {
    /// Run a statement once, keeping whatever it produced: rows, a rows-affected count, or both
    async fn run(conn: &mut MySqlConnection, sql: &str, values: &[SqlValue]) -> Result<ResultSet> {
        let mut result = ResultSet::new(sql);
        let mut affected = 0;

        {
            let mut stream = (&mut *conn).fetch_many(bind_all(sqlx::query(sql), values));
            while let Some(step) = stream.try_next().await.map_err(query_error)? {
                match step {
                    Either::Left(done) => affected += done.rows_affected(),
                    Either::Right(row) => {
                        if result.columns.is_empty() {
                            result.columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                        }
                        result.rows.push(convert_row(&row));
                    }
                }
            }
        }

        if !result.rows.is_empty() {
            return Ok(result);
        }
        if query::returns_rows(sql) {
            // no rows to read names from; ask the server for the statement shape
            let statement = (&mut *conn).prepare(sql).await.map_err(query_error)?;
            result.columns = statement.columns().iter().map(|c| c.name().to_string()).collect();
        } else {
            result.rows_affected = Some(affected);
        }

        Ok(result)
    }
}

#[async_trait::async_trait]
impl DatabaseClient for MySqlClient {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn execute(&self, sql: &SqlTemplate, params: &Params) -> Result<ResultSet> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DatabaseError::ClosedConnection)?;
        let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::Question)?;

        query::trace_statement(self.echo, &self.id, &compiled.sql);
        let start = Instant::now();
        let mut result = Self::run(conn, &compiled.sql, &compiled.values).await?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute_many(&self, sql: &SqlTemplate, params_list: &[Params]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DatabaseError::ClosedConnection)?;

        // an uncommitted transaction rolls back when dropped
        let mut tx = conn.begin().await.map_err(query_error)?;
        let mut total = 0;
        for params in params_list {
            let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::Question)?;
            query::trace_statement(self.echo, &self.id, &compiled.sql);
            let result = Self::run(&mut tx, &compiled.sql, &compiled.values).await?;
            total += result.rows_affected.unwrap_or(0);
        }
        tx.commit().await.map_err(query_error)?;
        Ok(total)
    }

    async fn is_alive(&self) -> bool {
        match self.conn.lock().await.as_mut() {
            Some(conn) => conn.ping().await.is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(connection_id = %self.id, error = %e, "MySQL close reported an error");
            }
            tracing::info!(connection_id = %self.id, "Closed MySQL connection");
        }
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }
}

fn bind_all<'q>(
    mut statement: Query<'q, MySql, MySqlArguments>,
    values: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for value in values {
        statement = match value {
            SqlValue::Null => statement.bind(Option::<String>::None),
            SqlValue::Bool(v) => statement.bind(*v),
            SqlValue::Int(v) => statement.bind(*v),
            SqlValue::Float(v) => statement.bind(*v),
            SqlValue::Text(s) | SqlValue::DateTime(s) => statement.bind(s.clone()),
            SqlValue::Binary(b) => statement.bind(b.clone()),
        };
    }
    statement
}

fn query_error(e: sqlx::Error) -> DatabaseError {
    let message = match &e {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    DatabaseError::query(message, e)
}

fn convert_row(row: &MySqlRow) -> Vec<SqlValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| extract_value(row, idx, col.type_info().name()))
        .collect()
}

/// Extract a value from a MySQL row at the given column index
fn extract_value(row: &MySqlRow, index: usize, type_name: &str) -> SqlValue {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return SqlValue::Null,
        Err(_) => return SqlValue::Null,
        _ => {}
    }
    decode_by_type(row, index, type_name).unwrap_or(SqlValue::Null)
}

/// Decode a value based on its MySQL type name
fn decode_by_type(row: &MySqlRow, index: usize, type_name: &str) -> Option<SqlValue> {
    let value = match type_name {
        // MySQL reports TINYINT(1) as BOOLEAN
        "BOOLEAN" | "BOOL" => SqlValue::Bool(row.try_get::<bool, _>(index).ok()?),

        "TINYINT" => SqlValue::from(row.try_get::<i8, _>(index).ok()?),
        "TINYINT UNSIGNED" => SqlValue::from(row.try_get::<u8, _>(index).ok()?),
        "SMALLINT" | "YEAR" => SqlValue::from(row.try_get::<i16, _>(index).ok()?),
        "SMALLINT UNSIGNED" => SqlValue::from(row.try_get::<u16, _>(index).ok()?),
        "MEDIUMINT" | "INT" | "INTEGER" => SqlValue::from(row.try_get::<i32, _>(index).ok()?),
        "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "INTEGER UNSIGNED" => {
            SqlValue::from(row.try_get::<u32, _>(index).ok()?)
        }
        "BIGINT" => SqlValue::Int(row.try_get::<i64, _>(index).ok()?),
        "BIGINT UNSIGNED" => {
            let v = row.try_get::<u64, _>(index).ok()?;
            i64::try_from(v)
                .map(SqlValue::Int)
                .unwrap_or_else(|_| SqlValue::Text(v.to_string()))
        }

        "FLOAT" => SqlValue::from(row.try_get::<f32, _>(index).ok()?),
        "DOUBLE" | "DOUBLE PRECISION" | "REAL" => SqlValue::Float(row.try_get::<f64, _>(index).ok()?),
        "DECIMAL" | "NUMERIC" | "DEC" | "FIXED" => {
            SqlValue::Float(row.try_get::<Decimal, _>(index).ok()?.to_f64()?)
        }

        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" => {
            SqlValue::Text(row.try_get::<String, _>(index).ok()?)
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            SqlValue::Binary(row.try_get::<Vec<u8>, _>(index).ok()?)
        }

        "DATE" => SqlValue::from(row.try_get::<NaiveDate, _>(index).ok()?),
        "TIME" => SqlValue::DateTime(row.try_get::<NaiveTime, _>(index).ok()?.to_string()),
        "DATETIME" => SqlValue::from(row.try_get::<NaiveDateTime, _>(index).ok()?),
        "TIMESTAMP" => match row.try_get::<DateTime<Utc>, _>(index) {
            Ok(dt) => SqlValue::from(dt),
            Err(_) => SqlValue::from(row.try_get::<NaiveDateTime, _>(index).ok()?),
        },

        "JSON" => SqlValue::Text(row.try_get::<serde_json::Value, _>(index).ok()?.to_string()),

        // ENUM, SET and anything newer: whatever text the server sent
        _ => match row.try_get_unchecked::<String, _>(index) {
            Ok(s) => SqlValue::Text(s),
            Err(_) => {
                tracing::debug!(column_type = type_name, "Unsupported MySQL column type, returning NULL");
                return None;
            }
        },
    };
    Some(value)
}

/// MySQL driver implementation
pub struct MySqlDriver;

impl MySqlDriver {
    /// Create a new MySQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build MySqlConnectOptions from the unified config
    fn build_connect_options(config: &DatabaseConfig) -> Result<MySqlConnectOptions> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::Configuration("Host is required".to_string()))?;
        let username = config
            .username
            .as_deref()
            .ok_or_else(|| DatabaseError::Configuration("Username is required".to_string()))?;

        let charset = config.mysql_charset();
        if !charset.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DatabaseError::Configuration(format!(
                "Invalid MySQL charset '{}'",
                charset
            )));
        }

        Ok(MySqlConnectOptions::new()
            .host(host)
            .port(config.get_port())
            .username(username)
            .password(&config.password)
            .database(&config.database)
            .charset(charset)
            .ssl_mode(MySqlSslMode::Preferred)
            .disable_statement_logging())
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MySqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        config.validate()?;
        let options = Self::build_connect_options(config)?;

        let connecting = options.connect();
        let conn = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connecting).await.map_err(|_| {
                DatabaseError::connection_message(format!(
                    "Timed out after {}s connecting to {}",
                    timeout.as_secs(),
                    config.target()
                ))
            })?,
            None => connecting.await,
        }
        .map_err(|e| DatabaseError::connection("Failed to connect to MySQL", e))?;

        Ok(Box::new(MySqlClient {
            id: super::new_connection_id(),
            echo: config.echo,
            conn: Mutex::new(Some(conn)),
        }))
    }
}
