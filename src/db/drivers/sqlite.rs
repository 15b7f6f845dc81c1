// SQLite Driver
// Implements DatabaseDriver for SQLite using rusqlite

use crate::db::config::DatabaseConfig;
use crate::db::query::{self, PlaceholderStyle};
use crate::db::traits::{
    DatabaseClient, DatabaseDriver, DatabaseError, DatabaseType, Params, Result, ResultSet,
    SqlTemplate, SqlValue,
};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection as RusqliteConnection, OpenFlags, ToSql};
use std::time::Instant;
use tokio::sync::Mutex;

/// SQLite client: one rusqlite connection
pub struct SqliteClient {
    id: String,
    echo: bool,
    conn: Mutex<Option<RusqliteConnection>>,
}

impl SqliteClient {
    /// Extract cell value from row
    fn cell_value_from_row(row: &rusqlite::Row, idx: usize) -> Result<SqlValue> {
        let value = row
            .get_ref(idx)
            .map_err(|e| DatabaseError::query("Failed to read column", e))?;

        Ok(match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Int(v),
            ValueRef::Real(v) => SqlValue::Float(v),
            // TEXT cells may hold bytes that are not UTF-8; keep them intact
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => SqlValue::Text(text.to_string()),
                Err(_) => SqlValue::Binary(bytes.to_vec()),
            },
            ValueRef::Blob(bytes) => SqlValue::Binary(bytes.to_vec()),
        })
    }

    fn run(conn: &RusqliteConnection, sql: &str, values: &[SqlValue]) -> Result<ResultSet> {
        let mut result = ResultSet::new(sql);
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| DatabaseError::query("Failed to prepare statement", e))?;

        let column_count = stmt.column_count();
        if column_count > 0 {
            result.columns = stmt.column_names().into_iter().map(String::from).collect();

            let mut rows = stmt
                .query(params_from_iter(values.iter()))
                .map_err(|e| DatabaseError::query("Query execution failed", e))?;
            while let Some(row) = rows
                .next()
                .map_err(|e| DatabaseError::query("Failed to fetch row", e))?
            {
                let cells = (0..column_count)
                    .map(|idx| Self::cell_value_from_row(row, idx))
                    .collect::<Result<Vec<_>>>()?;
                result.rows.push(cells);
            }
        } else {
            let affected = stmt
                .execute(params_from_iter(values.iter()))
                .map_err(|e| DatabaseError::query("Query execution failed", e))?;
            result.rows_affected = Some(affected as u64);
        }

        Ok(result)
    }
}

#[async_trait::async_trait]
impl DatabaseClient for SqliteClient {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn execute(&self, sql: &SqlTemplate, params: &Params) -> Result<ResultSet> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(DatabaseError::ClosedConnection)?;
        let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::NumberedQuestion)?;

        query::trace_statement(self.echo, &self.id, &compiled.sql);
        let start = Instant::now();
        let mut result = Self::run(conn, &compiled.sql, &compiled.values)?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute_many(&self, sql: &SqlTemplate, params_list: &[Params]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DatabaseError::ClosedConnection)?;

        // one transaction for the whole batch; dropping it on error rolls back
        let tx = conn
            .transaction()
            .map_err(|e| DatabaseError::query("Failed to begin transaction", e))?;
        let mut total = 0;
        for params in params_list {
            let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::NumberedQuestion)?;
            query::trace_statement(self.echo, &self.id, &compiled.sql);
            let result = Self::run(&tx, &compiled.sql, &compiled.values)?;
            total += result.rows_affected.unwrap_or(0);
        }
        tx.commit()
            .map_err(|e| DatabaseError::query("Failed to commit transaction", e))?;
        Ok(total)
    }

    async fn is_alive(&self) -> bool {
        match self.conn.lock().await.as_ref() {
            Some(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            None => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            if let Err((_, e)) = conn.close() {
                tracing::warn!(connection_id = %self.id, error = %e, "SQLite close reported an error");
            }
            tracing::info!(connection_id = %self.id, "Closed SQLite connection");
        }
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.conn.lock().await.is_none()
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(*v as i64)),
            SqlValue::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Float(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(s) | SqlValue::DateTime(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    /// Create a new SQLite driver
    pub fn new() -> Self {
        Self
    }

    /// Open SQLite connection
    fn open_connection(config: &DatabaseConfig) -> Result<RusqliteConnection> {
        let conn = if config.is_in_memory() {
            RusqliteConnection::open_in_memory()
        } else {
            RusqliteConnection::open_with_flags(
                config.sqlite_path(),
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
        }
        .map_err(|e| DatabaseError::connection("Failed to open SQLite database", e))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::connection("Failed to configure SQLite database", e))?;

        Ok(conn)
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        config.validate()?;
        let conn = Self::open_connection(config)?;

        Ok(Box::new(SqliteClient {
            id: super::new_connection_id(),
            echo: config.echo,
            conn: Mutex::new(Some(conn)),
        }))
    }
}
