// PostgreSQL Driver
// Implements DatabaseDriver for PostgreSQL using tokio-postgres

use crate::db::config::DatabaseConfig;
use crate::db::identifier::quote_identifier;
use crate::db::query::{self, PlaceholderStyle};
use crate::db::traits::{
    BoxError, DatabaseClient, DatabaseDriver, DatabaseError, DatabaseType, Params, Result,
    ResultSet, SqlTemplate, SqlValue,
};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, GenericClient, NoTls, Row};

/// Live tokio-postgres client plus the task driving its socket
struct Session {
    client: Client,
    connection_task: JoinHandle<()>,
}

/// PostgreSQL client: one tokio-postgres connection
pub struct PostgresClient {
    id: String,
    echo: bool,
    session: Mutex<Option<Session>>,
}

impl PostgresClient {
    async fn run<C: GenericClient + Sync>(client: &C, sql: &str, values: &[SqlValue]) -> Result<ResultSet> {
        let mut result = ResultSet::new(sql);
        let statement = client.prepare(sql).await.map_err(query_error)?;
        let params: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        if statement.columns().is_empty() {
            let affected = client.execute(&statement, &params).await.map_err(query_error)?;
            result.rows_affected = Some(affected);
        } else {
            result.columns = statement.columns().iter().map(|c| c.name().to_string()).collect();
            let rows = client.query(&statement, &params).await.map_err(query_error)?;
            result.rows = rows
                .iter()
                .map(|row| (0..row.len()).map(|idx| cell_value_from_row(row, idx)).collect())
                .collect();
        }

        Ok(result)
    }
}

#[async_trait::async_trait]
impl DatabaseClient for PostgresClient {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn execute(&self, sql: &SqlTemplate, params: &Params) -> Result<ResultSet> {
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(DatabaseError::ClosedConnection)?;
        let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::Dollar)?;

        query::trace_statement(self.echo, &self.id, &compiled.sql);
        let start = Instant::now();
        let mut result = Self::run(&session.client, &compiled.sql, &compiled.values).await?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute_many(&self, sql: &SqlTemplate, params_list: &[Params]) -> Result<u64> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(DatabaseError::ClosedConnection)?;

        // dropping the transaction without commit rolls it back
        let tx = session.client.transaction().await.map_err(query_error)?;
        let mut total = 0;
        for params in params_list {
            let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::Dollar)?;
            query::trace_statement(self.echo, &self.id, &compiled.sql);
            let result = Self::run(&tx, &compiled.sql, &compiled.values).await?;
            total += result.rows_affected.unwrap_or(0);
        }
        tx.commit().await.map_err(query_error)?;
        Ok(total)
    }

    async fn is_alive(&self) -> bool {
        match self.session.lock().await.as_ref() {
            Some(session) if !session.client.is_closed() => {
                session.client.simple_query("SELECT 1").await.is_ok()
            }
            _ => false,
        }
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if let Some(Session { client, connection_task }) = guard.take() {
            // dropping the client ends the connection task
            drop(client);
            if let Err(e) = connection_task.await {
                tracing::warn!(connection_id = %self.id, error = %e, "PostgreSQL connection task failed");
            }
            tracing::info!(connection_id = %self.id, "Closed PostgreSQL connection");
        }
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.session.lock().await.is_none()
    }
}

fn query_error(e: tokio_postgres::Error) -> DatabaseError {
    let message = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());
    DatabaseError::query(message, e)
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Extract cell value from row
fn cell_value_from_row(row: &Row, idx: usize) -> SqlValue {
    let ty = row.columns()[idx].type_();

    let value = match *ty {
        Type::BOOL => get::<bool>(row, idx).map(SqlValue::Bool),
        Type::INT2 => get::<i16>(row, idx).map(SqlValue::from),
        Type::INT4 => get::<i32>(row, idx).map(SqlValue::from),
        Type::INT8 => get::<i64>(row, idx).map(SqlValue::Int),
        Type::OID => get::<u32>(row, idx).map(SqlValue::from),
        Type::FLOAT4 => get::<f32>(row, idx).map(SqlValue::from),
        Type::FLOAT8 => get::<f64>(row, idx).map(SqlValue::Float),
        Type::NUMERIC => get::<Decimal>(row, idx)
            .and_then(|d| d.to_f64())
            .map(SqlValue::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx).map(SqlValue::Text)
        }
        Type::BYTEA => get::<Vec<u8>>(row, idx).map(SqlValue::Binary),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx).map(SqlValue::from),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(SqlValue::from),
        Type::DATE => get::<NaiveDate>(row, idx).map(SqlValue::from),
        Type::TIME => get::<NaiveTime>(row, idx).map(|t| SqlValue::DateTime(t.to_string())),
        Type::JSON | Type::JSONB => {
            get::<serde_json::Value>(row, idx).map(|v| SqlValue::Text(v.to_string()))
        }
        Type::UUID => get::<uuid::Uuid>(row, idx).map(|u| SqlValue::Text(u.to_string())),
        _ => {
            let text = get::<String>(row, idx);
            if text.is_none() {
                tracing::debug!(column_type = %ty, "Unsupported PostgreSQL column type, returning NULL");
            }
            text.map(SqlValue::Text)
        }
    };

    value.unwrap_or(SqlValue::Null)
}

fn parse_naive_datetime(s: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
}

// Values are converted to whatever the server inferred for the placeholder,
// so an Int can bind to int2/int4/numeric and text can bind to json/uuid/timestamp.
impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(v) => match *ty {
                Type::INT2 | Type::INT4 | Type::INT8 => SqlValue::Int(*v as i64).to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*v).to_sql(ty, out),
                Type::BOOL => (*v != 0).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*v)?.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql_checked(ty, out),
            },
            SqlValue::Text(s) | SqlValue::DateTime(s) => match *ty {
                Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
                Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
                Type::TIMESTAMP => parse_naive_datetime(s)?.to_sql(ty, out),
                Type::TIMESTAMPTZ => match DateTime::parse_from_rfc3339(s) {
                    Ok(dt) => dt.with_timezone(&Utc).to_sql(ty, out),
                    Err(_) => parse_naive_datetime(s)?.and_utc().to_sql(ty, out),
                },
                Type::DATE => NaiveDate::from_str(s)?.to_sql(ty, out),
                Type::TIME => NaiveTime::from_str(s)?.to_sql(ty, out),
                Type::NUMERIC => Decimal::from_str(s)?.to_sql(ty, out),
                _ => s.as_str().to_sql_checked(ty, out),
            },
            SqlValue::Binary(b) => b.as_slice().to_sql_checked(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    /// Create a new PostgreSQL driver
    pub fn new() -> Self {
        Self
    }

    /// Build tokio-postgres config from the unified config
    fn build_pg_config(config: &DatabaseConfig) -> Result<tokio_postgres::Config> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::Configuration("Host is required".to_string()))?;
        let username = config
            .username
            .as_deref()
            .ok_or_else(|| DatabaseError::Configuration("Username is required".to_string()))?;
        let ssl_mode = match config.postgres_sslmode() {
            "disable" => SslMode::Disable,
            "require" => SslMode::Require,
            _ => SslMode::Prefer,
        };

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(host)
            .port(config.get_port())
            .dbname(&config.database)
            .user(username)
            .password(&config.password)
            .ssl_mode(ssl_mode)
            .application_name("sql-explorer");
        if let Some(timeout) = config.connect_timeout() {
            pg_config.connect_timeout(timeout);
        }

        Ok(pg_config)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        config.validate()?;
        let pg_config = Self::build_pg_config(config)?;

        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .map_err(|e| DatabaseError::connection("Failed to connect to PostgreSQL", e))?;

        let id = super::new_connection_id();
        let task_id = id.clone();
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(connection_id = %task_id, error = %e, "PostgreSQL connection error");
            }
        });

        if let Some(schema) = config.postgres_schema.as_deref() {
            let quoted = quote_identifier(DatabaseType::Postgresql, schema)?;
            client
                .batch_execute(&format!("SET search_path TO {}", quoted))
                .await
                .map_err(|e| DatabaseError::connection("Failed to set search_path", e))?;
        }

        Ok(Box::new(PostgresClient {
            id,
            echo: config.echo,
            session: Mutex::new(Some(Session { client, connection_task })),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig::server(DatabaseType::Postgresql, "localhost", "testdb", "testuser", "testpass")
    }

    #[test]
    fn test_driver_type() {
        let driver = PostgresDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Postgresql);
    }

    #[test]
    fn test_pg_config_building() {
        let pg_config = PostgresDriver::build_pg_config(&config()).unwrap();
        assert_eq!(pg_config.get_ports(), &[5432]);
        assert_eq!(pg_config.get_dbname(), Some("testdb"));
        assert_eq!(pg_config.get_user(), Some("testuser"));
        assert_eq!(pg_config.get_password(), Some(&b"testpass"[..]));
    }

    #[test]
    fn test_default_ssl_mode() {
        let pg_config = PostgresDriver::build_pg_config(&config()).unwrap();
        assert_eq!(pg_config.get_ssl_mode(), SslMode::Prefer);
    }

    #[test]
    fn test_custom_ssl_mode() {
        let mut config = config();
        config.postgres_sslmode = Some("disable".to_string());
        let pg_config = PostgresDriver::build_pg_config(&config).unwrap();
        assert_eq!(pg_config.get_ssl_mode(), SslMode::Disable);
    }

    #[test]
    fn test_bind_adapts_to_inferred_type() {
        let mut out = BytesMut::new();
        assert!(SqlValue::Int(7).to_sql(&Type::INT4, &mut out).is_ok());
        assert!(SqlValue::Int(i64::MAX).to_sql(&Type::INT2, &mut out).is_err());
        assert!(SqlValue::Text("{\"a\":1}".into()).to_sql(&Type::JSONB, &mut out).is_ok());
        assert!(SqlValue::Text("2024-01-02 03:04:05".into()).to_sql(&Type::TIMESTAMP, &mut out).is_ok());
        assert!(SqlValue::Text("not-a-uuid".into()).to_sql(&Type::UUID, &mut out).is_err());
        assert!(matches!(SqlValue::Null.to_sql(&Type::TEXT, &mut out), Ok(IsNull::Yes)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = DatabaseConfig::server(DatabaseType::Postgresql, "127.0.0.1", "db", "u", "p")
            .with_port(1)
            .with_connect_timeout(std::time::Duration::from_secs(2));
        let err = PostgresDriver::new().connect(&config).await.err().unwrap();
        assert!(matches!(err, DatabaseError::ConnectionFailed { .. }));
    }
}
