// MS-SQL Driver
// Implements DatabaseDriver for SQL Server using tiberius over a dedicated TCP connection

use crate::db::config::DatabaseConfig;
use crate::db::query::{self, PlaceholderStyle};
use crate::db::traits::{
    DatabaseClient, DatabaseDriver, DatabaseError, DatabaseType, Params, Result, ResultSet,
    SqlTemplate, SqlValue,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::time::Instant;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, FromSql, Query, Row};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type TiberiusClient = Client<Compat<TcpStream>>;

/// SQL Server error number for "password expired"
const PASSWORD_EXPIRED: u32 = 18488;

/// MS-SQL client: one dedicated (non-pooled) tiberius connection
pub struct MssqlClient {
    id: String,
    echo: bool,
    client: Mutex<Option<TiberiusClient>>,
}

impl MssqlClient {
    async fn run(client: &mut TiberiusClient, sql: &str, values: &[SqlValue]) -> Result<ResultSet> {
        let mut statement = Query::new(sql);
        for value in values {
            bind_value(&mut statement, value);
        }

        let mut result = ResultSet::new(sql);
        if query::returns_rows(sql) {
            let mut stream = statement.query(client).await.map_err(query_error)?;
            result.columns = stream
                .columns()
                .await
                .map_err(query_error)?
                .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();

            // procedures may emit empty sets before the one carrying rows
            let sets = stream.into_results().await.map_err(query_error)?;
            if let Some(rows) = sets.into_iter().find(|set| !set.is_empty()) {
                result.columns = rows[0].columns().iter().map(|c| c.name().to_string()).collect();
                result.rows = rows
                    .iter()
                    .map(|row| (0..row.len()).map(|idx| MssqlDriver::cell_value_from_row(row, idx)).collect())
                    .collect();
            }
        } else {
            let outcome = statement.execute(client).await.map_err(query_error)?;
            result.rows_affected = Some(outcome.total());
        }

        Ok(result)
    }
}

#[async_trait::async_trait]
impl DatabaseClient for MssqlClient {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn execute(&self, sql: &SqlTemplate, params: &Params) -> Result<ResultSet> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DatabaseError::ClosedConnection)?;
        let compiled = query::compile(sql.as_str(), params, PlaceholderStyle::AtP)?;

        query::trace_statement(self.echo, &self.id, &compiled.sql);
        let start = Instant::now();
        let mut result = Self::run(client, &compiled.sql, &compiled.values).await?;
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute_many(&self, sql: &SqlTemplate, params_list: &[Params]) -> Result<u64> {
        let mut guard = self.client.lock().await;
        let client = guard.as_mut().ok_or(DatabaseError::ClosedConnection)?;

        client.execute("BEGIN TRANSACTION", &[]).await.map_err(query_error)?;
        let mut total = 0;
        for params in params_list {
            let outcome = match query::compile(sql.as_str(), params, PlaceholderStyle::AtP) {
                Ok(compiled) => {
                    query::trace_statement(self.echo, &self.id, &compiled.sql);
                    Self::run(client, &compiled.sql, &compiled.values).await
                }
                Err(e) => Err(e),
            };
            match outcome {
                Ok(result) => total += result.rows_affected.unwrap_or(0),
                Err(e) => {
                    if let Err(rollback) = client.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[]).await {
                        tracing::warn!(connection_id = %self.id, error = %rollback, "MS-SQL rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        client.execute("COMMIT TRANSACTION", &[]).await.map_err(query_error)?;
        Ok(total)
    }

    async fn is_alive(&self) -> bool {
        let mut guard = self.client.lock().await;
        let Some(client) = guard.as_mut() else {
            return false;
        };
        let alive = match client.simple_query("SELECT 1").await {
            Ok(stream) => stream.into_row().await.is_ok(),
            Err(_) => false,
        };
        alive
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.take() {
            if let Err(e) = client.close().await {
                tracing::warn!(connection_id = %self.id, error = %e, "MS-SQL close reported an error");
            }
            tracing::info!(connection_id = %self.id, "Closed MS-SQL connection");
        }
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.client.lock().await.is_none()
    }
}

fn bind_value(statement: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Null => statement.bind(Option::<String>::None),
        SqlValue::Bool(v) => statement.bind(*v),
        SqlValue::Int(v) => statement.bind(*v),
        SqlValue::Float(v) => statement.bind(*v),
        SqlValue::Text(s) | SqlValue::DateTime(s) => statement.bind(s.clone()),
        SqlValue::Binary(b) => statement.bind(b.clone()),
    }
}

fn query_error(e: tiberius::error::Error) -> DatabaseError {
    let message = match &e {
        tiberius::error::Error::Server(token) => token.message().to_string(),
        other => other.to_string(),
    };
    DatabaseError::query(message, e)
}

fn connection_error(e: tiberius::error::Error) -> DatabaseError {
    if let tiberius::error::Error::Server(token) = &e {
        if token.code() == PASSWORD_EXPIRED {
            return DatabaseError::connection(
                "Password expired. Please change your password using another tool.",
                e,
            );
        }
    }
    DatabaseError::connection("Failed to connect to SQL Server", e)
}

/// MS-SQL driver implementation
pub struct MssqlDriver;

impl MssqlDriver {
    /// Create a new MS-SQL driver
    pub fn new() -> Self {
        Self
    }

    /// Convert unified DatabaseConfig to a tiberius Config
    fn to_tiberius_config(config: &DatabaseConfig) -> Result<Config> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| DatabaseError::Configuration("Host required for MS-SQL".to_string()))?;

        let mut tiberius_config = Config::new();
        tiberius_config.host(host);
        tiberius_config.port(config.get_port());
        tiberius_config.database(&config.database);

        if config.mssql_trusted_connection() {
            tiberius_config.authentication(integrated_auth()?);
        } else {
            let username = config
                .username
                .as_deref()
                .ok_or_else(|| DatabaseError::Configuration("Username required for MS-SQL".to_string()))?;
            tiberius_config.authentication(AuthMethod::sql_server(username, &config.password));
        }

        if config.mssql_trust_cert.unwrap_or(true) {
            tiberius_config.trust_cert();
        }

        tiberius_config.encryption(if config.mssql_encrypt.unwrap_or(false) {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });

        Ok(tiberius_config)
    }

    async fn establish(config: Config) -> Result<TiberiusClient> {
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| DatabaseError::connection("TCP connection failed", e))?;

        tcp.set_nodelay(true)
            .map_err(|e| DatabaseError::connection("Failed to set TCP_NODELAY", e))?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(connection_error)
    }

    /// Extract cell value from row
    fn cell_value_from_row(row: &Row, idx: usize) -> SqlValue {
        let col_type = row
            .columns()
            .get(idx)
            .map(|c| c.column_type())
            .unwrap_or(ColumnType::Null);

        let value = match col_type {
            ColumnType::Null => None,

            ColumnType::Int1 => get::<u8>(row, idx).map(SqlValue::from),
            ColumnType::Int2 => get::<i16>(row, idx).map(SqlValue::from),
            ColumnType::Int4 => get::<i32>(row, idx).map(SqlValue::from),
            ColumnType::Int8 => get::<i64>(row, idx).map(SqlValue::from),
            ColumnType::Intn => get::<i64>(row, idx)
                .or_else(|| get::<i32>(row, idx).map(i64::from))
                .or_else(|| get::<i16>(row, idx).map(i64::from))
                .or_else(|| get::<u8>(row, idx).map(i64::from))
                .map(SqlValue::Int),

            ColumnType::Float4 => get::<f32>(row, idx).map(SqlValue::from),
            ColumnType::Float8 | ColumnType::Money | ColumnType::Money4 => {
                get::<f64>(row, idx).map(SqlValue::Float)
            }
            ColumnType::Floatn => get::<f64>(row, idx)
                .or_else(|| get::<f32>(row, idx).map(f64::from))
                .map(SqlValue::Float),
            ColumnType::Decimaln | ColumnType::Numericn => get::<tiberius::numeric::Numeric>(row, idx)
                .map(|n| SqlValue::Float(f64::from(n))),

            ColumnType::Bit | ColumnType::Bitn => get::<bool>(row, idx).map(SqlValue::Bool),

            ColumnType::BigVarChar | ColumnType::BigChar | ColumnType::NVarchar | ColumnType::NChar
            | ColumnType::Text | ColumnType::NText => get::<&str>(row, idx).map(SqlValue::from),

            ColumnType::Datetime | ColumnType::Datetime2 | ColumnType::Datetimen | ColumnType::Datetime4 => {
                get::<NaiveDateTime>(row, idx).map(SqlValue::from)
            }
            ColumnType::DatetimeOffsetn => get::<DateTime<Utc>>(row, idx).map(SqlValue::from),
            ColumnType::Daten => get::<NaiveDate>(row, idx).map(SqlValue::from),
            ColumnType::Timen => get::<NaiveTime>(row, idx).map(|t| SqlValue::DateTime(t.to_string())),

            ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => {
                get::<&[u8]>(row, idx).map(SqlValue::from)
            }

            ColumnType::Guid => get::<tiberius::Uuid>(row, idx).map(|u| SqlValue::Text(u.to_string())),
            ColumnType::Xml => get::<&tiberius::xml::XmlData>(row, idx)
                .map(|xml| SqlValue::Text(xml.to_owned().into_string())),

            other => {
                tracing::debug!(column_type = ?other, "Unsupported SQL Server column type, returning NULL");
                None
            }
        };

        value.unwrap_or(SqlValue::Null)
    }
}

/// Login with the identity of the running process
#[cfg(feature = "mssql-integrated-auth")]
fn integrated_auth() -> Result<AuthMethod> {
    Ok(AuthMethod::Integrated)
}

#[cfg(not(feature = "mssql-integrated-auth"))]
fn integrated_auth() -> Result<AuthMethod> {
    Err(DatabaseError::Configuration(
        "Trusted connections need the mssql-integrated-auth feature".to_string(),
    ))
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<T, _>(idx).ok().flatten()
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>> {
        config.validate()?;
        let tiberius_config = Self::to_tiberius_config(config)?;

        let client = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, Self::establish(tiberius_config))
                .await
                .map_err(|_| {
                    DatabaseError::connection_message(format!(
                        "Timed out after {}s connecting to {}",
                        timeout.as_secs(),
                        config.target()
                    ))
                })??,
            None => Self::establish(tiberius_config).await?,
        };

        Ok(Box::new(MssqlClient {
            id: super::new_connection_id(),
            echo: config.echo,
            client: Mutex::new(Some(client)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> DatabaseConfig {
        DatabaseConfig::server(DatabaseType::Mssql, "localhost", "master", "sa", "password")
    }

    #[test]
    fn test_driver_type() {
        let driver = MssqlDriver::new();
        assert_eq!(driver.database_type(), DatabaseType::Mssql);
        assert_eq!(driver.driver_name(), "Microsoft SQL Server");
    }

    #[test]
    fn test_config_conversion() {
        let tiberius_config = MssqlDriver::to_tiberius_config(&config().with_port(14330)).unwrap();
        assert_eq!(tiberius_config.get_addr(), "localhost:14330");

        let mut missing_user = config();
        missing_user.username = None;
        assert!(MssqlDriver::to_tiberius_config(&missing_user).is_err());
    }

    #[test]
    fn test_trusted_connection_needs_no_username() {
        let config = DatabaseConfig::mssql_trusted("localhost", "mydb");
        assert!(config.validate().is_ok());

        let converted = MssqlDriver::to_tiberius_config(&config);
        if cfg!(feature = "mssql-integrated-auth") {
            assert_eq!(converted.unwrap().get_addr(), "localhost:1433");
        } else {
            let err = converted.err().unwrap();
            assert!(matches!(err, DatabaseError::Configuration(_)));
            assert!(err.to_string().contains("mssql-integrated-auth"));
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let config = DatabaseConfig::server(DatabaseType::Mssql, "127.0.0.1", "master", "sa", "pw")
            .with_port(1)
            .with_connect_timeout(Duration::from_secs(2));
        let err = MssqlDriver::new().connect(&config).await.err().unwrap();
        assert!(matches!(err, DatabaseError::ConnectionFailed { .. }));
    }
}
