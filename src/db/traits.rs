// Database Client Traits
// Defines the core abstraction shared by every database backend

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::db::config::DatabaseConfig;

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatabaseType {
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "sqlserver", alias = "mssql")]
    Mssql,
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgresql,
    #[serde(rename = "mysql", alias = "mariadb")]
    Mysql,
}

impl DatabaseType {
    pub const ALL: [DatabaseType; 4] = [
        DatabaseType::Sqlite,
        DatabaseType::Mssql,
        DatabaseType::Postgresql,
        DatabaseType::Mysql,
    ];

    /// Display name for logs and messages
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "SQLite",
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Postgresql => "PostgreSQL",
            DatabaseType::Mysql => "MySQL",
        }
    }

    /// Stable lowercase tag, as accepted by `FromStr`
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "sqlite",
            DatabaseType::Mssql => "sqlserver",
            DatabaseType::Postgresql => "postgresql",
            DatabaseType::Mysql => "mysql",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Sqlite => 0, // File-based, no port
            DatabaseType::Mssql => 1433,
            DatabaseType::Postgresql => 5432,
            DatabaseType::Mysql => 3306,
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = DatabaseError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            "sqlserver" | "mssql" | "sql_server" => Ok(DatabaseType::Mssql),
            "postgresql" | "postgres" | "pg" => Ok(DatabaseType::Postgresql),
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            _ => Err(DatabaseError::UnsupportedDatabase(tag.to_string())),
        }
    }
}

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),

    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Query execution error: {message}")]
    Query {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Connection is closed")]
    ClosedConnection,

    #[error("Expected at most one row, but the lookup matched several")]
    MultipleRows,

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Error kinds callers can branch on regardless of backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseErrorKind {
    Configuration,
    UnsupportedDatabase,
    Connection,
    Query,
    ClosedConnection,
    MultipleRows,
    InvalidIdentifier,
}

impl DatabaseError {
    pub fn connection(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        DatabaseError::ConnectionFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn connection_message(message: impl Into<String>) -> Self {
        DatabaseError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    pub fn query(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        DatabaseError::Query {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn query_message(message: impl Into<String>) -> Self {
        DatabaseError::Query {
            message: message.into(),
            source: None,
        }
    }

    pub fn kind(&self) -> DatabaseErrorKind {
        match self {
            DatabaseError::Configuration(_) => DatabaseErrorKind::Configuration,
            DatabaseError::UnsupportedDatabase(_) => DatabaseErrorKind::UnsupportedDatabase,
            DatabaseError::ConnectionFailed { .. } => DatabaseErrorKind::Connection,
            DatabaseError::Query { .. } => DatabaseErrorKind::Query,
            DatabaseError::ClosedConnection => DatabaseErrorKind::ClosedConnection,
            DatabaseError::MultipleRows => DatabaseErrorKind::MultipleRows,
            DatabaseError::InvalidIdentifier(_) => DatabaseErrorKind::InvalidIdentifier,
        }
    }
}

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

/// A single value, either bound as a parameter or read back from a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(String),
    Binary(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(v) => Some(*v),
            SqlValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            SqlValue::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) | SqlValue::DateTime(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! sql_value_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for SqlValue {
            fn from(v: $ty) -> Self {
                SqlValue::Int(i64::from(v))
            }
        })*
    };
}

sql_value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<f32> for SqlValue {
    fn from(v: f32) -> Self {
        SqlValue::Float(f64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&String> for SqlValue {
    fn from(v: &String) -> Self {
        SqlValue::Text(v.clone())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Binary(v)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(v: &[u8]) -> Self {
        SqlValue::Binary(v.to_vec())
    }
}

impl From<chrono::NaiveDateTime> for SqlValue {
    fn from(v: chrono::NaiveDateTime) -> Self {
        SqlValue::DateTime(v.to_string())
    }
}

impl From<chrono::NaiveDate> for SqlValue {
    fn from(v: chrono::NaiveDate) -> Self {
        SqlValue::DateTime(v.to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for SqlValue {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        SqlValue::DateTime(v.to_rfc3339())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Named parameters, keyed by placeholder name without the leading `:`
pub type Params = BTreeMap<String, SqlValue>;

/// Build a [`Params`] map: `params! { "min_age" => 18, "name" => "Alice" }`
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::Params::new();
        $(
            params.insert(::std::string::String::from($name), $crate::SqlValue::from($value));
        )+
        params
    }};
}

/// SQL text with `:name` placeholders.
///
/// Only string literals convert implicitly. Text assembled at runtime has to
/// go through [`SqlTemplate::trusted`], which keeps caller data out of the
/// statement unless someone opts in by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SqlTemplate(Cow<'static, str>);

impl SqlTemplate {
    pub const fn new(sql: &'static str) -> Self {
        Self(Cow::Borrowed(sql))
    }

    /// Wrap SQL text built at runtime. The text must not contain caller-supplied values.
    pub fn trusted(sql: impl Into<String>) -> Self {
        Self(Cow::Owned(sql.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for SqlTemplate {
    fn from(sql: &'static str) -> Self {
        Self::new(sql)
    }
}

impl fmt::Display for SqlTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of a single statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Set for statements that do not produce rows
    pub rows_affected: Option<u64>,
    pub execution_time_ms: u64,
    /// The statement as sent to the driver, with native placeholders
    pub statement_text: String,
}

impl ResultSet {
    pub fn new(statement_text: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: None,
            execution_time_ms: 0,
            statement_text: statement_text.into(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Row> {
        let columns: Arc<[String]> = self.columns.into();
        self.rows
            .into_iter()
            .map(|values| Row {
                columns: Arc::clone(&columns),
                values,
            })
            .collect()
    }

    pub fn into_first_row(self) -> Option<Row> {
        self.into_rows().into_iter().next()
    }
}

/// One result row: column names in select order, each mapped to its value
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<SqlValue>) -> Self {
        Self {
            columns: columns.into(),
            values,
        }
    }

    /// Value of the first column with this name
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn into_map(self) -> BTreeMap<String, SqlValue> {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Client trait - one live connection to one database
#[async_trait::async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Unique ID assigned when the connection was opened
    fn connection_id(&self) -> &str;

    fn database_type(&self) -> DatabaseType;

    /// Run one statement. `:name` placeholders in `sql` are bound from `params`.
    async fn execute(&self, sql: &SqlTemplate, params: &Params) -> Result<ResultSet>;

    /// Run one statement once per parameter set; returns the total rows affected.
    ///
    /// The bundled drivers override this to run the batch in one transaction.
    async fn execute_many(&self, sql: &SqlTemplate, params_list: &[Params]) -> Result<u64> {
        let mut total = 0;
        for params in params_list {
            let result = self.execute(sql, params).await?;
            total += result.rows_affected.unwrap_or(0);
        }
        Ok(total)
    }

    /// Test if the connection is alive
    async fn is_alive(&self) -> bool;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    async fn is_closed(&self) -> bool;
}

/// Database driver trait - builds clients for one database type
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Get the database type this driver supports
    fn database_type(&self) -> DatabaseType;

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str {
        self.database_type().display_name()
    }

    /// Open a new connection from configuration
    async fn connect(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_tags_round_trip() {
        for db_type in DatabaseType::ALL {
            assert_eq!(db_type.as_str().parse::<DatabaseType>().unwrap(), db_type);
        }
        assert_eq!("Postgres".parse::<DatabaseType>().unwrap(), DatabaseType::Postgresql);
        assert_eq!("mssql".parse::<DatabaseType>().unwrap(), DatabaseType::Mssql);
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let err = "oracle".parse::<DatabaseType>().unwrap_err();
        assert_eq!(err.kind(), DatabaseErrorKind::UnsupportedDatabase);
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DatabaseType::Sqlite.default_port(), 0);
        assert_eq!(DatabaseType::Mssql.default_port(), 1433);
        assert_eq!(DatabaseType::Postgresql.default_port(), 5432);
        assert_eq!(DatabaseType::Mysql.default_port(), 3306);
    }

    #[test]
    fn test_params_macro() {
        let params = params! { "name" => "Alice", "age" => 30, "nickname" => None::<String> };
        assert_eq!(params.get("name"), Some(&SqlValue::Text("Alice".to_string())));
        assert_eq!(params.get("age"), Some(&SqlValue::Int(30)));
        assert_eq!(params.get("nickname"), Some(&SqlValue::Null));
        assert!(params!().is_empty());
    }

    #[test]
    fn test_row_lookup_and_serialization() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![SqlValue::Int(1), SqlValue::Text("Alice".to_string())],
        );
        assert_eq!(row.get("name").and_then(SqlValue::as_str), Some("Alice"));
        assert_eq!(row.get("missing"), None);

        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":1,"name":"Alice"}"#);
    }

    #[test]
    fn test_result_set_into_rows_shares_columns() {
        let mut result = ResultSet::new("SELECT 1");
        result.columns = vec!["n".to_string()];
        result.rows = vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]];

        let rows = result.into_rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("n"), Some(&SqlValue::Int(2)));
    }
}
