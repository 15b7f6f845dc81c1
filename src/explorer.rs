// Database Explorer
// Safe query helpers over any DatabaseClient. Values are always bound;
// table and column names are validated and quoted before they reach SQL text.

use crate::db::identifier::quote_identifier;
use crate::db::traits::{
    DatabaseClient, DatabaseError, DatabaseType, Params, Result, ResultSet, Row, SqlTemplate,
    SqlValue,
};
use std::collections::HashSet;

/// Query helpers bound to one client. The explorer never closes the client.
pub struct DatabaseExplorer<'a> {
    client: &'a dyn DatabaseClient,
    allowed_tables: Option<HashSet<String>>,
}

impl<'a> DatabaseExplorer<'a> {
    pub fn new(client: &'a dyn DatabaseClient) -> Self {
        Self {
            client,
            allowed_tables: None,
        }
    }

    /// Only accept these table names (case-insensitive) in the table helpers
    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_tables = Some(
            tables
                .into_iter()
                .map(|t| t.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn client(&self) -> &'a dyn DatabaseClient {
        self.client
    }

    /// Run a parameterized statement and return the raw result
    pub async fn execute(&self, sql: impl Into<SqlTemplate>, params: &Params) -> Result<ResultSet> {
        self.client.execute(&sql.into(), params).await
    }

    /// Run a query and return every row; no rows is an empty vec
    pub async fn fetch_all(&self, sql: impl Into<SqlTemplate>, params: &Params) -> Result<Vec<Row>> {
        Ok(self.execute(sql, params).await?.into_rows())
    }

    /// Run a query and return its first row, if any
    pub async fn fetch_one(&self, sql: impl Into<SqlTemplate>, params: &Params) -> Result<Option<Row>> {
        Ok(self.execute(sql, params).await?.into_first_row())
    }

    /// Run a statement once per parameter set; returns the total rows affected
    pub async fn execute_many(&self, sql: impl Into<SqlTemplate>, params_list: &[Params]) -> Result<u64> {
        self.client.execute_many(&sql.into(), params_list).await
    }

    /// Look up a single row by key.
    ///
    /// Returns `Ok(None)` when nothing matches and [`DatabaseError::MultipleRows`]
    /// when the key is not unique.
    pub async fn find_by_id(
        &self,
        table: &str,
        id_column: &str,
        id_value: impl Into<SqlValue>,
    ) -> Result<Option<Row>> {
        let table = self.table_name(table)?;
        let column = self.column_name(id_column)?;

        let filter = format!("{} = :id_value", column);
        let sql = self.select("*", &table, Some(filter.as_str()), Some(2));
        let params = Params::from([("id_value".to_string(), id_value.into())]);

        let mut rows = self.fetch_all(sql, &params).await?;
        if rows.len() > 1 {
            return Err(DatabaseError::MultipleRows);
        }
        Ok(rows.pop())
    }

    /// Every row of a table, optionally capped at `limit`
    pub async fn find_all(&self, table: &str, limit: Option<u64>) -> Result<Vec<Row>> {
        let table = self.table_name(table)?;
        let sql = self.select("*", &table, None, limit);
        self.fetch_all(sql, &Params::new()).await
    }

    pub async fn count(&self, table: &str) -> Result<u64> {
        let table = self.table_name(table)?;
        let sql = SqlTemplate::trusted(format!("SELECT COUNT(*) AS cnt FROM {}", table));

        let Some(row) = self.fetch_one(sql, &Params::new()).await? else {
            return Ok(0);
        };
        row.get_index(0)
            .and_then(SqlValue::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| DatabaseError::query_message("COUNT(*) did not return a non-negative integer"))
    }

    /// Whether any row has `column = value`
    pub async fn exists(&self, table: &str, column: &str, value: impl Into<SqlValue>) -> Result<bool> {
        let table = self.table_name(table)?;
        let column = self.column_name(column)?;

        let filter = format!("{} = :value", column);
        let sql = self.select("1 AS found", &table, Some(filter.as_str()), Some(1));
        let params = Params::from([("value".to_string(), value.into())]);

        Ok(self.fetch_one(sql, &params).await?.is_some())
    }

    fn table_name(&self, table: &str) -> Result<String> {
        if let Some(allowed) = &self.allowed_tables {
            if !allowed.contains(&table.to_ascii_lowercase()) {
                tracing::warn!(table, "Rejected table outside the allow-list");
                return Err(DatabaseError::InvalidIdentifier(format!(
                    "'{}' is not an allowed table",
                    table
                )));
            }
        }
        self.quote(table)
    }

    fn column_name(&self, column: &str) -> Result<String> {
        if column.contains('.') {
            return Err(DatabaseError::InvalidIdentifier(format!(
                "'{}' must be a plain column name",
                column
            )));
        }
        self.quote(column)
    }

    fn quote(&self, name: &str) -> Result<String> {
        quote_identifier(self.client.database_type(), name).inspect_err(|_| {
            tracing::warn!(identifier = name, "Rejected identifier");
        })
    }

    /// `SELECT` over already-quoted identifiers with a dialect-specific row cap
    fn select(&self, columns: &str, table: &str, filter: Option<&str>, limit: Option<u64>) -> SqlTemplate {
        let mut sql = String::from("SELECT ");
        let is_mssql = self.client.database_type() == DatabaseType::Mssql;

        if let (true, Some(n)) = (is_mssql, limit) {
            sql.push_str(&format!("TOP ({}) ", n));
        }
        sql.push_str(&format!("{} FROM {}", columns, table));
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if let (false, Some(n)) = (is_mssql, limit) {
            sql.push_str(&format!(" LIMIT {}", n));
        }

        SqlTemplate::trusted(sql)
    }
}
