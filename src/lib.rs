//! Unified clients for SQL Server, PostgreSQL, MySQL and SQLite, plus a
//! query explorer that only ever binds values as parameters.
//!
//! ```no_run
//! use sql_explorer::{params, ClientFactory, DatabaseConfig, DatabaseExplorer};
//!
//! # async fn demo() -> sql_explorer::Result<()> {
//! let factory = ClientFactory::with_default_drivers();
//! let client = factory.create_from_config(&DatabaseConfig::sqlite_in_memory()).await?;
//!
//! let explorer = DatabaseExplorer::new(client.as_ref());
//! let adults = explorer
//!     .fetch_all("SELECT * FROM users WHERE age > :min_age", &params! { "min_age" => 18 })
//!     .await?;
//! # let _ = adults;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod explorer;

pub use db::{
    ClientFactory, DatabaseClient, DatabaseConfig, DatabaseDriver, DatabaseError,
    DatabaseErrorKind, DatabaseType, Params, Result, ResultSet, Row, SqlTemplate, SqlValue,
};
pub use explorer::DatabaseExplorer;
