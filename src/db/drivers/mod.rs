// Database Drivers
// One implementation per supported database type, each behind its cargo feature

use crate::db::traits::DatabaseDriver;
use std::sync::Arc;

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export drivers
#[cfg(feature = "mssql")]
pub use mssql::{MssqlClient, MssqlDriver};
#[cfg(feature = "mysql")]
pub use mysql::{MySqlClient, MySqlDriver};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresClient, PostgresDriver};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteClient, SqliteDriver};

/// Every driver compiled into this build
pub fn default_drivers() -> Vec<Arc<dyn DatabaseDriver>> {
    #[allow(unused_mut)]
    let mut drivers: Vec<Arc<dyn DatabaseDriver>> = Vec::new();
    #[cfg(feature = "sqlite")]
    drivers.push(Arc::new(SqliteDriver::new()));
    #[cfg(feature = "postgres")]
    drivers.push(Arc::new(PostgresDriver::new()));
    #[cfg(feature = "mysql")]
    drivers.push(Arc::new(MySqlDriver::new()));
    #[cfg(feature = "mssql")]
    drivers.push(Arc::new(MssqlDriver::new()));
    drivers
}

/// New connection ID for a client
pub(crate) fn new_connection_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
