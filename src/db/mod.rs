// Database Module
// Client abstraction, configuration, per-backend drivers and the factory that ties them together

pub mod config;
pub mod drivers;
pub mod factory;
pub mod identifier;
pub mod query;
pub mod traits;

pub use config::{DatabaseConfig, SQLITE_MEMORY};
pub use factory::ClientFactory;
pub use identifier::{quote_identifier, validate_identifier, MAX_IDENTIFIER_LEN};
pub use query::{compile, CompiledQuery, PlaceholderStyle};
pub use traits::{
    BoxError, DatabaseClient, DatabaseDriver, DatabaseError, DatabaseErrorKind, DatabaseType,
    Params, Result, ResultSet, Row, SqlTemplate, SqlValue,
};
